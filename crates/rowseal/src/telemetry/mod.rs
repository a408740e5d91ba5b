//! Structured logging setup for hosts embedding the pipeline.
//!
//! # Telemetry invariants
//!
//! - **No plaintext, ciphertext or key material** in any log field, at any level.
//!   Events carry table names, column names, binding keys and row counts only.
//! - Log level comes from `RUST_LOG` when set, else from `Settings::log_level`.

pub mod init;

pub use init::{init_tracing, LogFormat};
