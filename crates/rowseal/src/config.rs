//! Settings loading and validation.
//!
//! Values come from `ROWSEAL_`-prefixed environment variables, optionally
//! layered over a file. Validation fails fast with a clear message on the
//! first problem, so a misconfigured host never starts serving writes.

use std::fmt;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::{
    crypto::{
        cipher::NONCE_LEN, CipherMode, CipherSpec, HmacAlgorithm, HmacSpec, KeyMaterial, Padding,
        SymmetricAlgorithm, TextEncoding,
    },
    pipeline::{fragment::DEFAULT_PLACEHOLDER, PipelineOptions, PlaceholderPattern, WriteFailurePolicy},
    telemetry::LogFormat,
};

/// Environment variable prefix for every setting.
pub const ENV_PREFIX: &str = "ROWSEAL";

/// Validated pipeline settings.
#[derive(Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_cipher_algorithm")]
    pub cipher_algorithm: SymmetricAlgorithm,

    /// `gcm-siv` (deterministic with a fixed IV) or `gcm`.
    #[serde(default = "default_cipher_mode")]
    pub cipher_mode: CipherMode,

    #[serde(default = "default_cipher_padding")]
    pub cipher_padding: Padding,

    /// Text encoding for ciphertext and HMAC output.
    #[serde(default = "default_ciphertext_encoding")]
    pub ciphertext_encoding: TextEncoding,

    /// Base64 key, 16 or 32 bytes depending on `cipher_algorithm`. **Required.**
    pub cipher_key: String,

    /// Optional base64 12-byte IV. Makes encryption deterministic.
    #[serde(default)]
    pub cipher_iv: Option<String>,

    #[serde(default = "default_hmac_algorithm")]
    pub hmac_algorithm: HmacAlgorithm,

    /// Base64 HMAC key. Falls back to `cipher_key`.
    #[serde(default)]
    pub hmac_key: Option<String>,

    #[serde(default = "default_true")]
    pub decrypt_enabled: bool,

    #[serde(default = "default_true")]
    pub verify_signatures: bool,

    #[serde(default)]
    pub on_write_failure: WriteFailurePolicy,

    /// Regex with one capture group that yields the binding key.
    #[serde(default = "default_placeholder_pattern")]
    pub placeholder_pattern: String,

    #[serde(default = "default_engine_cache_max_entries")]
    pub engine_cache_max_entries: usize,

    #[serde(default = "default_engine_cache_idle_secs")]
    pub engine_cache_idle_secs: u64,

    /// Fallback tracing filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_cipher_algorithm() -> SymmetricAlgorithm {
    SymmetricAlgorithm::Aes256
}
fn default_cipher_mode() -> CipherMode {
    CipherMode::GcmSiv
}
fn default_cipher_padding() -> Padding {
    Padding::None
}
fn default_ciphertext_encoding() -> TextEncoding {
    TextEncoding::Base64
}
fn default_hmac_algorithm() -> HmacAlgorithm {
    HmacAlgorithm::Sha256
}
fn default_true() -> bool {
    true
}
fn default_placeholder_pattern() -> String {
    DEFAULT_PLACEHOLDER.into()
}
fn default_engine_cache_max_entries() -> usize {
    1000
}
fn default_engine_cache_idle_secs() -> u64 {
    60
}
fn default_log_level() -> String {
    "info".into()
}

impl Settings {
    /// Load and validate settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is absent or any value is invalid.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .context("failed to build configuration from environment")?;
        Self::finish(cfg)
    }

    /// Load `path` (format from its extension), override with the environment,
    /// then validate.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if validation fails.
    pub fn from_file_and_env(path: &str) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()
            .with_context(|| format!("failed to build configuration from {path}"))?;
        Self::finish(cfg)
    }

    fn finish(cfg: config::Config) -> Result<Self> {
        let s: Settings = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;
        s.validate()?;
        Ok(s)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.cipher_key, "CIPHER_KEY")?;
        self.cipher_spec()?;
        self.hmac_spec()?;
        PlaceholderPattern::new(&self.placeholder_pattern)
            .map_err(|e| anyhow::anyhow!("PLACEHOLDER_PATTERN: {e}"))?;

        if self.engine_cache_max_entries == 0 {
            anyhow::bail!("ENGINE_CACHE_MAX_ENTRIES must be > 0");
        }
        if self.engine_cache_idle_secs == 0 {
            anyhow::bail!("ENGINE_CACHE_IDLE_SECS must be > 0");
        }
        ensure_non_empty(&self.log_level, "LOG_LEVEL")?;
        Ok(())
    }

    /// Decoded cipher parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the key or IV is not valid base64 or has the wrong
    /// length, or if a fixed IV is combined with `gcm`.
    pub fn cipher_spec(&self) -> Result<CipherSpec> {
        let key = KeyMaterial::from_base64(&self.cipher_key).context("CIPHER_KEY is not valid base64")?;
        let expected = self.cipher_algorithm.key_len();
        if key.len() != expected {
            anyhow::bail!("CIPHER_KEY must decode to {expected} bytes, got {}", key.len());
        }

        let iv = match &self.cipher_iv {
            Some(text) if !text.trim().is_empty() => {
                if self.cipher_mode == CipherMode::Gcm {
                    anyhow::bail!("CIPHER_IV is not allowed with gcm; use gcm-siv");
                }
                let raw = TextEncoding::Base64
                    .decode(text)
                    .context("CIPHER_IV is not valid base64")?;
                let iv: [u8; NONCE_LEN] = raw.as_slice().try_into().map_err(|_| {
                    anyhow::anyhow!("CIPHER_IV must decode to {NONCE_LEN} bytes, got {}", raw.len())
                })?;
                Some(iv)
            }
            _ => None,
        };

        Ok(CipherSpec {
            algorithm: self.cipher_algorithm,
            mode: self.cipher_mode,
            padding: self.cipher_padding,
            key,
            iv,
        })
    }

    /// Decoded HMAC parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not valid base64 or is empty.
    pub fn hmac_spec(&self) -> Result<HmacSpec> {
        let text = self
            .hmac_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(&self.cipher_key);
        let key = KeyMaterial::from_base64(text).context("HMAC_KEY is not valid base64")?;
        if key.is_empty() {
            anyhow::bail!("HMAC_KEY must not be empty");
        }
        Ok(HmacSpec {
            algorithm: self.hmac_algorithm,
            key,
        })
    }

    /// Pipeline switches derived from these settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the placeholder pattern is invalid.
    pub fn pipeline_options(&self) -> Result<PipelineOptions> {
        let placeholder = PlaceholderPattern::new(&self.placeholder_pattern)
            .map_err(|e| anyhow::anyhow!("PLACEHOLDER_PATTERN: {e}"))?;
        Ok(PipelineOptions {
            decrypt_enabled: self.decrypt_enabled,
            verify_signatures: self.verify_signatures,
            on_write_failure: self.on_write_failure,
            placeholder,
        })
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("cipher_algorithm", &self.cipher_algorithm)
            .field("cipher_mode", &self.cipher_mode)
            .field("cipher_padding", &self.cipher_padding)
            .field("ciphertext_encoding", &self.ciphertext_encoding)
            .field("cipher_key", &"[REDACTED]")
            .field("cipher_iv", &self.cipher_iv.as_ref().map(|_| "[REDACTED]"))
            .field("hmac_algorithm", &self.hmac_algorithm)
            .field("hmac_key", &self.hmac_key.as_ref().map(|_| "[REDACTED]"))
            .field("decrypt_enabled", &self.decrypt_enabled)
            .field("verify_signatures", &self.verify_signatures)
            .field("on_write_failure", &self.on_write_failure)
            .field("placeholder_pattern", &self.placeholder_pattern)
            .field("engine_cache_max_entries", &self.engine_cache_max_entries)
            .field("engine_cache_idle_secs", &self.engine_cache_idle_secs)
            .field("log_level", &self.log_level)
            .field("log_format", &self.log_format)
            .finish()
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}
