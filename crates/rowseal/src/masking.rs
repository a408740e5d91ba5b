//! Display masking for sensitive strings.
//!
//! Masking is lossy and stateless. It is applied to string values only; null
//! and non-string values pass through unchanged. Lengths are counted in
//! characters, so multi-byte text masks the same way as ASCII.

use rowseal_common::Value;
use serde::Deserialize;

const MASK: char = '*';

/// Masking strategy for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaskKind {
    None,
    /// First 3 and last 4 characters visible. Values of 7 characters or
    /// fewer are masked like [`MaskKind::Default`].
    MobilePhone,
    /// Same shape as [`MaskKind::MobilePhone`].
    IdCard,
    /// Bank clearing code: first 4 characters visible. Codes of 4 characters
    /// or fewer are shown whole.
    Cnaps,
    /// Length-preserving middle masking.
    Default,
}

/// When a field is masked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaskRule {
    pub kind: MaskKind,
    /// Mask values returned by reads, after decryption and verification.
    pub on_read: bool,
    /// Mask values before they are signed, encrypted and stored.
    pub on_write: bool,
}

impl MaskRule {
    /// Mask on read only.
    pub fn read(kind: MaskKind) -> Self {
        Self {
            kind,
            on_read: true,
            on_write: false,
        }
    }

    /// Mask on write only.
    pub fn write(kind: MaskKind) -> Self {
        Self {
            kind,
            on_read: false,
            on_write: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.kind != MaskKind::None && (self.on_read || self.on_write)
    }
}

/// Mask `text` according to `kind`.
pub fn mask_str(kind: MaskKind, text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    match kind {
        MaskKind::None => text.to_owned(),
        MaskKind::MobilePhone | MaskKind::IdCard if chars.len() > 7 => keep_ends(&chars, 3, 4),
        MaskKind::Cnaps => keep_ends(&chars, chars.len().min(4), 0),
        _ => middle(&chars),
    }
}

/// Apply `kind` to a field value. Only strings are rewritten.
pub fn mask_value(kind: MaskKind, value: &Value) -> Option<Value> {
    match value {
        Value::String(s) if kind != MaskKind::None => Some(Value::String(mask_str(kind, s))),
        _ => None,
    }
}

fn keep_ends(chars: &[char], head: usize, tail: usize) -> String {
    let stars = chars.len() - head - tail;
    chars[..head]
        .iter()
        .copied()
        .chain(std::iter::repeat(MASK).take(stars))
        .chain(chars[chars.len() - tail..].iter().copied())
        .collect()
}

fn middle(chars: &[char]) -> String {
    match chars.len() {
        0 => String::new(),
        1 => MASK.to_string(),
        2 => keep_ends(chars, 0, 1),
        3..=7 => keep_ends(chars, 1, 1),
        n => {
            let head = (n - 6) / 2;
            keep_ends(chars, head, n - 6 - head)
        }
    }
}
