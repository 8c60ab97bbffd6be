//! Byte signature parsing.
//!
//! A signature locates a known instruction sequence despite bytes the
//! compiler does not keep stable across builds (addresses, immediates),
//! which are marked as wildcards. Two textual encodings are accepted and
//! normalize to the same internal form, so downstream consumers only ever
//! see the (value, wildcard) sequence.

use std::fmt;

use crate::error::{Error, Result};

/// One position of a signature: a required byte value or a wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternByte {
    pub value: u8,
    pub wildcard: bool,
}

/// An immutable parsed byte signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    bytes: Vec<PatternByte>,
}

impl BytePattern {
    /// Parse the escaped-byte encoding: a code buffer plus an out-of-band
    /// mask of equal length, where `x` marks a byte that must match and
    /// any other character marks a wildcard.
    pub fn from_code_and_mask(code: &[u8], mask: &str) -> Result<Self> {
        if code.len() != mask.len() {
            return Err(Error::InvalidPattern(format!(
                "code is {} bytes but mask has {} entries",
                code.len(),
                mask.len()
            )));
        }

        let bytes = code
            .iter()
            .zip(mask.chars())
            .map(|(&value, m)| PatternByte {
                value,
                wildcard: m != 'x',
            })
            .collect();

        Self::from_parsed(bytes)
    }

    /// Parse the human-readable hex encoding: whitespace-separated tokens,
    /// each either two hex digits or a `??` wildcard.
    pub fn from_hex(pattern: &str) -> Result<Self> {
        let mut bytes = Vec::new();
        for token in pattern.split_whitespace() {
            if token == "??" || token == "?" {
                bytes.push(PatternByte {
                    value: 0,
                    wildcard: true,
                });
                continue;
            }

            if token.len() != 2 {
                return Err(Error::InvalidPattern(format!("invalid token '{token}'")));
            }

            let value = u8::from_str_radix(token, 16)
                .map_err(|e| Error::InvalidPattern(format!("invalid token '{token}': {e}")))?;
            bytes.push(PatternByte {
                value,
                wildcard: false,
            });
        }

        Self::from_parsed(bytes)
    }

    fn from_parsed(bytes: Vec<PatternByte>) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::InvalidPattern("pattern is empty".to_string()));
        }
        // An all-wildcard pattern matches any region of its own length,
        // which is never what a signature author meant.
        if bytes.iter().all(|b| b.wildcard) {
            return Err(Error::InvalidPattern(
                "pattern contains only wildcards".to_string(),
            ));
        }
        Ok(Self { bytes })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn bytes(&self) -> &[PatternByte] {
        &self.bytes
    }

    /// Whether the pattern matches `data` starting at its first byte.
    /// `data` must be at least as long as the pattern.
    pub(crate) fn matches(&self, data: &[u8]) -> bool {
        debug_assert!(data.len() >= self.bytes.len());
        self.bytes
            .iter()
            .zip(data)
            .all(|(p, &b)| p.wildcard || p.value == b)
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .bytes
            .iter()
            .map(|b| {
                if b.wildcard {
                    "??".to_string()
                } else {
                    format!("{:02X}", b.value)
                }
            })
            .collect();
        write!(f, "{}", rendered.join(" "))
    }
}
