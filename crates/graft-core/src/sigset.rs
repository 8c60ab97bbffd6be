//! Versioned signature sets.
//!
//! Signatures are tied to a specific host binary build and need re-deriving
//! whenever the host updates, so they live in data rather than code: a JSON
//! document carrying the host version it was authored against. Consumers
//! compile in a builtin set and accept a file override.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::pattern::BytePattern;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureEntry {
    pub name: String,
    pub module: String,
    pub pattern: String,
}

impl SignatureEntry {
    pub fn pattern(&self) -> Result<BytePattern> {
        BytePattern::from_hex(&self.pattern)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureSet {
    pub version: String,
    pub entries: Vec<SignatureEntry>,
}

impl SignatureSet {
    pub fn entry(&self, name: &str) -> Option<&SignatureEntry> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<SignatureSet> {
    let content = fs::read_to_string(&path)?;
    let set = serde_json::from_str(&content)?;
    Ok(set)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, set: &SignatureSet) -> Result<()> {
    let content = serde_json::to_string_pretty(set)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignatureSet {
        SignatureSet {
            version: "2017-05".to_string(),
            entries: vec![SignatureEntry {
                name: "SignalUpdate".to_string(),
                module: "host_dll.dll".to_string(),
                pattern: "55 8B EC 56 8B 75 08 FF 15 ?? ?? ?? ??".to_string(),
            }],
        }
    }

    #[test]
    fn entry_lookup_is_case_insensitive() {
        let set = sample();
        assert!(set.entry("signalupdate").is_some());
        assert!(set.entry("SIGNALUPDATE").is_some());
        assert!(set.entry("other").is_none());
    }

    #[test]
    fn entry_pattern_parses() {
        let set = sample();
        let pattern = set.entry("SignalUpdate").unwrap().pattern().unwrap();
        assert_eq!(pattern.len(), 13);
        assert!(pattern.bytes()[9].wildcard);
    }

    #[test]
    fn json_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("signatures.json");

        let set = sample();
        save_signatures(&path, &set).unwrap();
        let loaded = load_signatures(&path).unwrap();

        assert_eq!(loaded.version, set.version);
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.entries[0].pattern, set.entries[0].pattern);
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = load_signatures("/nonexistent/signatures.json").unwrap_err();
        assert!(matches!(err, crate::Error::Io(_)));
    }
}
