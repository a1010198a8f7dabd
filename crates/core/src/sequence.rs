//! Human-readable, per-scope sequence identifiers.

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Entity kinds that carry a per-project sequence id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceKind {
    /// Test cases: `tc1`, `tc2`, ...
    TestCase,
    /// Defects: `DEF-1`, `DEF-2`, ...
    Defect,
}

impl SequenceKind {
    /// The fixed prefix prepended to the sequence number.
    pub fn prefix(&self) -> &'static str {
        match self {
            Self::TestCase => "tc",
            Self::Defect => "DEF-",
        }
    }

    /// Stable name used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestCase => "test_case",
            Self::Defect => "defect",
        }
    }
}

impl fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check that a prefix can be unambiguously followed by a decimal number.
///
/// A prefix ending in a digit would make `a1` + `2` indistinguishable from `a` + `12`.
pub fn validate_prefix(prefix: &str) -> crate::Result<()> {
    if prefix.trim().is_empty() {
        return Err(crate::Error::InvalidSequenceId(
            "prefix must not be empty".to_string(),
        ));
    }
    if prefix.chars().any(char::is_whitespace) {
        return Err(crate::Error::InvalidSequenceId(format!(
            "prefix '{prefix}' must not contain whitespace"
        )));
    }
    if prefix.ends_with(|c: char| c.is_ascii_digit()) {
        return Err(crate::Error::InvalidSequenceId(format!(
            "prefix '{prefix}' must not end with a digit"
        )));
    }
    Ok(())
}

/// A sequence id such as `tc7` or `DEF-12`: a fixed prefix followed by a
/// positive decimal number without leading zeros.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SequenceId {
    prefix: String,
    number: u64,
}

impl SequenceId {
    /// Build a sequence id from a prefix and a 1-based number.
    pub fn new(prefix: impl Into<String>, number: u64) -> crate::Result<Self> {
        let prefix = prefix.into();
        validate_prefix(&prefix)?;
        if number == 0 {
            return Err(crate::Error::InvalidSequenceId(
                "sequence numbers start at 1".to_string(),
            ));
        }
        Ok(Self { prefix, number })
    }

    /// Parse a rendered id, requiring the given prefix.
    pub fn parse(prefix: &str, s: &str) -> crate::Result<Self> {
        let digits = s.strip_prefix(prefix).ok_or_else(|| {
            crate::Error::InvalidSequenceId(format!("'{s}' does not start with '{prefix}'"))
        })?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(crate::Error::InvalidSequenceId(format!(
                "'{s}' has no numeric suffix"
            )));
        }
        if digits.starts_with('0') {
            return Err(crate::Error::InvalidSequenceId(format!(
                "'{s}' has a leading zero"
            )));
        }
        let number = digits
            .parse::<u64>()
            .map_err(|e| crate::Error::InvalidSequenceId(format!("'{s}': {e}")))?;
        Self::new(prefix, number)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn number(&self) -> u64 {
        self.number
    }

    /// The id with the next number under the same prefix.
    pub fn next(&self) -> Self {
        Self {
            prefix: self.prefix.clone(),
            number: self.number.saturating_add(1),
        }
    }
}

impl fmt::Display for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.number)
    }
}

impl Serialize for SequenceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
