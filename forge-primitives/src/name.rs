//! Tool names shared by the registry, the store, and the evolution pipeline.

use std::borrow::Borrow;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest tool name accepted anywhere in the runtime.
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Unique, stable tool identifier restricted to `[a-z0-9_]`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ToolName(String);

impl ToolName {
    /// Creates a tool name after validating its format.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToolName`] if the name is empty, too long, or
    /// contains characters outside `[a-z0-9_]`.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate(&name)?;
        Ok(Self(name))
    }

    /// Derives a tool name from arbitrary user input.
    ///
    /// The input is lower-cased, every character outside `[a-z0-9_]` becomes
    /// `_`, runs of `_` collapse into one, and leading/trailing `_` are
    /// trimmed. Names longer than [`MAX_TOOL_NAME_LEN`] are truncated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidToolName`] when nothing usable remains.
    pub fn sanitize(input: &str) -> Result<Self> {
        let mut out = String::with_capacity(input.len());
        for ch in input.trim().chars().flat_map(char::to_lowercase) {
            let mapped = if ch.is_ascii_lowercase() || ch.is_ascii_digit() {
                ch
            } else {
                '_'
            };
            if mapped == '_' && out.ends_with('_') {
                continue;
            }
            out.push(mapped);
        }

        let trimmed = out.trim_matches('_');
        let mut sanitized: String = trimmed.chars().take(MAX_TOOL_NAME_LEN).collect();
        while sanitized.ends_with('_') {
            sanitized.pop();
        }

        if sanitized.is_empty() {
            return Err(Error::InvalidToolName {
                name: input.to_owned(),
                reason: "name has no usable characters".into(),
            });
        }

        Ok(Self(sanitized))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ToolName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ToolName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ToolName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<ToolName> for String {
    fn from(value: ToolName) -> Self {
        value.0
    }
}

impl TryFrom<String> for ToolName {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

fn validate(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidToolName {
            name: String::new(),
            reason: "name cannot be empty".into(),
        });
    }

    if name.len() > MAX_TOOL_NAME_LEN {
        return Err(Error::InvalidToolName {
            name: name.into(),
            reason: format!("name length must be <= {MAX_TOOL_NAME_LEN}"),
        });
    }

    if !name
        .chars()
        .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '_'))
    {
        return Err(Error::InvalidToolName {
            name: name.into(),
            reason: "name must contain only lowercase alphanumerics and underscores".into(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_names() {
        let name = ToolName::new("sentiment_score").unwrap();
        assert_eq!(name.as_str(), "sentiment_score");
    }

    #[test]
    fn rejects_uppercase_and_punctuation() {
        assert!(ToolName::new("Sentiment").is_err());
        assert!(ToolName::new("uuid-gen").is_err());
        assert!(ToolName::new("").is_err());
    }

    #[test]
    fn sanitize_normalises_user_input() {
        assert_eq!(ToolName::sanitize("UUID-Gen").unwrap().as_str(), "uuid_gen");
        assert_eq!(
            ToolName::sanitize("  Convert  Currency!! ").unwrap().as_str(),
            "convert_currency"
        );
        assert_eq!(ToolName::sanitize("__a__b__").unwrap().as_str(), "a_b");
    }

    #[test]
    fn sanitize_rejects_empty_results() {
        let err = ToolName::sanitize("!!!").expect_err("nothing usable");
        assert!(matches!(err, Error::InvalidToolName { .. }));
    }

    #[test]
    fn sanitize_truncates_long_names() {
        let long = "a".repeat(100);
        let name = ToolName::sanitize(&long).unwrap();
        assert_eq!(name.as_str().len(), MAX_TOOL_NAME_LEN);
    }

    #[test]
    fn deserialization_validates() {
        let ok: ToolName = serde_json::from_str("\"echo\"").unwrap();
        assert_eq!(ok.as_str(), "echo");
        assert!(serde_json::from_str::<ToolName>("\"Echo!\"").is_err());
    }
}
