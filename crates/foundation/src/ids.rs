use serde::{Deserialize, Serialize};

/// Parcel identifier (PNU).
///
/// Opaque and stable across sessions; the join key between every store.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pnu(String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parcel identifier must not be empty")]
pub struct EmptyPnu;

impl Pnu {
    /// Builds an identifier, trimming surrounding whitespace.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, EmptyPnu> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            return Err(EmptyPnu);
        }
        Ok(Pnu(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Pnu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Pnu {
    type Err = EmptyPnu;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Pnu::new(s)
    }
}

impl AsRef<str> for Pnu {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::{EmptyPnu, Pnu};

    #[test]
    fn trims_and_rejects_blank() {
        assert_eq!(Pnu::new("  1111010100100010000 ").unwrap().as_str(), "1111010100100010000");
        assert_eq!(Pnu::new("   "), Err(EmptyPnu));
        assert_eq!(Pnu::new(""), Err(EmptyPnu));
    }

    #[test]
    fn serializes_as_plain_string() {
        let id = Pnu::new("PNU-A").unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"PNU-A\"");
    }
}
