use serde::{Deserialize, Serialize};
use std::fmt;

/// `host:port` of a (hopefully) running veriflotd.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Appends `default_port` when the raw value carries no port.
    pub fn normalized(raw: &str, default_port: u16) -> Self {
        if raw.contains(':') {
            Self(raw.to_string())
        } else {
            Self(format!("{raw}:{default_port}"))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_appends_default_port() {
        assert_eq!(Endpoint::normalized("10.0.0.1", 7180).as_str(), "10.0.0.1:7180");
    }

    #[test]
    fn test_normalized_keeps_explicit_port() {
        assert_eq!(Endpoint::normalized("10.0.0.1:9100", 7180).as_str(), "10.0.0.1:9100");
    }
}
