//! Core domain values shared throughout the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version reported by the supervised game server.
///
/// Servers announce themselves as e.g. `v0.1.5.1`; the leading `v` is
/// optional and every dot-separated component must be numeric.
///
/// # Example
/// ```
/// use gsv_common::ServerVersion;
///
/// let version: ServerVersion = "v0.1.5.1".parse().unwrap();
/// assert_eq!(version.parts(), &[0, 1, 5, 1]);
/// assert_eq!(version.to_string(), "v0.1.5.1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServerVersion {
    parts: Vec<u32>,
}

impl ServerVersion {
    /// Creates a version from its numeric components.
    pub fn new(parts: Vec<u32>) -> Self {
        Self { parts }
    }

    /// Returns the numeric components.
    pub fn parts(&self) -> &[u32] {
        &self.parts
    }
}

impl FromStr for ServerVersion {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);

        if digits.is_empty() {
            return Err(crate::Error::validation(format!("Empty version string: {:?}", s)));
        }

        let parts = digits
            .split('.')
            .map(|part| part.parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| crate::Error::validation(format!("Invalid version string: {:?}", s)))?;

        Ok(Self { parts })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        write!(f, "v{}", joined)
    }
}
