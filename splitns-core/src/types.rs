//! Resource names with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Network namespace name with validation
///
/// The name becomes a file under `/run/netns` and a directory under
/// `/etc/netns`, so path separators are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceName(String);

impl NamespaceName {
    /// Maximum length for namespace names
    pub const MAX_LENGTH: usize = 64;

    /// Create a new `NamespaceName` with validation
    ///
    /// # Errors
    /// Returns error if the name is empty, too long, or contains invalid characters
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    fn validate(name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::invalid_config("Namespace name cannot be empty"));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(Error::invalid_config(format!(
                "Namespace name too long (max {} chars)",
                Self::MAX_LENGTH
            )));
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(Error::invalid_config(
                "Namespace name can only contain alphanumeric, dash, and underscore",
            ));
        }

        Ok(())
    }

    /// Get the namespace name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NamespaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for NamespaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<NamespaceName> for String {
    fn from(name: NamespaceName) -> Self {
        name.0
    }
}

/// Network interface name
///
/// Linux caps interface names at `IFNAMSIZ - 1` bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Maximum length for interface names
    pub const MAX_LENGTH: usize = 15;

    /// Create a new `InterfaceName` with validation
    ///
    /// # Errors
    /// Returns error if the name would be rejected by the kernel
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(Error::invalid_config("Interface name cannot be empty"));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(Error::invalid_config(format!(
                "Interface name '{name}' too long (max {} bytes)",
                Self::MAX_LENGTH
            )));
        }

        if name == "." || name == ".." {
            return Err(Error::invalid_config(format!(
                "Interface name '{name}' is reserved"
            )));
        }

        if name
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
        {
            return Err(Error::invalid_config(format!(
                "Interface name '{name}' contains '/', ':' or whitespace"
            )));
        }

        Ok(Self(name))
    }

    /// Get the interface name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for InterfaceName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl From<InterfaceName> for String {
    fn from(name: InterfaceName) -> Self {
        name.0
    }
}
