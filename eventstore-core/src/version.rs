use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^v[0-9]+(\.[0-9]+){0,2}$").expect("invalid version regex")
});

/// Semver-shaped aggregate version: `vMAJOR[.MINOR[.PATCH]]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(String);

impl Version {
    /// Parse and validate a version string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PreconditionFailed`] if the string is not of the form
    /// `vMAJOR[.MINOR[.PATCH]]`.
    pub fn parse(version: impl Into<String>) -> Result<Self, Error> {
        let version = version.into();
        if is_valid(&version) {
            Ok(Self(version))
        } else {
            Err(Error::precondition_failed(format!(
                "version {version:?} is not of the form vMAJOR[.MINOR[.PATCH]]"
            )))
        }
    }

    /// Wrap a version string without validating it. Validation is deferred to
    /// [`Aggregate::validate`](crate::aggregate::Aggregate::validate) or
    /// skipped for rows read back from storage.
    #[must_use]
    pub const fn unchecked(version: String) -> Self {
        Self(version)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid(&self.0)
    }
}

fn is_valid(version: &str) -> bool {
    VERSION_PATTERN.is_match(version)
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Version {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
