use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An IS-04 API version, formatted as `v<major>.<minor>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct APIVersion {
    pub major: u8,
    pub minor: u8,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid API version: {0}")]
pub struct ParseVersionError(String);

impl fmt::Display for APIVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

impl FromStr for APIVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseVersionError(s.to_string());

        let numbers = s.strip_prefix('v').ok_or_else(invalid)?;
        let (major, minor) = numbers.split_once('.').ok_or_else(invalid)?;

        Ok(APIVersion {
            major: major.parse().map_err(|_| invalid())?,
            minor: minor.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for APIVersion {
    type Error = ParseVersionError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<APIVersion> for String {
    fn from(version: APIVersion) -> Self {
        version.to_string()
    }
}

pub mod is_04 {
    use super::APIVersion;

    pub const V1_0: APIVersion = APIVersion { major: 1, minor: 0 };
    pub const V1_1: APIVersion = APIVersion { major: 1, minor: 1 };
    pub const V1_2: APIVersion = APIVersion { major: 1, minor: 2 };
    pub const V1_3: APIVersion = APIVersion { major: 1, minor: 3 };
}
