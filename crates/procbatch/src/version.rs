//! Server version detection

use std::str::FromStr;

use procbatch_core::BatchError;

use crate::constants::LEGACY_DECLARE_MAX_MAJOR_VERSION;

/// Version reported by `SERVERPROPERTY('ProductVersion')`, e.g. `15.0.2000.5`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub build: u32,
}

impl ServerVersion {
    pub const fn new(major: u16, minor: u16, build: u32) -> Self {
        Self {
            major,
            minor,
            build,
        }
    }

    /// Whether `DECLARE @x type = value` is accepted
    pub fn supports_inline_declare(&self) -> bool {
        self.major > LEGACY_DECLARE_MAX_MAJOR_VERSION
    }
}

impl Default for ServerVersion {
    fn default() -> Self {
        Self::new(15, 0, 0)
    }
}

impl FromStr for ServerVersion {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BatchError::Configuration(format!("invalid server version: {:?}", s));
        let mut parts = s.trim().split('.');

        let major = parts
            .next()
            .filter(|p| !p.is_empty())
            .ok_or_else(invalid)?
            .parse::<u16>()
            .map_err(|_| invalid())?;
        let minor = match parts.next() {
            Some(p) => p.parse::<u16>().map_err(|_| invalid())?,
            None => 0,
        };
        let build = match parts.next() {
            Some(p) => p.parse::<u32>().map_err(|_| invalid())?,
            None => 0,
        };

        Ok(Self::new(major, minor, build))
    }
}

impl std::fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}
