// src/version.rs

//! Package version parsing, ordering, and constraint matching
//!
//! Versions are dotted numeric components with an optional `-r<N>` revision
//! (`1.0`, `2.14.3`, `1.0-r2`). These are not semver: two components are
//! common and the revision outranks equality (`1.0-r1 > 1.0`).

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A package version: dotted numeric components plus an optional revision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Version {
    components: Vec<u64>,
    revision: u64,
}

impl Version {
    /// Parse a version string like `1.0`, `2.14.3`, or `1.0-r2`
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidVersion("empty version string".to_string()));
        }

        let (base, revision) = match s.rsplit_once("-r") {
            Some((base, rev)) => {
                let revision = rev
                    .parse::<u64>()
                    .map_err(|_| Error::InvalidVersion(s.to_string()))?;
                (base, revision)
            }
            None => (s, 0),
        };

        let components = base
            .split('.')
            .map(|c| c.parse::<u64>())
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|_| Error::InvalidVersion(s.to_string()))?;

        if components.is_empty() {
            return Err(Error::InvalidVersion(s.to_string()));
        }

        Ok(Self {
            components,
            revision,
        })
    }

    /// Numeric component at position `idx`, zero when absent
    fn component(&self, idx: usize) -> u64 {
        self.components.get(idx).copied().unwrap_or(0)
    }

    /// True when `self` shares `other`'s branch prefix (all components of
    /// `other` except the last one)
    fn same_branch(&self, other: &Version) -> bool {
        let prefix_len = other.components.len().saturating_sub(1);
        (0..prefix_len).all(|i| self.component(i) == other.component(i))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        for i in 0..len {
            match self.component(i).cmp(&other.component(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.revision.cmp(&other.revision)
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let base = self
            .components
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(".");
        if self.revision > 0 {
            write!(f, "{}-r{}", base, self.revision)
        } else {
            write!(f, "{}", base)
        }
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Version::parse(&s)
    }
}

/// Comparison operator of a version constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionOp {
    /// No constraint: any version matches
    Any,
    /// Exactly the named version
    Equal,
    /// Strictly newer
    Greater,
    /// Newer or equal
    GreaterEq,
    /// Strictly older
    Less,
    /// Older or equal
    LessEq,
    /// Same branch (all but the last component equal), no downgrade
    Tilde,
}

impl VersionOp {
    pub fn as_str(&self) -> &str {
        match self {
            VersionOp::Any => "",
            VersionOp::Equal => "=",
            VersionOp::Greater => ">",
            VersionOp::GreaterEq => ">=",
            VersionOp::Less => "<",
            VersionOp::LessEq => "<=",
            VersionOp::Tilde => "~",
        }
    }
}

/// A version constraint: an operator plus (except for `Any`) a version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionReq {
    pub op: VersionOp,
    pub version: Option<Version>,
}

impl VersionReq {
    /// The unconstrained requirement
    pub fn any() -> Self {
        Self {
            op: VersionOp::Any,
            version: None,
        }
    }

    pub fn exact(version: Version) -> Self {
        Self {
            op: VersionOp::Equal,
            version: Some(version),
        }
    }

    pub fn new(op: VersionOp, version: Version) -> Self {
        Self {
            op,
            version: Some(version),
        }
    }

    /// Parse an operator prefix plus version, e.g. `>=2.0`, `~1.2`, `1.0`
    ///
    /// A bare version means exact match; an empty string means any.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::any());
        }
        let (op, rest) = if let Some(rest) = s.strip_prefix(">=") {
            (VersionOp::GreaterEq, rest)
        } else if let Some(rest) = s.strip_prefix("<=") {
            (VersionOp::LessEq, rest)
        } else if let Some(rest) = s.strip_prefix('>') {
            (VersionOp::Greater, rest)
        } else if let Some(rest) = s.strip_prefix('<') {
            (VersionOp::Less, rest)
        } else if let Some(rest) = s.strip_prefix('~') {
            (VersionOp::Tilde, rest)
        } else if let Some(rest) = s.strip_prefix('=') {
            (VersionOp::Equal, rest)
        } else {
            (VersionOp::Equal, s)
        };
        Ok(Self::new(op, Version::parse(rest)?))
    }

    /// True when `candidate` satisfies this constraint
    pub fn matches(&self, candidate: &Version) -> bool {
        let Some(wanted) = &self.version else {
            return matches!(self.op, VersionOp::Any);
        };
        match self.op {
            VersionOp::Any => true,
            VersionOp::Equal => candidate == wanted,
            VersionOp::Greater => candidate > wanted,
            VersionOp::GreaterEq => candidate >= wanted,
            VersionOp::Less => candidate < wanted,
            VersionOp::LessEq => candidate <= wanted,
            VersionOp::Tilde => candidate.same_branch(wanted) && candidate >= wanted,
        }
    }
}

impl fmt::Display for VersionReq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}{}", self.op.as_str(), v),
            None => write!(f, "*"),
        }
    }
}
