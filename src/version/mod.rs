use std::fmt;

use log::{info, warn};

use crate::error::{ReleaseError, Result};
use crate::manifest::MANIFEST_PREFIX;

/// Ordered component-wise: the first differing component decides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReleaseVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl ReleaseVersion {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Bump {
    Major,
    Minor,
    Patch,
}

/// Resolve a version token (`major`, `minor`, `patch` or `X.Y.Z`) against the
/// manifest keys already published.
pub fn resolve<'a, I>(token: &str, existing_keys: I) -> Result<String>
where
    I: IntoIterator<Item = &'a str>,
{
    if is_explicit_version(token) {
        return Ok(token.to_owned());
    }

    let bump = match token {
        "major" => Bump::Major,
        "minor" => Bump::Minor,
        "patch" => Bump::Patch,
        other => return Err(ReleaseError::InvalidVersion(other.to_owned())),
    };

    let last = most_recent(existing_keys);
    info!("version: most recent manifest version is {last}");
    let next = match bump {
        Bump::Major => ReleaseVersion::new(last.major + 1, 0, 0),
        Bump::Minor => ReleaseVersion::new(last.major, last.minor + 1, 0),
        Bump::Patch => ReleaseVersion::new(last.major, last.minor, last.patch + 1),
    };
    Ok(next.to_string())
}

/// Highest manifest version among `keys`, or `0.0.0` when there is none.
pub fn most_recent<'a, I>(keys: I) -> ReleaseVersion
where
    I: IntoIterator<Item = &'a str>,
{
    let mut max = ReleaseVersion::default();
    for key in keys {
        let Some(candidate) = version_from_key(key) else {
            warn!("version: ignoring manifest key `{key}` without X.Y.Z version");
            continue;
        };
        if candidate > max {
            max = candidate;
        }
    }
    max
}

/// Extract the version from a `config/X.Y.Z.json` key.
pub fn version_from_key(key: &str) -> Option<ReleaseVersion> {
    let name = key.strip_prefix(MANIFEST_PREFIX)?;
    let mut parts = name.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    Some(ReleaseVersion::new(major, minor, patch))
}

/// True when `token` is exactly three dot-separated runs of digits.
pub fn is_explicit_version(token: &str) -> bool {
    let parts: Vec<&str> = token.split('.').collect();
    parts.len() == 3
        && parts
            .iter()
            .all(|part| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit()))
}
