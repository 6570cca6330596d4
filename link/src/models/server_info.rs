use serde::{Deserialize, Serialize};

/// Body of the capability probe endpoint
///
/// ```json
/// {"version": "v1.2.709-nightly"}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub version: String,
}

impl ServerInfo {
    /// The `major.minor.patch` core of the reported version.
    ///
    /// Accepts a leading `v` and ignores pre-release or build suffixes, so a
    /// nightly build of a release counts as that release.
    pub fn version_core(&self) -> Option<semver::Version> {
        let trimmed = self.version.trim().trim_start_matches(['v', 'V']);
        let core = trimmed
            .split(|c: char| c == '-' || c == '+' || c.is_whitespace())
            .next()?;
        let mut parts = core.splitn(3, '.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        let patch = parts.next().unwrap_or("0").parse().ok()?;
        Some(semver::Version::new(major, minor, patch))
    }
}
