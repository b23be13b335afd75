//! Release requests and terminal run results.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default prefix prepended to the version to form the tag name
pub const DEFAULT_TAG_PREFIX: &str = "v";

/// Invalid release requests
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("source ref is empty")]
    EmptySourceRef,

    #[error("source ref contains whitespace: {0:?}")]
    MalformedSourceRef(String),

    #[error("version is empty")]
    EmptyVersion,

    #[error("invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("tag prefix contains whitespace: {0:?}")]
    MalformedTagPrefix(String),
}

/// What to release: a commit and the version declared at that commit.
///
/// The version is kept as declared (that text is what registries, installs
/// and the tag use) alongside its semver reading. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseRequest {
    source_ref: String,
    declared_version: String,
    version: Version,
    tag_prefix: String,
}

impl ReleaseRequest {
    /// Validate and build a request using the default `v` tag prefix
    pub fn new(source_ref: &str, version: &str) -> Result<Self, RequestError> {
        Self::with_tag_prefix(source_ref, version, DEFAULT_TAG_PREFIX)
    }

    /// Validate and build a request with an explicit tag prefix (may be empty)
    pub fn with_tag_prefix(
        source_ref: &str,
        version: &str,
        tag_prefix: &str,
    ) -> Result<Self, RequestError> {
        let source_ref = source_ref.trim();
        if source_ref.is_empty() {
            return Err(RequestError::EmptySourceRef);
        }
        if source_ref.chars().any(char::is_whitespace) {
            return Err(RequestError::MalformedSourceRef(source_ref.to_string()));
        }

        let version_str = version.trim();
        if version_str.is_empty() {
            return Err(RequestError::EmptyVersion);
        }
        let version = parse_version(version_str)?;

        if tag_prefix.chars().any(char::is_whitespace) {
            return Err(RequestError::MalformedTagPrefix(tag_prefix.to_string()));
        }

        Ok(Self {
            source_ref: source_ref.to_string(),
            declared_version: version_str.to_string(),
            version,
            tag_prefix: tag_prefix.to_string(),
        })
    }

    pub fn source_ref(&self) -> &str {
        &self.source_ref
    }

    /// Semver reading of the declared version (`0.4` reads as `0.4.0`)
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// The version exactly as declared
    pub fn version_string(&self) -> String {
        self.declared_version.clone()
    }

    /// Tag name for this release, e.g. `v1.2.0`
    pub fn tag_name(&self) -> String {
        format!("{}{}", self.tag_prefix, self.declared_version)
    }
}

/// Parse a version as semver, falling back to the shorter and suffixed
/// forms common in Python manifests.
///
/// The fallback pads a 1 or 2 part release to three parts and turns a
/// trailing qualifier into a pre-release: `0.4` reads as `0.4.0`,
/// `1.0.0rc1` as `1.0.0-rc1`, `2.1.dev3` as `2.1.0-dev3`.
fn parse_version(text: &str) -> Result<Version, RequestError> {
    let strict = match Version::parse(text) {
        Ok(version) => return Ok(version),
        Err(e) => e,
    };
    loose_semver(text)
        .and_then(|normalized| Version::parse(&normalized).ok())
        .ok_or_else(|| RequestError::InvalidVersion {
            version: text.to_string(),
            reason: strict.to_string(),
        })
}

fn loose_semver(text: &str) -> Option<String> {
    let (core, build) = match text.split_once('+') {
        Some((core, build)) => (core, Some(build)),
        None => (text, None),
    };

    let split = core
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(core.len());
    let (release, qualifier) = core.split_at(split);
    let (release, dotted) = match release.strip_suffix('.') {
        Some(release) => (release, true),
        None => (release, false),
    };
    if dotted && qualifier.is_empty() {
        return None;
    }

    let parts: Vec<&str> = release.split('.').collect();
    if parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }

    let mut normalized = parts.join(".");
    for _ in parts.len()..3 {
        normalized.push_str(".0");
    }

    if !qualifier.is_empty() {
        let qualifier = qualifier.trim_start_matches(|c: char| matches!(c, '-' | '_' | '.'));
        if qualifier.is_empty() {
            return None;
        }
        normalized.push('-');
        normalized.push_str(&qualifier.replace(|c: char| matches!(c, '-' | '_'), "."));
    }
    if let Some(build) = build {
        normalized.push('+');
        normalized.push_str(build);
    }
    Some(normalized)
}

/// An immutable tag binding a version to a commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseTag {
    pub name: String,
    pub commit: String,
}

/// Error categories surfaced in an aborted run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Production registry could not be queried or is inconsistent
    Preflight,

    /// Local test suite failed
    Validation,

    /// Build failed or produced an unusable artifact set
    Build,

    /// A registry rejected the upload or was unreachable
    Publish,

    /// Credential missing or bound to the wrong registry
    Credential,

    /// The package installed from staging failed its tests
    Verification,

    /// Tag exists and cannot be reconciled with this run
    TagConflict,

    /// Tag creation failed for any other reason
    Tag,

    /// Cancellation requested between stages
    Cancelled,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Preflight => "preflight_failure",
            FailureKind::Validation => "validation_failure",
            FailureKind::Build => "build_failure",
            FailureKind::Publish => "publish_failure",
            FailureKind::Credential => "credential_failure",
            FailureKind::Verification => "verification_failure",
            FailureKind::TagConflict => "tag_conflict",
            FailureKind::Tag => "tag_failure",
            FailureKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal report of a run: fully released or aborted at one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum RunResult {
    Released {
        version: String,
        tag: String,
    },
    Aborted {
        failed_stage: super::Stage,
        kind: FailureKind,
        detail: String,
    },
}

impl RunResult {
    pub fn is_released(&self) -> bool {
        matches!(self, RunResult::Released { .. })
    }

    /// The stage that ended the run, if it aborted
    pub fn failed_stage(&self) -> Option<super::Stage> {
        match self {
            RunResult::Aborted { failed_stage, .. } => Some(*failed_stage),
            RunResult::Released { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builds_prefixed_tag() {
        let request = ReleaseRequest::new("abc123", "1.2.0").unwrap();
        assert_eq!(request.version_string(), "1.2.0");
        assert_eq!(request.tag_name(), "v1.2.0");
    }

    #[test]
    fn test_request_with_empty_prefix() {
        let request = ReleaseRequest::with_tag_prefix("abc123", "0.3.1-rc.1", "").unwrap();
        assert_eq!(request.tag_name(), "0.3.1-rc.1");
    }

    #[test]
    fn test_request_validation() {
        assert_eq!(
            ReleaseRequest::new("", "1.0.0"),
            Err(RequestError::EmptySourceRef)
        );
        assert!(matches!(
            ReleaseRequest::new("abc 123", "1.0.0"),
            Err(RequestError::MalformedSourceRef(_))
        ));
        assert_eq!(
            ReleaseRequest::new("abc123", "  "),
            Err(RequestError::EmptyVersion)
        );
        assert!(matches!(
            ReleaseRequest::new("abc123", "one.two"),
            Err(RequestError::InvalidVersion { .. })
        ));
        assert!(matches!(
            ReleaseRequest::with_tag_prefix("abc123", "1.0.0", "release "),
            Err(RequestError::MalformedTagPrefix(_))
        ));
    }

    #[test]
    fn test_short_and_suffixed_versions_accepted() {
        let cases = [
            ("0.4", "0.4.0", "v0.4"),
            ("2", "2.0.0", "v2"),
            ("1.0.0rc1", "1.0.0-rc1", "v1.0.0rc1"),
            ("1.0.0.dev0", "1.0.0-dev0", "v1.0.0.dev0"),
            ("2.1.post_3", "2.1.0-post.3", "v2.1.post_3"),
            ("1.4+local.7", "1.4.0+local.7", "v1.4+local.7"),
        ];
        for (declared, semver, tag) in cases {
            let request = ReleaseRequest::new("abc123", declared).unwrap();
            assert_eq!(request.version().to_string(), semver, "{declared}");
            assert_eq!(request.version_string(), declared);
            assert_eq!(request.tag_name(), tag);
        }
    }

    #[test]
    fn test_malformed_versions_rejected() {
        for bad in ["abc", "1..2", "1.2.3.4", "1.", ".1", "v1.2.0", "1.2.3-", "01.2"] {
            match ReleaseRequest::new("abc123", bad) {
                Err(RequestError::InvalidVersion { version, .. }) => assert_eq!(version, bad),
                other => panic!("{bad} should be invalid, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_request_json_roundtrip() {
        let request = ReleaseRequest::with_tag_prefix("abc123", "1.0.0rc1", "release-").unwrap();
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"version\":\"1.0.0-rc1\""), "{json}");

        let parsed: ReleaseRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.tag_name(), "release-1.0.0rc1");
    }

    #[test]
    fn test_run_result_serialization() {
        let aborted = RunResult::Aborted {
            failed_stage: super::super::Stage::Verify,
            kind: FailureKind::Verification,
            detail: "ImportError".to_string(),
        };
        let json = serde_json::to_string(&aborted).unwrap();
        assert!(json.contains("\"status\":\"aborted\""));
        assert!(json.contains("\"failed_stage\":\"verify\""));

        let parsed: RunResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, aborted);
        assert_eq!(parsed.failed_stage(), Some(super::super::Stage::Verify));
    }
}
