use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const BUILD_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Build identity reported by the endpoint's version call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildVersion {
    pub git_commit_sha: String,
    /// Unix seconds, 0 when the build did not stamp a parsable time.
    pub build_timestamp: i64,
}

/// Parse a `YYYY-MM-DDTHH:MM:SS` build stamp, read as UTC.
pub fn parse_build_timestamp(raw: &str) -> Result<i64, chrono::ParseError> {
    NaiveDateTime::parse_from_str(raw, BUILD_TIMESTAMP_FORMAT)
        .map(|stamp| stamp.and_utc().timestamp())
}

impl BuildVersion {
    pub fn from_parts(git_commit_sha: &str, build_timestamp: &str) -> Self {
        Self {
            git_commit_sha: git_commit_sha.to_string(),
            build_timestamp: parse_build_timestamp(build_timestamp).unwrap_or(0),
        }
    }

    /// Identity of the running binary, taken from the `GIT_COMMIT_SHA` and
    /// `BUILD_TIMESTAMP` variables present at compile time.
    pub fn current() -> &'static BuildVersion {
        static CURRENT: OnceLock<BuildVersion> = OnceLock::new();
        CURRENT.get_or_init(|| {
            Self::from_parts(
                option_env!("GIT_COMMIT_SHA").unwrap_or("n/a"),
                option_env!("BUILD_TIMESTAMP").unwrap_or("n/a"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_build_timestamp() {
        assert_eq!(
            parse_build_timestamp("2024-05-19T13:17:37").unwrap(),
            1716124657
        );
        assert!(parse_build_timestamp("invalid").is_err());
    }

    #[test]
    fn test_from_parts() {
        let version = BuildVersion::from_parts("test_commit", "2024-05-19T13:17:37");
        assert_eq!(version.git_commit_sha, "test_commit");
        assert_eq!(version.build_timestamp, 1716124657);

        let unstamped = BuildVersion::from_parts("n/a", "n/a");
        assert_eq!(unstamped.build_timestamp, 0);
    }

    #[test]
    fn test_current_is_stable() {
        assert!(std::ptr::eq(BuildVersion::current(), BuildVersion::current()));
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_value(BuildVersion::from_parts("abc", "n/a")).unwrap();
        assert_eq!(json["gitCommitSha"], "abc");
        assert_eq!(json["buildTimestamp"], 0);
    }
}
