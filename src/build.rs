//! Build metadata, logged at startup and served by `GetVersion`.

use serde::Serialize;

/// Description of the running binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildDescription {
    /// Crate version.
    pub version: &'static str,
    /// Source commit, when provided at build time via `DSS_BUILD_COMMIT`.
    pub commit: Option<&'static str>,
    /// Build host, when provided at build time via `DSS_BUILD_HOST`.
    pub host: Option<&'static str>,
}

impl BuildDescription {
    /// `v<version>` with the short commit appended when known.
    #[must_use]
    pub fn version_string(&self) -> String {
        match self.commit {
            Some(commit) => {
                let short = commit.get(..7).unwrap_or(commit);
                format!("v{}-{short}", self.version)
            }
            None => format!("v{}", self.version),
        }
    }
}

/// Describe this build.
#[must_use]
pub fn describe() -> BuildDescription {
    BuildDescription {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("DSS_BUILD_COMMIT").filter(|c| !c.is_empty()),
        host: option_env!("DSS_BUILD_HOST").filter(|h| !h.is_empty()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_appends_short_commit() {
        let desc = BuildDescription {
            version: "1.2.3",
            commit: Some("0123456789abcdef"),
            host: None,
        };
        assert_eq!(desc.version_string(), "v1.2.3-0123456");

        let desc = BuildDescription { commit: None, ..desc };
        assert_eq!(desc.version_string(), "v1.2.3");
    }

    #[test]
    fn describe_uses_package_version() {
        assert_eq!(describe().version, env!("CARGO_PKG_VERSION"));
    }
}
