// src/system/platform.rs

use std::collections::BTreeMap;
use std::path::Path;

use super::executor;

/// Environment variables whose presence marks a CI run.
const CI_MARKERS: &[&str] = &[
    "CONTINUOUS_INTEGRATION",
    "BUILD_NUMBER",
    "RUN_ID",
    "GITHUB_ACTIONS",
    "GITLAB_CI",
    "TF_BUILD",
    "BUILDKITE",
    "CIRCLECI",
    "TRAVIS",
    "JENKINS_URL",
    "TEAMCITY_VERSION",
    "APPVEYOR",
    "CODEBUILD_BUILD_ID",
];

/// Returns `true` when the current process looks like it runs inside a CI service.
pub fn detect_ci() -> bool {
    detect_ci_with(|name| std::env::var(name).ok())
}

fn detect_ci_with(lookup: impl Fn(&str) -> Option<String>) -> bool {
    if let Some(value) = lookup("CI") {
        return !matches!(value.trim().to_ascii_lowercase().as_str(), "false" | "0");
    }
    CI_MARKERS.iter().any(|name| lookup(name).is_some())
}

/// A parsed `major.minor.patch` runtime version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl RuntimeVersion {
    /// Parses output such as `v20.11.1` or `20.11`. Missing components default to zero.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let core = trimmed.split(['-', '+', ' ']).next().unwrap_or(trimmed);
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self { major, minor, patch })
    }
}

/// The host facts that platform variant keys are matched against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformInfo {
    pub os: String,
    pub os_alias: Option<String>,
    pub arch: String,
    pub arch_alias: Option<String>,
    /// Runtime name and its version, when the runtime could be probed.
    pub runtime: Option<(String, RuntimeVersion)>,
}

impl PlatformInfo {
    /// Describes the running host. `runtime` names the program probed with `--version`.
    pub fn detect(runtime: Option<&str>, cwd: &Path) -> Self {
        let mut info = Self::for_host(std::env::consts::OS, std::env::consts::ARCH);
        info.runtime = runtime
            .filter(|name| !name.is_empty())
            .and_then(|name| probe_runtime(name, cwd).map(|v| (name.to_string(), v)));
        info
    }

    /// Builds the info for an OS/arch pair, without a runtime.
    pub fn for_host(os: &str, arch: &str) -> Self {
        let os_alias = match os {
            "windows" => Some("win32"),
            "macos" => Some("darwin"),
            _ => None,
        };
        let arch_alias = match arch {
            "x86_64" => Some("x64"),
            "aarch64" => Some("arm64"),
            "x86" => Some("ia32"),
            _ => None,
        };
        Self {
            os: os.to_string(),
            os_alias: os_alias.map(str::to_string),
            arch: arch.to_string(),
            arch_alias: arch_alias.map(str::to_string),
            runtime: None,
        }
    }

    /// Sets the runtime explicitly.
    pub fn with_runtime(mut self, name: &str, version: RuntimeVersion) -> Self {
        self.runtime = Some((name.to_string(), version));
        self
    }

    /// The variant keys to probe, most specific first.
    pub fn candidate_keys(&self) -> Vec<String> {
        let mut keys = vec![format!("_{}", self.os)];
        keys.extend(self.os_alias.iter().map(|alias| format!("_{alias}")));
        keys.push(format!("_{}", self.arch));
        keys.extend(self.arch_alias.iter().map(|alias| format!("_{alias}")));
        if let Some((name, v)) = &self.runtime {
            keys.push(format!("_{name}{}_{}_{}", v.major, v.minor, v.patch));
            keys.push(format!("_{name}{}_{}", v.major, v.minor));
            keys.push(format!("_{name}{}", v.major));
        }
        keys
    }
}

fn probe_runtime(name: &str, cwd: &Path) -> Option<RuntimeVersion> {
    let command = format!("{name} --version");
    match executor::execute_and_capture_output(&command, cwd, &BTreeMap::new()) {
        Ok(output) => RuntimeVersion::parse(&output),
        Err(e) => {
            log::debug!("Runtime '{}' could not be probed: {}", name, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ci_detection() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            move |name: &str| {
                pairs
                    .iter()
                    .find(|(k, _)| *k == name)
                    .map(|(_, v)| v.to_string())
            }
        };
        assert!(detect_ci_with(env(&[("CI", "true")])));
        assert!(!detect_ci_with(env(&[("CI", "false")])));
        assert!(detect_ci_with(env(&[("GITHUB_ACTIONS", "true")])));
        assert!(!detect_ci_with(env(&[])));
    }

    #[test]
    fn test_runtime_version_parsing() {
        assert_eq!(
            RuntimeVersion::parse("v20.11.1\n"),
            Some(RuntimeVersion { major: 20, minor: 11, patch: 1 })
        );
        assert_eq!(
            RuntimeVersion::parse("18"),
            Some(RuntimeVersion { major: 18, minor: 0, patch: 0 })
        );
        assert_eq!(RuntimeVersion::parse("not a version"), None);
    }

    #[test]
    fn test_candidate_keys_order() {
        let info = PlatformInfo::for_host("macos", "aarch64").with_runtime(
            "node",
            RuntimeVersion { major: 20, minor: 11, patch: 1 },
        );
        assert_eq!(
            info.candidate_keys(),
            vec![
                "_macos",
                "_darwin",
                "_aarch64",
                "_arm64",
                "_node20_11_1",
                "_node20_11",
                "_node20",
            ]
        );
    }
}
