use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;
use serde::Deserialize;

use crate::env;
use crate::error::ConfigError;
use crate::policy::EligibilityPolicy;

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// `config.json` as written by operators.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    #[serde(rename = "serverURL")]
    server_url: String,
    poll_interval: String,
    policy: String,
    #[serde(default)]
    current_version: u64,
    #[serde(default)]
    add_missing: bool,
    resources_dir: Option<String>,
    local_manifest: Option<String>,
    remote_copy: Option<String>,
    log_file: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// Validated, immutable settings handed to the engine and scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub server_url: String,
    pub poll_interval: Duration,
    pub policy: EligibilityPolicy,
    pub resources_dir: PathBuf,
    pub local_manifest: PathBuf,
    pub remote_copy: Option<PathBuf>,
    pub log_file: PathBuf,
    pub request_timeout: Duration,
}

impl AgentConfig {
    /// Load `path`, resolving relative paths against `base_dir`.
    pub fn load(path: &Path, base_dir: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: ConfigFile =
            serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_file(file, base_dir)
    }

    /// Load `config_path`, or `config.json` next to the executable when none
    /// is given. Relative paths inside resolve against the executable dir
    /// either way.
    pub fn load_for_executable(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let exe_dir = env::executable_dir().map_err(ConfigError::ExecutableDir)?;
        match config_path {
            Some(path) => Self::load(path, &exe_dir),
            None => Self::load(&exe_dir.join(env::CONFIG_FILE), &exe_dir),
        }
    }

    fn from_file(file: ConfigFile, base_dir: &Path) -> Result<Self, ConfigError> {
        validate_url(&file.server_url)?;
        let poll_interval = parse_duration(&file.poll_interval)?;

        let policy = match file.policy.trim().to_ascii_lowercase().as_str() {
            "gate" => EligibilityPolicy::Gate {
                current_version: file.current_version,
            },
            "diff" => EligibilityPolicy::Diff {
                add_missing: file.add_missing,
            },
            _ => return Err(ConfigError::InvalidPolicy { value: file.policy }),
        };

        let resources_dir = file
            .resources_dir
            .as_deref()
            .map(|dir| env::resolve(base_dir, dir))
            .unwrap_or_else(|| env::default_resources_dir(base_dir));
        let local_manifest = file
            .local_manifest
            .as_deref()
            .map(|p| env::resolve(base_dir, p))
            .unwrap_or_else(|| resources_dir.join(env::LOCAL_MANIFEST_FILE));
        let remote_copy = match file.remote_copy.as_deref() {
            Some("") => None,
            Some(p) => Some(env::resolve(base_dir, p)),
            None if !policy.tracks_local_manifest() => {
                Some(resources_dir.join(env::REMOTE_COPY_FILE))
            }
            None => None,
        };
        let log_file = file
            .log_file
            .as_deref()
            .map(|p| env::resolve(base_dir, p))
            .unwrap_or_else(|| base_dir.join(env::EVENT_LOG_FILE));

        Ok(Self {
            server_url: file.server_url,
            poll_interval,
            policy,
            resources_dir,
            local_manifest,
            remote_copy,
            log_file,
            request_timeout: Duration::from_secs(
                file.request_timeout_secs
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
            ),
        })
    }
}

fn validate_url(raw: &str) -> Result<(), ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_owned(),
        message: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_owned(),
            message: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(())
}

/// Parse a duration such as `30s`, `5m`, `1h30m` or `250ms`.
pub fn parse_duration(value: &str) -> Result<Duration, ConfigError> {
    let invalid = |message: &str| ConfigError::InvalidInterval {
        value: value.to_owned(),
        message: message.to_owned(),
    };

    let mut rest = value.trim();
    if rest.is_empty() {
        return Err(invalid("empty duration"));
    }

    let mut total = Duration::ZERO;
    while !rest.is_empty() {
        let digits = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .ok_or_else(|| invalid("missing unit"))?;
        if digits == 0 {
            return Err(invalid("expected a number"));
        }
        let amount: f64 = rest[..digits]
            .parse()
            .map_err(|_| invalid("bad number"))?;
        rest = &rest[digits..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit: u64 = match &rest[..unit_len] {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" => 1_000_000_000,
            "m" => 60 * 1_000_000_000,
            "h" => 3_600 * 1_000_000_000,
            _ => return Err(invalid("unknown unit")),
        };
        rest = &rest[unit_len..];
        total += Duration::from_nanos((amount * nanos_per_unit as f64).round() as u64);
    }

    if total.is_zero() {
        return Err(invalid("interval must be greater than zero"));
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.json");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn parses_go_style_durations() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn rejects_bad_durations() {
        for bad in ["", "10", "s", "5 minutes", "3d", "0s"] {
            assert!(
                matches!(parse_duration(bad), Err(ConfigError::InvalidInterval { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn explicit_config_resolves_against_executable_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"serverURL":"http://updates.local/m.json","pollInterval":"1m","policy":"diff","resourcesDir":"res"}"#,
        );

        let config = AgentConfig::load_for_executable(Some(&path)).unwrap();
        let exe_dir = env::executable_dir().unwrap();
        assert_eq!(config.resources_dir, exe_dir.join("res"));
        assert_ne!(config.resources_dir, dir.path().join("res"));
    }

    #[test]
    fn loads_gate_config_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"serverURL":"http://updates.local/preload.json","pollInterval":"10m","currentVersion":7,"policy":"gate"}"#,
        );

        let config = AgentConfig::load(&path, dir.path()).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(600));
        assert_eq!(config.policy, EligibilityPolicy::Gate { current_version: 7 });
        assert_eq!(config.resources_dir, env::default_resources_dir(dir.path()));
        assert_eq!(
            config.remote_copy,
            Some(config.resources_dir.join("preload.json"))
        );
        assert_eq!(config.log_file, dir.path().join("update.log"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn loads_diff_config_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{
                "serverURL": "https://updates.local/manifest.json",
                "pollInterval": "30s",
                "policy": "diff",
                "addMissing": true,
                "resourcesDir": "res",
                "localManifest": "state/local.json",
                "remoteCopy": "",
                "requestTimeoutSecs": 5
            }"#,
        );

        let config = AgentConfig::load(&path, dir.path()).unwrap();
        assert_eq!(config.policy, EligibilityPolicy::Diff { add_missing: true });
        assert_eq!(config.resources_dir, dir.path().join("res"));
        assert_eq!(config.local_manifest, dir.path().join("state/local.json"));
        assert_eq!(config.remote_copy, None);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
    }

    #[test]
    fn policy_must_be_named() {
        let dir = tempfile::tempdir().unwrap();
        let missing = write_config(
            dir.path(),
            r#"{"serverURL":"http://h/m.json","pollInterval":"1m"}"#,
        );
        assert!(matches!(
            AgentConfig::load(&missing, dir.path()),
            Err(ConfigError::Parse { .. })
        ));

        let unknown = write_config(
            dir.path(),
            r#"{"serverURL":"http://h/m.json","pollInterval":"1m","policy":"latest"}"#,
        );
        assert!(matches!(
            AgentConfig::load(&unknown, dir.path()),
            Err(ConfigError::InvalidPolicy { .. })
        ));
    }

    #[test]
    fn rejects_bad_server_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(
            dir.path(),
            r#"{"serverURL":"ftp://h/m.json","pollInterval":"1m","policy":"diff"}"#,
        );
        assert!(matches!(
            AgentConfig::load(&path, dir.path()),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn missing_file_is_read_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AgentConfig::load(&dir.path().join("config.json"), dir.path()),
            Err(ConfigError::Read { .. })
        ));
    }
}
