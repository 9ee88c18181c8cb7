use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Capacity of the outbound request queue when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// `[host]` table of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HostSection {
    /// Program and arguments of the host process.
    pub command: Option<Vec<String>>,
}

/// One layer of configuration as written in `workbridge.toml`.
///
/// Every field is optional so layers can be merged; unset fields fall back
/// to the layer below.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsFile {
    pub host: Option<HostSection>,
    pub queue_capacity: Option<usize>,
    pub init_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

impl SettingsFile {
    pub fn from_toml(contents: &str, path: &Path) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> ConfigResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents, path)
    }
}

/// Resolved settings for one bridge instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeSettings {
    /// Host process command line, used by `Bridge::spawn_process`.
    pub host_command: Vec<String>,
    pub queue_capacity: usize,
    /// Upper bound on the startup handshake. `None` waits indefinitely.
    pub init_timeout: Option<Duration>,
    /// Upper bound on a single request. `None` waits indefinitely.
    pub request_timeout: Option<Duration>,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            host_command: Vec::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            init_timeout: None,
            request_timeout: None,
        }
    }
}

impl BridgeSettings {
    /// Resolve a (merged) settings layer, validating it.
    pub fn from_file(file: SettingsFile) -> ConfigResult<Self> {
        let defaults = Self::default();

        let queue_capacity = file.queue_capacity.unwrap_or(defaults.queue_capacity);
        if queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            host_command: file
                .host
                .and_then(|host| host.command)
                .unwrap_or(defaults.host_command),
            queue_capacity,
            init_timeout: seconds("init_timeout_secs", file.init_timeout_secs)?,
            request_timeout: seconds("request_timeout_secs", file.request_timeout_secs)?,
        })
    }
}

fn seconds(field: &'static str, value: Option<u64>) -> ConfigResult<Option<Duration>> {
    match value {
        Some(0) => Err(ConfigError::Invalid {
            field,
            reason: "must be positive; omit it to disable the timeout".to_string(),
        }),
        other => Ok(other.map(Duration::from_secs)),
    }
}

/// Merge layers in order; later layers take precedence.
pub fn merge_all(layers: &[Option<SettingsFile>]) -> Option<SettingsFile> {
    layers.iter().cloned().reduce(merge_settings).flatten()
}

/// Merge two layers, preferring values from `primary` over `fallback`.
pub fn merge_settings(
    fallback: Option<SettingsFile>,
    primary: Option<SettingsFile>,
) -> Option<SettingsFile> {
    match (fallback, primary) {
        (None, None) => None,
        (Some(settings), None) | (None, Some(settings)) => Some(settings),
        (Some(fallback), Some(primary)) => Some(SettingsFile {
            host: match (fallback.host, primary.host) {
                (Some(fallback), Some(primary)) => Some(HostSection {
                    command: primary.command.or(fallback.command),
                }),
                (fallback, primary) => primary.or(fallback),
            },
            queue_capacity: primary.queue_capacity.or(fallback.queue_capacity),
            init_timeout_secs: primary.init_timeout_secs.or(fallback.init_timeout_secs),
            request_timeout_secs: primary.request_timeout_secs.or(fallback.request_timeout_secs),
        }),
    }
}

/// Load settings: user config, then `explicit` on top.
///
/// A missing user config is fine; a missing explicit file is an error.
pub fn load_settings(explicit: Option<&Path>) -> ConfigResult<BridgeSettings> {
    let user = super::user::load_user_config()?;
    let explicit = explicit.map(SettingsFile::load).transpose()?;

    let merged = merge_all(&[user, explicit]).unwrap_or_default();
    BridgeSettings::from_file(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io::Write;

    #[test]
    fn parses_full_file() {
        let file = SettingsFile::from_toml(
            r#"
            queue_capacity = 8
            init_timeout_secs = 30
            request_timeout_secs = 600

            [host]
            command = ["python3", "-m", "host"]
            "#,
            Path::new("workbridge.toml"),
        )
        .unwrap();

        let settings = BridgeSettings::from_file(file).unwrap();
        assert_eq!(settings.host_command, vec!["python3", "-m", "host"]);
        assert_eq!(settings.queue_capacity, 8);
        assert_eq!(settings.init_timeout, Some(Duration::from_secs(30)));
        assert_eq!(settings.request_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn empty_file_gives_defaults() {
        let file = SettingsFile::from_toml("", Path::new("workbridge.toml")).unwrap();
        assert_eq!(BridgeSettings::from_file(file).unwrap(), BridgeSettings::default());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SettingsFile::from_toml("queue_size = 3", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[rstest]
    #[case::zero_capacity("queue_capacity = 0", "queue_capacity")]
    #[case::zero_init_timeout("init_timeout_secs = 0", "init_timeout_secs")]
    #[case::zero_request_timeout("request_timeout_secs = 0", "request_timeout_secs")]
    fn zero_values_are_invalid(#[case] toml: &str, #[case] field: &str) {
        let file = SettingsFile::from_toml(toml, Path::new("workbridge.toml")).unwrap();
        let err = BridgeSettings::from_file(file).unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { field: f, .. } if f == field),
            "{:?}",
            err
        );
    }

    #[test]
    fn primary_layer_overrides_fallback_per_field() {
        let fallback = SettingsFile {
            host: Some(HostSection {
                command: Some(vec!["user-host".into()]),
            }),
            queue_capacity: Some(4),
            init_timeout_secs: Some(10),
            request_timeout_secs: None,
        };
        let primary = SettingsFile {
            host: Some(HostSection { command: None }),
            queue_capacity: Some(64),
            ..Default::default()
        };

        let merged = merge_all(&[Some(fallback), None, Some(primary)]).unwrap();
        assert_eq!(
            merged.host.unwrap().command,
            Some(vec!["user-host".to_string()])
        );
        assert_eq!(merged.queue_capacity, Some(64));
        assert_eq!(merged.init_timeout_secs, Some(10));
        assert_eq!(merged.request_timeout_secs, None);
    }

    #[test]
    fn merge_all_of_nothing_is_none() {
        assert_eq!(merge_all(&[None, None]), None);
    }

    #[test]
    fn load_reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "queue_capacity = 2").unwrap();

        let loaded = SettingsFile::load(file.path()).unwrap();
        assert_eq!(loaded.queue_capacity, Some(2));
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = SettingsFile::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
