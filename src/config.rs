//! Bridge configuration.
//!
//! Settings are layered: programmed defaults < user config
//! (`$XDG_CONFIG_HOME/workbridge/workbridge.toml`) < an explicit file.

pub mod settings;
pub mod user;

pub use settings::{
    BridgeSettings, ConfigError, ConfigResult, DEFAULT_QUEUE_CAPACITY, HostSection, SettingsFile,
    load_settings, merge_all, merge_settings,
};
pub use user::{load_user_config, user_config_path};
