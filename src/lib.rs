pub mod bridge;
pub mod config;
pub mod error;

pub use bridge::{Bridge, BridgeState};
pub use config::BridgeSettings;
pub use error::{BridgeError, BridgeResult};
