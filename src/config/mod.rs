pub mod config_manager;
pub mod policy_adapter;

pub use config_manager::{ConfigManager, IntakeSettings};
pub use policy_adapter::{ConfigError, FilePolicyAdapter, PolicyAdapter};
