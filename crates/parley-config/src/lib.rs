pub mod loader;
pub mod model;

pub use loader::{API_KEY_ENV, ConfigLoader, config_dir};
pub use model::{AppConfig, ModelConfig, ProviderConfig};
