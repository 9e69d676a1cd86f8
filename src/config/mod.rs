// Configuration management module
// TOML settings plus a human readable view of the effective configuration

pub mod display;
pub mod settings;


pub use display::{render_config, show_config};
pub use settings::{
    Config, ConfigError, DocumentsConfig, GenerationConfig, OllamaConfig, PromptConfig,
    StorageConfig,
};
