// Pipeline configuration

mod loader;
mod settings;

pub use loader::{default_config_path, load, load_from};
pub use settings::{BackendKind, PipelineConfig, TranslatorConfig};
