pub mod loader;
pub mod models;
pub mod validation;

pub use loader::{ConfigOrigin, ConfigSources, load_config, load_config_file, load_config_from};
pub use models::*;
pub use validation::{ConfigValidator, ValidationError, ValidationResult};
