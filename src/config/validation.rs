use std::{collections::HashSet, net::SocketAddr};

use crate::config::models::{ClientConfig, GatewayConfig, InstanceConfig};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Duplicate instance name '{name}'")]
    DuplicateInstance { name: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the entire gateway configuration, collecting every problem found.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        let mut seen = HashSet::new();
        for (index, instance) in config.instances.iter().enumerate() {
            if let Err(mut instance_errors) = Self::validate_instance(index, instance) {
                errors.append(&mut instance_errors);
            }
            if !instance.name.is_empty() && !seen.insert(instance.name.as_str()) {
                errors.push(ValidationError::DuplicateInstance {
                    name: instance.name.clone(),
                });
            }
        }

        if let Err(mut client_errors) = Self::validate_client_config(&config.client) {
            errors.append(&mut client_errors);
        }

        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&config.logging.level) {
            errors.push(ValidationError::InvalidField {
                field: "logging.level".to_string(),
                message: e.to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    /// Validate listen address format
    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        if address.parse::<SocketAddr>().is_err() {
            return Err(ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: "Must be in format 'IP:PORT' (e.g., '127.0.0.1:8000' or '0.0.0.0:8000')"
                    .to_string(),
            });
        }
        Ok(())
    }

    fn validate_instance(
        index: usize,
        instance: &InstanceConfig,
    ) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let label = if instance.name.is_empty() {
            format!("instances[{index}]")
        } else {
            format!("instance '{}'", instance.name)
        };

        if instance.name.trim().is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("instances[{index}].name"),
            });
        }

        if let Err(e) = Self::validate_url(&instance.url, &format!("{label} url")) {
            errors.push(e);
        }

        if instance.api_key.is_empty() {
            errors.push(ValidationError::MissingField {
                field: format!("{label} api_key"),
            });
        } else if http::HeaderValue::from_str(&instance.api_key).is_err() {
            errors.push(ValidationError::InvalidField {
                field: format!("{label} api_key"),
                message: "Credential must be a valid header value".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_url(url: &str, field: &str) -> ValidationResult<()> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::InvalidField {
                field: field.to_string(),
                message: format!("URL must start with http:// or https://, got: {url}"),
            });
        }
        url::Url::parse(url).map_err(|e| ValidationError::InvalidField {
            field: field.to_string(),
            message: format!("Invalid URL '{url}': {e}"),
        })?;
        Ok(())
    }

    fn validate_client_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        let positive = [
            ("client.request_timeout_secs", config.request_timeout_secs),
            ("client.connect_timeout_secs", config.connect_timeout_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                errors.push(ValidationError::InvalidField {
                    field: field.to_string(),
                    message: "Must be greater than 0".to_string(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        let mut message = format!("Found {} configuration error(s):\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
