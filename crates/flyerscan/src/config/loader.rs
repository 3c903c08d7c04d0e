use std::path::Path;

use crate::config::schema::Config;
use crate::error::ConfigError;

const SCHEMA_JSON: &str = include_str!("../../schema/config-v1.json");

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;

    log::debug!("Loading config from {:?}", path);
    load_config_from_str(&content)
}

pub fn load_config_from_str(content: &str) -> Result<Config, ConfigError> {
    let json_value: serde_json::Value = serde_json::from_str(content)?;

    validate_schema(&json_value)?;

    let config: Config = serde_json::from_value(json_value)?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_schema(json_value: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA_JSON).map_err(|e| ConfigError::Validation {
            message: format!("Invalid embedded schema JSON: {}", e),
        })?;

    let validator = jsonschema::validator_for(&schema).map_err(|e| ConfigError::Validation {
        message: format!("Failed to compile JSON schema: {}", e),
    })?;

    let errors: Vec<String> = validator
        .iter_errors(json_value)
        .map(|e| e.to_string())
        .collect();
    if !errors.is_empty() {
        return Err(ConfigError::SchemaValidation {
            errors: errors.join("; "),
        });
    }

    Ok(())
}

/// Semantic checks the schema cannot express. Also run on configs built in
/// code, which never pass through the schema.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.version != "1.0" {
        return Err(ConfigError::Validation {
            message: format!("Unsupported config version: {}", config.version),
        });
    }

    for pattern in &config.harvest.include_patterns {
        check_pattern("harvest.includePatterns", pattern)?;
    }
    for pattern in &config.harvest.exclude_patterns {
        check_pattern("harvest.excludePatterns", pattern)?;
    }
    if config.harvest.include_patterns.is_empty() {
        return Err(ConfigError::Validation {
            message: "harvest.includePatterns must not be empty".to_string(),
        });
    }

    let ranges: [(&str, u64); 5] = [
        ("harvest.scrollCycles", config.harvest.scroll_cycles as u64),
        ("harvest.maxImages", config.harvest.max_images as u64),
        ("orchestrator.workerCount", config.orchestrator.worker_count as u64),
        ("orchestrator.maxAttempts", config.orchestrator.max_attempts as u64),
        ("logChannel.windowSize", config.log_channel.window_size as u64),
    ];
    for (field, value) in ranges {
        if value < 1 {
            return Err(ConfigError::Validation {
                message: format!("{} must be at least 1", field),
            });
        }
    }

    if config.orchestrator.max_backoff_ms < config.orchestrator.initial_backoff_ms {
        return Err(ConfigError::Validation {
            message: "orchestrator.maxBackoffMs must not be smaller than initialBackoffMs"
                .to_string(),
        });
    }

    if url::Url::parse(&config.classifier.endpoint).is_err() {
        return Err(ConfigError::Validation {
            message: format!(
                "classifier.endpoint is not a valid URL: {}",
                config.classifier.endpoint
            ),
        });
    }

    Ok(())
}

fn check_pattern(field: &'static str, pattern: &str) -> Result<(), ConfigError> {
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| ConfigError::InvalidPattern {
            field,
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })
}
