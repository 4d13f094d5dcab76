use super::types::*;
use crate::config::{expand_env_vars, expand_tilde, ENV_VAR_PATTERN};
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation failed:\n{}", .0.join("\n"))]
    ValidationList(Vec<String>),

    #[error("validation failed: {0}")]
    Validation(String),
}

pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    use std::io::Read;

    let mut file = File::open(path).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to open config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut yaml_string = String::new();
    file.read_to_string(&mut yaml_string).map_err(|e| {
        ConfigError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read config file '{}': {}", path.display(), e),
        ))
    })?;

    let mut config = parse_config(&yaml_string).map_err(|e| match e {
        ConfigError::YamlParse(e) => ConfigError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("in file '{}': {}", path.display(), e),
        )),
        other => other,
    })?;

    expand_paths(&mut config);

    Ok(config)
}

/// Parse and validate config text. Environment variables are expanded first.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    let yaml = expand_env_vars(yaml);
    check_unexpanded_vars(&yaml)?;

    let config: Config = serde_yaml::from_str(&yaml)?;
    validate_config(&config)?;
    Ok(config)
}

/// Checks for unexpanded environment variables and returns a helpful error
fn check_unexpanded_vars(yaml_string: &str) -> Result<(), ConfigError> {
    let re = Regex::new(ENV_VAR_PATTERN)
        .map_err(|e| ConfigError::Validation(format!("invalid env var pattern: {}", e)))?;
    let mut unexpanded_vars: Vec<String> = re
        .captures_iter(yaml_string)
        .filter_map(|cap| cap.get(1).map(|m| m.as_str().to_string()))
        .collect();

    if unexpanded_vars.is_empty() {
        return Ok(());
    }

    unexpanded_vars.sort();
    unexpanded_vars.dedup();

    Err(ConfigError::Validation(format!(
        "Environment variables are not set: {}\n\
         \n\
         Set them before starting, or replace the $env{{...}} references in the config file.",
        unexpanded_vars.join(", ")
    )))
}

/// Expands tilde (~) in all PathBuf fields in the config.
fn expand_paths(config: &mut Config) {
    config.broker.path = expand_tilde(&config.broker.path);
    config.broker.offsets_path = expand_tilde(&config.broker.offsets_path);
    config.warehouse.path = expand_tilde(&config.warehouse.path);
    config.warehouse.dead_letter_path = config
        .warehouse
        .dead_letter_path
        .as_deref()
        .map(expand_tilde);
}

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let mut errors = Vec::new();

    validate_broker(&config.broker, &mut errors);
    validate_warehouse(&config.warehouse, &mut errors);

    if config.workers.pool_size == 0 {
        errors.push("workers.pool_size must be at least 1".to_string());
    }
    if config.queue.capacity == 0 {
        errors.push("queue.capacity must be at least 1".to_string());
    }
    if config.committer.queue_capacity == 0 {
        errors.push("committer.queue_capacity must be at least 1".to_string());
    }
    if config.committer.ack_timeout.is_zero() {
        errors.push("committer.ack_timeout must be greater than zero".to_string());
    }
    if config.committer.idle_sleep >= config.committer.ack_timeout {
        errors.push("committer.idle_sleep must be shorter than committer.ack_timeout".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError::ValidationList(errors))
    }
}

fn validate_broker(broker: &BrokerConfig, errors: &mut Vec<String>) {
    if broker.topic.is_empty() {
        errors.push("broker.topic cannot be empty".to_string());
    }
    if broker.max_poll_records == 0 {
        errors.push("broker.max_poll_records must be at least 1".to_string());
    }
}

fn validate_warehouse(warehouse: &WarehouseConfig, errors: &mut Vec<String>) {
    for (field, value) in [
        ("dataset", &warehouse.dataset),
        ("table", &warehouse.table),
        ("location", &warehouse.location),
    ] {
        if value.is_empty() {
            errors.push(format!("warehouse.{} cannot be empty", field));
        }
    }

    for (field, value) in [("dataset", &warehouse.dataset), ("table", &warehouse.table)] {
        if !value.is_empty() && !is_identifier(value) {
            errors.push(format!(
                "warehouse.{} '{}' must contain only letters, digits and underscores",
                field, value
            ));
        }
    }

    if warehouse.columns.is_empty() {
        errors.push("warehouse.columns must contain at least one column".to_string());
    }

    let mut names = HashSet::new();
    for (i, column) in warehouse.columns.iter().enumerate() {
        if column.name.is_empty() {
            errors.push(format!("warehouse.columns[{}]: name cannot be empty", i));
        } else if !is_identifier(&column.name) {
            errors.push(format!(
                "warehouse.columns[{}]: name '{}' must contain only letters, digits and underscores",
                i, column.name
            ));
        } else if !names.insert(column.name.as_str()) {
            errors.push(format!(
                "warehouse.columns[{}]: duplicate column name '{}'",
                i, column.name
            ));
        }
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
