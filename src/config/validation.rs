use crate::config::types::{ChecksumConfig, Config, CrawlerConfig, DataStoreConfig};
use crate::reference::normalize_reference;
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_data_store_config(&config.data_store)?;
    validate_checksum_config(&config.checksum)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    validate_crawler_id(&config.id)?;

    if config.num_threads < 1 || config.num_threads > 100 {
        return Err(ConfigError::Validation(format!(
            "num_threads must be between 1 and 100, got {}",
            config.num_threads
        )));
    }

    if config.work_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "work_dir cannot be empty".to_string(),
        ));
    }

    for reference in &config.start_references {
        normalize_reference(reference).map_err(|e| {
            ConfigError::Validation(format!("Invalid start reference '{}': {}", reference, e))
        })?;
    }

    Ok(())
}

/// Crawler ids name a directory, so they must be non-empty and path-safe
fn validate_crawler_id(id: &str) -> Result<(), ConfigError> {
    if id.is_empty() {
        return Err(ConfigError::Validation("crawler id cannot be empty".to_string()));
    }

    if !id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
        || id.starts_with('.')
    {
        return Err(ConfigError::Validation(format!(
            "crawler id must contain only alphanumeric characters, '-', '_' or '.', got '{}'",
            id
        )));
    }

    Ok(())
}

/// Validates data-store configuration
fn validate_data_store_config(config: &DataStoreConfig) -> Result<(), ConfigError> {
    match config {
        DataStoreConfig::Log {
            path,
            compaction_threshold,
        } => {
            if matches!(path.as_deref(), Some("")) {
                return Err(ConfigError::Validation(
                    "data-store path cannot be empty".to_string(),
                ));
            }

            if *compaction_threshold < 1 {
                return Err(ConfigError::Validation(format!(
                    "compaction_threshold must be >= 1, got {}",
                    compaction_threshold
                )));
            }
        }
        DataStoreConfig::Sqlite { connection } => {
            if matches!(connection.as_deref(), Some("")) {
                return Err(ConfigError::Validation(
                    "data-store connection cannot be empty".to_string(),
                ));
            }
        }
    }

    Ok(())
}

/// Validates checksum configuration
fn validate_checksum_config(config: &ChecksumConfig) -> Result<(), ConfigError> {
    for field in &config.metadata_fields {
        if field.trim().is_empty() {
            return Err(ConfigError::Validation(
                "metadata checksum field names cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}
