//! Unit tests for the logging subsystem.

use std::path::PathBuf;

use super::types::*;
use super::*;

#[test]
fn test_logger_config_builder_pattern() {
    let config = LoggerConfig::new("test-service".to_string())
        .with_json_logging(true)
        .with_file_logging(FileLoggingConfig::new(
            PathBuf::from("/tmp/logs"),
            "sluice".to_string(),
        ));

    assert_eq!(config.service_name, "test-service");
    assert!(config.stdout_config.json_format);
    let file_config = config.file_logging_config.unwrap();
    assert_eq!(file_config.file_name_prefix, "sluice");
    assert!(!file_config.json_format);
}

#[test]
fn test_file_logging_config_builders() {
    let config = FileLoggingConfig::new(PathBuf::from("/var/log"), "node".to_string())
        .with_rotation(Rotation::HOURLY)
        .with_json_format(true);

    assert_eq!(config.rotation, Rotation::HOURLY);
    assert!(config.json_format);
}

#[test]
fn test_format_service_name() {
    assert_eq!(format_service_name("sluice", None), "sluice");
    assert_eq!(format_service_name("sluice", Some("dev")), "sluice%dev");
}
