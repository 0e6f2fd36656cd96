//! Integration tests for EngineConfig::from_env() and LogFormat::from_env().
//!
//! Environment variables are process-global, so every test here runs serially
//! and restores the variables it touched.

use std::env;
use std::time::Duration;

use serial_test::serial;
use statehouse::config::EngineConfig;
use statehouse::telemetry::LogFormat;

/// All environment variables read by EngineConfig::from_env().
const ALL_CONFIG_ENV_VARS: &[&str] = &[
    "PARTITION_ID",
    "PARTITION_COUNT",
    "CONSISTENCY_CHECKS_PRECONDITIONS",
    "CONSISTENCY_CHECKS_FOREIGN_KEYS",
    "REDISTRIBUTION_INTERVAL_MS",
    "MAX_REDISTRIBUTION_INTERVAL_MS",
    "ENABLE_PARTITION_METRICS",
    "LOG_FORMAT",
];

/// Run `f` with exactly `vars` set among the config variables.
fn with_env_vars<F, R>(vars: &[(&str, &str)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let originals: Vec<_> = ALL_CONFIG_ENV_VARS
        .iter()
        .map(|k| (*k, env::var(*k).ok()))
        .collect();

    for key in ALL_CONFIG_ENV_VARS {
        unsafe { env::remove_var(key) };
    }
    for (key, value) in vars {
        unsafe { env::set_var(key, value) };
    }

    let result = f();

    for (key, original) in originals {
        match original {
            Some(v) => unsafe { env::set_var(key, v) },
            None => unsafe { env::remove_var(key) },
        }
    }
    result
}

#[test]
#[serial]
fn test_from_env_defaults() {
    with_env_vars(&[], || {
        let config = EngineConfig::from_env().expect("defaults should parse");
        assert_eq!(config.partition_id, 1);
        assert_eq!(config.partition_count, 1);
        assert!(config.consistency_checks.preconditions);
        assert!(config.consistency_checks.foreign_keys);
        assert_eq!(config.redistribution_interval, Duration::from_secs(10));
        assert_eq!(config.max_redistribution_interval, Duration::from_secs(300));
        assert!(config.enable_partition_metrics);
    });
}

#[test]
#[serial]
fn test_from_env_partition_layout() {
    with_env_vars(&[("PARTITION_ID", "3"), ("PARTITION_COUNT", "8")], || {
        let config = EngineConfig::from_env().expect("should parse");
        assert_eq!(config.partition_id, 3);
        assert_eq!(config.partition_ids().collect::<Vec<_>>(), (1..=8).collect::<Vec<_>>());
    });
}

#[test]
#[serial]
fn test_from_env_flags() {
    with_env_vars(
        &[
            ("CONSISTENCY_CHECKS_PRECONDITIONS", "false"),
            ("CONSISTENCY_CHECKS_FOREIGN_KEYS", "0"),
            ("ENABLE_PARTITION_METRICS", "FALSE"),
        ],
        || {
            let config = EngineConfig::from_env().expect("should parse");
            assert!(!config.consistency_checks.preconditions);
            assert!(!config.consistency_checks.foreign_keys);
            assert!(!config.enable_partition_metrics);
        },
    );
}

#[test]
#[serial]
fn test_from_env_intervals() {
    with_env_vars(
        &[
            ("REDISTRIBUTION_INTERVAL_MS", "250"),
            ("MAX_REDISTRIBUTION_INTERVAL_MS", "1000"),
        ],
        || {
            let config = EngineConfig::from_env().expect("should parse");
            assert_eq!(config.redistribution_interval, Duration::from_millis(250));
            assert_eq!(config.max_redistribution_interval, Duration::from_millis(1000));
        },
    );
}

#[test]
#[serial]
fn test_from_env_rejects_garbage() {
    with_env_vars(&[("PARTITION_ID", "one")], || {
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("PARTITION_ID"));
    });
}

#[test]
#[serial]
fn test_from_env_rejects_invalid_layout() {
    with_env_vars(&[("PARTITION_ID", "4"), ("PARTITION_COUNT", "2")], || {
        let err = EngineConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("must not exceed partition_count"));
    });
}

#[test]
#[serial]
fn test_from_env_rejects_inverted_intervals() {
    with_env_vars(
        &[
            ("REDISTRIBUTION_INTERVAL_MS", "5000"),
            ("MAX_REDISTRIBUTION_INTERVAL_MS", "1000"),
        ],
        || {
            assert!(EngineConfig::from_env().is_err());
        },
    );
}

#[test]
#[serial]
fn test_log_format_from_env() {
    with_env_vars(&[("LOG_FORMAT", "json")], || {
        assert_eq!(LogFormat::from_env(), LogFormat::Json);
    });
    with_env_vars(&[], || {
        assert_eq!(LogFormat::from_env(), LogFormat::Pretty);
    });
}
