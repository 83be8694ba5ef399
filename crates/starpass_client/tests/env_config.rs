//! Environment-driven configuration.
//!
//! Kept in one test so the process environment is never mutated concurrently.

use starpass_client::{ClientConfig, ClientError, BASE_URL_VAR, TOKEN_VAR};
use std::env;
use std::time::Duration;

const TUNING: [&str; 4] = [
    "STARPASS_TIMEOUT_SECS",
    "STARPASS_MAX_RETRIES",
    "STARPASS_RATE_LIMIT",
    "STARPASS_RATE_WINDOW_SECS",
];

fn clear() {
    env::remove_var(BASE_URL_VAR);
    env::remove_var(TOKEN_VAR);
    for name in TUNING {
        env::remove_var(name);
    }
}

#[test]
fn config_from_environment() {
    clear();
    assert!(matches!(ClientConfig::from_env(), Err(ClientError::Config(_))));

    env::set_var(BASE_URL_VAR, "https://api.galaxydigital.com/api/");
    assert!(matches!(ClientConfig::from_env(), Err(ClientError::Config(_))));

    env::set_var(TOKEN_VAR, "  secret-token \n");
    let config = ClientConfig::from_env().unwrap();
    assert_eq!(config.base_url, "https://api.galaxydigital.com/api");
    assert_eq!(&*config.credential.authorization(), "Bearer secret-token");
    assert_eq!(config.timeout, Duration::from_secs(3));
    assert_eq!(config.retry.max_retries, 3);
    assert_eq!(config.rate_limit.max_requests, 60);

    env::set_var("STARPASS_TIMEOUT_SECS", "10");
    env::set_var("STARPASS_MAX_RETRIES", "5");
    env::set_var("STARPASS_RATE_LIMIT", "120");
    env::set_var("STARPASS_RATE_WINDOW_SECS", "30");
    let config = ClientConfig::from_env().unwrap();
    assert_eq!(config.timeout, Duration::from_secs(10));
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.rate_limit.max_requests, 120);
    assert_eq!(config.rate_limit.window, Duration::from_secs(30));

    env::set_var("STARPASS_MAX_RETRIES", "many");
    assert!(matches!(ClientConfig::from_env(), Err(ClientError::Config(_))));

    env::set_var("STARPASS_MAX_RETRIES", "5");
    env::set_var(BASE_URL_VAR, "api.galaxydigital.com");
    assert!(matches!(ClientConfig::from_env(), Err(ClientError::Config(_))));

    clear();
}
