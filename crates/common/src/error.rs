//! Configuration error types

use thiserror::Error;

/// Errors raised while loading gateway configuration.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No API keys configured: {0}")]
    NoApiKeys(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using common Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_context() {
        let config_err = Error::Config("daily_limit must be greater than 0".into());
        assert_eq!(
            config_err.to_string(),
            "Configuration error: daily_limit must be greater than 0"
        );

        let keys_err = Error::NoApiKeys("set ZYPHRA_API_KEYS".into());
        assert_eq!(
            keys_err.to_string(),
            "No API keys configured: set ZYPHRA_API_KEYS"
        );

        let io_err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "keys file not found",
        ));
        assert!(
            io_err.to_string().starts_with("I/O error:"),
            "got: {}",
            io_err
        );
    }

    #[test]
    fn toml_error_converts_via_from() {
        let parse: std::result::Result<toml::Value, _> = toml::from_str("not = = toml");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Toml(_)), "got: {err:?}");
    }
}
