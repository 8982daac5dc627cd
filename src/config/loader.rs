//! Configuration loader with environment variable expansion

use super::{Config, ConfigError};
use std::path::Path;

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text
    pub fn from_yaml(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Expand environment variables.
    ///
    /// Supports `${VAR_NAME}` (placeholder kept when the variable is unset) and
    /// `${VAR_NAME:-default}`.
    fn expand_env_vars(content: &str) -> String {
        let re = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is valid");

        re.replace_all(content, |cap: &regex_lite::Captures<'_>| {
            match std::env::var(&cap[1]) {
                Ok(value) => value,
                Err(_) => match cap.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => cap[0].to_string(),
                },
            }
        })
        .into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_expand_env_vars() {
        std::env::set_var("EDGE_AUTHZ_TEST_VAR", "test_value");
        let content = "key: ${EDGE_AUTHZ_TEST_VAR}";
        let expanded = ConfigLoader::expand_env_vars(content);
        assert_eq!(expanded, "key: test_value");
        std::env::remove_var("EDGE_AUTHZ_TEST_VAR");
    }

    #[test]
    #[serial]
    fn test_expand_env_vars_default_and_missing() {
        std::env::remove_var("EDGE_AUTHZ_UNSET");
        assert_eq!(
            ConfigLoader::expand_env_vars("a: ${EDGE_AUTHZ_UNSET:-fallback}"),
            "a: fallback"
        );
        assert_eq!(
            ConfigLoader::expand_env_vars("a: ${EDGE_AUTHZ_UNSET}"),
            "a: ${EDGE_AUTHZ_UNSET}"
        );
    }

    #[test]
    fn test_load_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
auth:
  issuer: "https://idp.example"
  skip_routes: ["^/dex-login$"]
deny:
  mode: html
"#
        )
        .unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.auth.skip_routes, vec!["^/dex-login$".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            ConfigLoader::load("/nonexistent/edge-authz.yaml"),
            Err(ConfigError::IoError(_))
        ));
    }
}
