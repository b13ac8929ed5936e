use config::{Config, File, FileFormat};
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_MONGODB_URI: &str = "mongodb://localhost:27017";
pub const DEFAULT_DATABASE_NAME: &str = "octofit_db";

/// Environment variables that take precedence over the config file,
/// paired with the config key they override.
const ENV_OVERRIDES: [(&str, &str); 3] = [
    ("MONGODB_URI", "database.uri"),
    ("OCTOFIT_DB_NAME", "database.name"),
    ("OCTOFIT_EXIT_ON_FAILURE", "exit_on_failure"),
];

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to load config")]
    InvalidConfig(#[from] config::ConfigError),
    #[error("could not read config file {path}")]
    ReadConfigFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("environment variable expansion error")]
    EnvExpansion(#[from] ExpandError),
}

#[derive(thiserror::Error, Debug)]
pub enum ExpandError {
    #[error("Missing environment variable '{var_name}' for placeholder '{placeholder}'")]
    MissingVariable {
        var_name: String,
        placeholder: String,
    },
}

/// Loads environment variables from a .env file if it exists.
///
/// Looks in the current working directory first, then in its parent.
/// A missing file is not an error.
pub fn load_dotenv() {
    if Path::new(".env").exists() {
        match dotenvy::dotenv() {
            Ok(_) => info!("Loaded environment variables from .env file"),
            Err(e) => warn!("Found .env file but failed to load it: {}", e),
        }
        return;
    }

    if Path::new("../.env").exists() {
        match dotenvy::from_path("../.env") {
            Ok(_) => info!("Loaded environment variables from ../.env file"),
            Err(e) => warn!("Found ../.env file but failed to load it: {}", e),
        }
        return;
    }

    debug!("No .env file found, using system environment variables only");
}

/// Expands environment variable placeholders in a string.
/// Supports both ${VAR_NAME} and ${VAR_NAME:-default_value} syntax.
///
/// Variables are resolved through `lookup`, which lets callers substitute
/// the process environment.
fn expand_env_vars(
    input: &str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<String, ExpandError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-(.*?))?\}").expect("placeholder regex is valid");
    let mut replacements: HashMap<String, String> = HashMap::new();

    for capture in re.captures_iter(input) {
        let full_match = &capture[0];
        if replacements.contains_key(full_match) {
            continue;
        }
        let var_name = &capture[1];
        let default_value = capture.get(2).map(|m| m.as_str());

        let value = match lookup(var_name) {
            Some(value) => {
                debug!("Expanded environment variable: {} = [REDACTED]", var_name);
                value
            }
            None => match default_value {
                Some(default) => {
                    warn!(
                        "Environment variable {} not found, using default value",
                        var_name
                    );
                    default.to_string()
                }
                None => {
                    return Err(ExpandError::MissingVariable {
                        var_name: var_name.to_string(),
                        placeholder: full_match.to_string(),
                    });
                }
            },
        };
        replacements.insert(full_match.to_string(), value);
    }

    let mut result = input.to_string();
    for (placeholder, value) in &replacements {
        result = result.replace(placeholder, value);
    }
    Ok(result)
}

#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub uri: String,
    pub name: String,
    /// How long the driver waits for a usable server before giving up.
    /// Uses the driver default when unset.
    #[serde(default)]
    pub server_selection_timeout_ms: Option<u64>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            uri: DEFAULT_MONGODB_URI.to_string(),
            name: DEFAULT_DATABASE_NAME.to_string(),
            server_selection_timeout_ms: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    /// Exit with a non-zero status when initialization fails. Off by
    /// default: failures are logged and the process still exits 0.
    #[serde(default)]
    pub exit_on_failure: bool,
}

impl AppConfig {
    /// Loads the config from `path`, which must exist.
    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        load_config(Some(path))
    }

    /// Loads `config.yaml` from the working directory if present,
    /// falling back to built-in defaults.
    pub fn from_default_path() -> Result<Self, ConfigError> {
        load_config(None)
    }
}

#[instrument(err)]
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig, ConfigError> {
    let path = match config_path {
        Some(path) => Some(path),
        None if Path::new(DEFAULT_CONFIG_FILE).exists() => Some(DEFAULT_CONFIG_FILE),
        None => {
            debug!(
                "no config file provided and {} not found, using defaults",
                DEFAULT_CONFIG_FILE
            );
            None
        }
    };

    let file_content = match path {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|source| {
            ConfigError::ReadConfigFile {
                path: path.to_string(),
                source,
            }
        })?),
        None => None,
    };

    build_config(file_content.as_deref(), |name| env::var(name).ok())
}

/// Layers built-in defaults, the (expanded) YAML content and the
/// environment overrides, in that order of increasing precedence.
pub fn build_config(
    file_content: Option<&str>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<AppConfig, ConfigError> {
    let defaults = DatabaseConfig::default();
    let mut builder = Config::builder()
        .set_default("database.uri", defaults.uri)?
        .set_default("database.name", defaults.name)?
        .set_default("exit_on_failure", false)?;

    if let Some(content) = file_content {
        let expanded = expand_env_vars(content, &lookup)?;
        builder = builder.add_source(File::from_str(&expanded, FileFormat::Yaml));
    }

    for (var_name, key) in ENV_OVERRIDES {
        builder = builder.set_override_option(key, lookup(var_name))?;
    }

    Ok(builder.build()?.try_deserialize()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_expand_env_vars() {
        let lookup = env_from(&[("DB_HOST", "mongo.internal")]);
        let expanded = expand_env_vars("mongodb://${DB_HOST}:${DB_PORT:-27017}", &lookup).unwrap();
        assert_eq!(expanded, "mongodb://mongo.internal:27017");
    }

    #[test]
    fn test_expand_env_vars_repeated_placeholder() {
        let lookup = env_from(&[("NAME", "octofit")]);
        let expanded = expand_env_vars("${NAME}/${NAME}", &lookup).unwrap();
        assert_eq!(expanded, "octofit/octofit");
    }

    #[test]
    fn test_expand_env_vars_missing_variable() {
        let lookup = env_from(&[]);
        let err = expand_env_vars("uri: ${MISSING_URI}", &lookup).unwrap_err();
        match err {
            ExpandError::MissingVariable {
                var_name,
                placeholder,
            } => {
                assert_eq!(var_name, "MISSING_URI");
                assert_eq!(placeholder, "${MISSING_URI}");
            }
        }
    }

    #[test]
    fn test_build_config_defaults() {
        let config = build_config(None, env_from(&[])).unwrap();
        assert_eq!(config.database.uri, "mongodb://localhost:27017");
        assert_eq!(config.database.name, "octofit_db");
        assert_eq!(config.database.server_selection_timeout_ms, None);
        assert!(!config.exit_on_failure);
    }

    #[test]
    fn test_build_config_file_overrides_defaults() {
        let content = r#"
database:
  uri: mongodb://db.example.com:27018
  server_selection_timeout_ms: 2000
exit_on_failure: true
"#;
        let config = build_config(Some(content), env_from(&[])).unwrap();
        assert_eq!(config.database.uri, "mongodb://db.example.com:27018");
        // not set in the file, so the default stays
        assert_eq!(config.database.name, "octofit_db");
        assert_eq!(config.database.server_selection_timeout_ms, Some(2000));
        assert!(config.exit_on_failure);
    }

    #[test]
    fn test_build_config_env_overrides_file() {
        let content = r#"
database:
  uri: mongodb://from-file:27017
  name: from_file
"#;
        let lookup = env_from(&[
            ("MONGODB_URI", "mongodb://from-env:27017"),
            ("OCTOFIT_EXIT_ON_FAILURE", "true"),
        ]);
        let config = build_config(Some(content), lookup).unwrap();
        assert_eq!(config.database.uri, "mongodb://from-env:27017");
        assert_eq!(config.database.name, "from_file");
        assert!(config.exit_on_failure);
    }

    #[test]
    fn test_build_config_expands_placeholders() {
        let content = "database:\n  uri: mongodb://${DB_HOST:-localhost}:27017\n  name: ${DB_NAME}\n";
        let lookup = env_from(&[("DB_NAME", "octofit_staging")]);
        let config = build_config(Some(content), lookup).unwrap();
        assert_eq!(config.database.uri, "mongodb://localhost:27017");
        assert_eq!(config.database.name, "octofit_staging");
    }

    #[test]
    fn test_build_config_missing_placeholder_is_an_error() {
        let content = "database:\n  uri: ${NOT_SET}\n";
        let result = build_config(Some(content), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::EnvExpansion(_))));
    }

    #[test]
    fn test_build_config_invalid_value() {
        let content = "exit_on_failure: sometimes\n";
        let result = build_config(Some(content), env_from(&[]));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    }
}
