//! Configuration loader.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::debug;

use approvalflow_protocols::WorkflowDefinition;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let mut result = content.to_string();
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.approvalflow`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }

    /// Load a single workflow definition file.
    pub fn load_definition(path: &Path) -> Result<WorkflowDefinition, ConfigError> {
        let content = fs::read_to_string(path)?;
        let expanded = Self::expand_env_vars(&content)?;
        let mut definition: WorkflowDefinition =
            toml::from_str(&expanded).map_err(|e| ConfigError::Definition {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        definition.normalize();
        Ok(definition)
    }

    /// Collect inline workflows plus every file matched by `config.definitions`.
    ///
    /// Relative patterns resolve against `base_dir`.
    pub fn load_definitions(
        config: &Config,
        base_dir: &Path,
    ) -> Result<Vec<WorkflowDefinition>, ConfigError> {
        let mut definitions: Vec<WorkflowDefinition> = config
            .workflows
            .iter()
            .cloned()
            .map(|mut d| {
                d.normalize();
                d
            })
            .collect();

        for pattern in &config.definitions {
            let expanded = Self::expand_path(pattern);
            let full: PathBuf = if Path::new(&expanded).is_absolute() {
                PathBuf::from(&expanded)
            } else {
                base_dir.join(&expanded)
            };

            let paths = glob::glob(&full.to_string_lossy()).map_err(|e| {
                ConfigError::InvalidValue {
                    field: "definitions".to_string(),
                    message: format!("{}: {}", pattern, e),
                }
            })?;

            let mut matched: Vec<PathBuf> = paths.filter_map(Result::ok).collect();
            matched.sort();
            for path in matched {
                debug!("Loading workflow definition from {:?}", path);
                definitions.push(Self::load_definition(&path)?);
            }
        }

        Ok(definitions)
    }
}
