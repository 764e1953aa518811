//! Configuration file handling for LiftUp.
//!
//! The configuration file is stored at `$LIFTUP_HOME/config.json` and contains settings for the
//! application, currently the advisor model and where to find its API key.

use crate::{utils, Result};
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const APP_NAME: &str = "liftup";
const CONFIG_VERSION: u8 = 1;
const CONFIG_JSON: &str = "config.json";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_ENDPOINT: &str = "https://generativelanguage.googleapis.com/";
const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// The `Config` object represents the configuration of the app. You instantiate it by providing
/// the path to `$LIFTUP_HOME` and from there it loads `$LIFTUP_HOME/config.json`.
#[derive(Debug, Clone)]
pub struct Config {
    root: PathBuf,
    config_path: PathBuf,
    config_file: ConfigFile,
}

impl Config {
    /// Creates the data directory and an initial `config.json` with default settings. An existing
    /// `config.json` is left untouched and loaded instead.
    ///
    /// # Arguments
    /// - `dir` - The directory that will be the root of data directory, e.g. `$HOME/liftup`
    /// - `model` - Optionally override the default advisor model.
    ///
    /// # Errors
    /// - Returns an error if any file operations fail.
    pub async fn create(dir: impl Into<PathBuf>, model: Option<&str>) -> Result<Self> {
        let maybe_relative = dir.into();
        utils::make_dir(&maybe_relative)
            .await
            .context("Unable to create the liftup home directory")?;
        let root = utils::canonicalize(&maybe_relative).await?;
        let config_path = root.join(CONFIG_JSON);

        if config_path.is_file() {
            return Self::load(root).await;
        }

        let mut config_file = ConfigFile::default();
        if let Some(model) = model {
            config_file.advisor.model = model.to_string();
        }
        config_file.save(&config_path).await?;

        Ok(Self {
            root,
            config_path,
            config_file,
        })
    }

    /// This will
    /// - validate that `liftup_home` exists and that the config file exists
    /// - load and validate the config file
    /// - return the loaded configuration object
    pub async fn load(liftup_home: impl Into<PathBuf>) -> Result<Self> {
        let maybe_relative = liftup_home.into();
        let root = utils::canonicalize(&maybe_relative)
            .await
            .context("LiftUp Home is missing, run 'liftup init'")?;

        let config_path = root.join(CONFIG_JSON);
        if !config_path.is_file() {
            bail!(
                "The config file is missing '{}', run 'liftup init'",
                config_path.display()
            )
        }
        let config_file = ConfigFile::load(&config_path).await?;

        Ok(Self {
            root,
            config_path,
            config_file,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn advisor(&self) -> &AdvisorConfig {
        &self.config_file.advisor
    }

    #[cfg(test)]
    /// A config that is not backed by a file.
    pub(crate) fn in_memory(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_path: root.join(CONFIG_JSON),
            root,
            config_file: ConfigFile::default(),
        }
    }
}

/// Settings for the hosted advisor model.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AdvisorConfig {
    /// The model name, e.g. `gemini-2.0-flash`.
    model: String,

    /// The base URL of the model API.
    #[serde(default = "default_endpoint")]
    endpoint: String,

    /// The name of the environment variable holding the API key. The key itself is never written
    /// to the config file.
    #[serde(default = "default_api_key_env")]
    api_key_env: String,
}

impl Default for AdvisorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
        }
    }
}

impl AdvisorConfig {
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn api_key_env(&self) -> &str {
        &self.api_key_env
    }
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

/// Represents the serialization and deserialization format of the configuration file.
///
/// Example configuration:
/// ```json
/// {
///   "app_name": "liftup",
///   "config_version": 1,
///   "advisor": {
///     "model": "gemini-2.0-flash",
///     "endpoint": "https://generativelanguage.googleapis.com/",
///     "api_key_env": "GEMINI_API_KEY"
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
struct ConfigFile {
    /// Application name, should always be "liftup"
    app_name: String,

    /// Configuration file version
    config_version: u8,

    #[serde(default)]
    advisor: AdvisorConfig,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            app_name: APP_NAME.to_string(),
            config_version: CONFIG_VERSION,
            advisor: AdvisorConfig::default(),
        }
    }
}

impl ConfigFile {
    /// Loads a ConfigFile asynchronously from the specified path.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed or if it belongs to another app.
    async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let config: ConfigFile = utils::deserialize(path).await?;

        anyhow::ensure!(
            config.app_name == APP_NAME,
            "Invalid app_name in config file: expected '{}', got '{}'",
            APP_NAME,
            config.app_name
        );
        anyhow::ensure!(
            config.config_version <= CONFIG_VERSION,
            "Config version {} is unsupported. Is a newer version of liftup available?",
            config.config_version
        );

        Ok(config)
    }

    /// Saves the ConfigFile to the specified path.
    async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let p = path.as_ref();
        let data = serde_json::to_string_pretty(self).context("Unable to serialize config")?;
        utils::write(p, data)
            .await
            .context("Unable to write config file")
    }
}
