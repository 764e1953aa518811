use crate::commands::Out;
use crate::{Config, Result};
use anyhow::Context;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// What `liftup init` created.
#[derive(Debug, Clone, Serialize)]
pub struct Initialized {
    pub config_path: PathBuf,
    pub model: String,
}

/// Creates the data directory and an initial `config.json`. Running it again keeps the existing
/// configuration.
///
/// # Arguments
/// - `liftup_home` - The directory that will be the root of data directory, e.g. `$HOME/liftup`
/// - `model` - Optionally override the default advisor model.
pub async fn init(liftup_home: &Path, model: Option<&str>) -> Result<Out<Initialized>> {
    let config = Config::create(liftup_home, model)
        .await
        .context("Unable to create the data directory and config")?;
    Ok(Out::new(
        format!(
            "The liftup config is ready at {}",
            config.config_path().display()
        ),
        Initialized {
            config_path: config.config_path().to_path_buf(),
            model: config.advisor().model().to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_init() {
        let dir = TempDir::new().unwrap();
        let home = dir.path().join("liftup");
        let out = init(&home, Some("gemini-1.5-pro")).await.unwrap();
        let created = out.structure().unwrap();
        assert!(created.config_path.is_file());
        assert_eq!(created.model, "gemini-1.5-pro");

        let loaded = Config::load(&home).await.unwrap();
        assert_eq!(loaded.advisor().model(), "gemini-1.5-pro");
    }
}
