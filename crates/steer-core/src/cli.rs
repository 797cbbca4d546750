//! Shared CLI helpers for workspace tools.

use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{Error, Result};

/// Install the global tracing subscriber. `RUST_LOG` wins over `verbose` when set.
pub fn setup_cli_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logger: {e}")))?;

    Ok(())
}

pub fn load_toml_config<T>(path: &Path) -> Result<T>
where
    T: DeserializeOwned,
{
    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config {}: {e}", path.display())))?;

    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RunConfig;
    use tempfile::TempDir;

    #[test]
    fn test_load_toml_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.toml");
        fs::write(&path, "output_dir = \"out\"\n[hyperparameters]\nmax_epochs = 3\n").unwrap();

        let config: RunConfig = load_toml_config(&path).unwrap();
        assert_eq!(config.hyperparameters.max_epochs, 3);
        assert_eq!(config.output_dir, Path::new("out"));
    }

    #[test]
    fn test_missing_config_is_config_error() {
        let err = load_toml_config::<RunConfig>(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
