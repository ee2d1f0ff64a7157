//! Where a command finds its configuration, warehouse and logs.
//!
//! Precedence: command-line flag (or its env var), then the config file,
//! then defaults under `SUNLIGHT_HOME`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sunlight_downsample::config::default_config_path;
use sunlight_downsample::{DownsampleError, DuckDbWarehouse, SunlightConfig};

use crate::cli::error::HelpfulError;

#[derive(Debug, Clone)]
pub struct Settings {
    pub config_path: PathBuf,
    /// False when defaults are in use because no file exists.
    pub config_found: bool,
    pub config: SunlightConfig,
    pub warehouse_path: PathBuf,
}

impl Settings {
    pub fn resolve(
        config_override: Option<PathBuf>,
        warehouse_override: Option<PathBuf>,
    ) -> Result<Self> {
        let explicit = config_override.is_some();
        let config_path = config_override.unwrap_or_else(default_config_path);
        let config_found = config_path.exists();
        if explicit && !config_found {
            return Err(HelpfulError::file_not_found(&config_path)
                .with_suggestion("TRY: Omit --config to use defaults")
                .into());
        }

        let config = SunlightConfig::load_or_default(&config_path)
            .map_err(|err| HelpfulError::invalid_config(&config_path, &err.to_string()))?;
        let warehouse_path = warehouse_override.unwrap_or_else(|| config.warehouse.path.clone());

        Ok(Self {
            config_path,
            config_found,
            config,
            warehouse_path,
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.config.logging.resolved_dir()
    }

    pub fn warehouse_path(&self) -> &Path {
        &self.warehouse_path
    }

    /// Open the warehouse, creating the file and schema on first use.
    pub fn open_warehouse(&self) -> Result<DuckDbWarehouse> {
        DuckDbWarehouse::open(&self.warehouse_path)
            .map_err(DownsampleError::from)
            .with_context(|| {
                format!(
                    "Failed to open warehouse {}",
                    self.warehouse_path.display()
                )
            })
    }
}
