//! Simulator configuration

use anyhow::{Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, Environment, File};
use serde::Deserialize;
use sim_lib::SimulationConfig;

/// Environment variable naming an optional configuration file
const CONFIG_FILE_VAR: &str = "RANSIM_CONFIG";

/// Simulator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// API server port for health, metrics and the dashboard
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Keep serving the API after the run ends, until interrupted
    #[serde(default = "default_keep_serving")]
    pub keep_serving: bool,

    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_api_port() -> u16 {
    8080
}

fn default_keep_serving() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            keep_serving: default_keep_serving(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the optional file and the environment.
    ///
    /// `RANSIM_API_PORT=9000` sets a top-level key,
    /// `RANSIM_SIMULATION__DRIFT__WINDOW=60` a nested one.
    pub fn load() -> Result<Self> {
        let mut builder = Config::builder();
        if let Ok(path) = std::env::var(CONFIG_FILE_VAR) {
            builder = builder.add_source(File::with_name(&path));
        }

        let builder = builder.add_source(
            Environment::with_prefix("RANSIM")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        Self::from_builder(builder)
    }

    /// Build and validate from prepared sources
    pub fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config = builder
            .build()
            .context("Failed to load configuration sources")?;
        let app: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app.simulation
            .validate()
            .context("Invalid simulation configuration")?;
        Ok(app)
    }
}
