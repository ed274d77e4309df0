use std::env;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat, Source};
use optimizer::validation;
use optimizer::OptimizerConfig;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

const DEFAULT_CONFIG: &str = include_str!("../config/config.yaml");

const ENV_PREFIX: &str = "SIMBA";

#[derive(Debug, Deserialize, Serialize, JsonSchema, Validate, Clone)]
pub struct Settings {
    #[serde(default)]
    pub log_level: Option<String>,
    #[serde(default)]
    #[validate]
    pub optimizer: OptimizerConfig,
    /// A list of messages for errors that happened during loading the configuration. We collect
    /// them and store them here while loading because then our logger is not configured yet.
    /// We therefore need to log these messages later, after the logger is ready.
    #[serde(default, skip)]
    pub load_errors: Vec<LogMsg>,
}

impl Settings {
    /// Load settings relative to the working directory.
    pub fn new(custom_config_path: Option<String>) -> Result<Self, ConfigError> {
        Self::load(Path::new("."), custom_config_path, ENV_PREFIX)
    }

    fn load(
        base_dir: &Path,
        custom_config_path: Option<String>,
        env_prefix: &str,
    ) -> Result<Self, ConfigError> {
        let mut load_errors = vec![];
        let config_exists = |path: &str| File::with_name(path).collect().is_ok();
        let in_base = |path: &str| base_dir.join(path).to_string_lossy().into_owned();

        // Check if custom config file exists, report error if not
        if let Some(ref path) = custom_config_path {
            if !config_exists(path) {
                load_errors.push(LogMsg::Error(format!(
                    "Config file via --config-path is not found: {path}"
                )));
            }
        }

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let main_config = in_base("config/config");
        let mode_config = in_base(&format!("config/{run_mode}"));
        let local_config = in_base("config/local");

        // Report warning if main or run mode config files don't exist
        load_errors.extend(
            [&main_config, &mode_config]
                .into_iter()
                .filter(|path| !config_exists(path.as_str()))
                .map(|path| LogMsg::Warn(format!("Config file not found: {path}"))),
        );

        let mut config = Config::builder()
            // Start with compile-time base config
            .add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Yaml))
            // Merge main config: config/config
            .add_source(File::with_name(&main_config).required(false))
            // Merge run mode config: config/{RUN_MODE}, defaults to 'development'
            .add_source(File::with_name(&mode_config).required(false))
            // Merge local config, not tracked in git: config/local
            .add_source(File::with_name(&local_config).required(false));

        // Merge user provided config with --config-path
        if let Some(path) = custom_config_path {
            config = config.add_source(File::with_name(&path).required(false));
        }

        // Merge environment settings
        // E.g.: `SIMBA__OPTIMIZER__MAX_STEPS=20` would set `optimizer.max_steps=20`
        config = config.add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        // Build and merge config and deserialize into Settings, attach any load errors we had
        let mut settings: Settings = config.build()?.try_deserialize()?;
        settings.load_errors.extend(load_errors);
        Ok(settings)
    }

    pub fn validate_and_warn(&self) {
        // Print any load error messages we had
        self.load_errors.iter().for_each(LogMsg::log);

        if let Err(ref errs) = self.validate() {
            validation::warn_validation_errors("Settings configuration file", errs);
        } else if let Err(err) = self.optimizer.check() {
            log::warn!("Settings configuration file has an invalid optimizer section: {err}");
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogMsg {
    Warn(String),
    Error(String),
}

impl LogMsg {
    fn log(&self) {
        match self {
            Self::Warn(msg) => log::warn!("{msg}"),
            Self::Error(msg) => log::error!("{msg}"),
        }
    }
}
