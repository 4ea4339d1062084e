use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::action::DEFAULT_MAX_LIMIT;
use crate::controller::{DEFAULT_DEBOUNCE, DEFAULT_LIMIT};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

const CONFIG_FILE: &str = "config.toml";
const ENV_PREFIX: &str = "DATAKIT_";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub datakit: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&'static str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DATAKIT_LEVEL: &'static str = "info";

    fn default() -> Self {
        LoggingConfig {
            datakit: Self::DATAKIT_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let original = self.datakit.clone();
        self.datakit = self.datakit.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.datakit.as_str()) {
            eprintln!(
                "Config error: datakit log level of '{}' is invalid - using default of '{}'",
                original,
                Self::DATAKIT_LEVEL
            );
            self.datakit = Self::DATAKIT_LEVEL.to_owned();
        }
    }

    /// flexi_logger spec: other crates at warn, ours at the configured level
    pub fn log_spec(&self) -> String {
        format!("warn, datakit={}", self.datakit)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    const HOST: &'static str = "127.0.0.1";
    const PORT: u16 = 8080;

    fn default() -> Self {
        ServerConfig {
            host: Self::HOST.to_owned(),
            port: Self::PORT,
        }
    }

    fn ensure_valid(&mut self) {
        if self.host.trim().is_empty() {
            eprintln!(
                "Config error: server host is empty - using default of '{}'",
                Self::HOST
            );
            self.host = Self::HOST.to_owned();
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryConfig {
    pub max_limit: u64,
    pub default_limit: u64,
    pub debounce_ms: u64,
}

impl QueryConfig {
    fn default() -> Self {
        QueryConfig {
            max_limit: DEFAULT_MAX_LIMIT,
            default_limit: DEFAULT_LIMIT,
            debounce_ms: DEFAULT_DEBOUNCE.as_millis() as u64,
        }
    }

    fn ensure_valid(&mut self) {
        if self.max_limit == 0 || self.max_limit > DEFAULT_MAX_LIMIT {
            eprintln!(
                "Config error: max_limit of {} is invalid - using default of {}",
                self.max_limit, DEFAULT_MAX_LIMIT
            );
            self.max_limit = DEFAULT_MAX_LIMIT;
        }

        if self.default_limit == 0 || self.default_limit > self.max_limit {
            let fallback = DEFAULT_LIMIT.min(self.max_limit);
            eprintln!(
                "Config error: default_limit of {} is invalid - using {}",
                self.default_limit, fallback
            );
            self.default_limit = fallback;
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct DatabaseConfig {
    /// Database file. Defaults to `datakit.db` in the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub server: ServerConfig,
    pub query: QueryConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
            query: QueryConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Loads the configuration from a TOML file located in the app's data
    /// directory, with `DATAKIT_` environment variables layered on top.
    /// If the file is missing or fails to parse, defaults are used.
    /// Writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join(CONFIG_FILE);

        if !config_path.exists() {
            Self::write_default(&config_path);
        }

        Self::load_from(&config_path)
    }

    /// Defaults, then the TOML file at `config_path`, then the environment
    pub fn load_from(config_path: &Path) -> Self {
        let default_config = Config::default();

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();

        config
    }

    fn write_default(config_path: &Path) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.server.ensure_valid();
        self.query.ensure_valid();
    }

    /// The loaded configuration, or defaults when nothing has been loaded
    pub fn get() -> Config {
        CONFIG.get().cloned().unwrap_or_default()
    }

    pub fn database_path(&self, project_dirs: &ProjectDirs) -> PathBuf {
        match &self.database.path {
            Some(path) => PathBuf::from(path),
            None => project_dirs.data_local_dir().join("datakit.db"),
        }
    }
}
