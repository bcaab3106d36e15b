use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::search::{self, Axis, StoreLayout};

const CONFIG_FILE: &str = "config.yaml";

/// Default listen address for `serve`
const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
/// Default timeout for remote feature files and embedding requests
const DEFAULT_TIMEOUT_SECS: u64 = 60;
/// Environment variable holding the embedding API key
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is malformed: {0}")]
    Parse(#[from] serde_yml::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Where the feature files live.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DataSourceConfig {
    /// A local directory; relative paths resolve against the base path.
    Local { dir: String },
    /// A base URL the file names are joined onto.
    Http {
        base_url: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        DataSourceConfig::Local {
            dir: "data".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub source: DataSourceConfig,

    /// Per-axis file name overrides
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub axis_files: BTreeMap<Axis, String>,

    #[serde(default = "default_metadata_file")]
    pub metadata_file: String,
}

impl DataConfig {
    pub fn layout(&self) -> StoreLayout {
        let mut layout = StoreLayout::default();
        for (axis, file) in &self.axis_files {
            layout.axis_files.insert(*axis, file.clone());
        }
        layout.metadata_file = self.metadata_file.clone();
        layout
    }
}

/// Query embedding provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum EmbeddingConfig {
    /// Local fastembed model, downloaded into `<base>/models` on first use
    Fastembed {
        #[serde(default = "default_model")]
        model: String,
    },
    /// OpenAI-compatible embeddings endpoint
    Http {
        base_url: String,
        model: String,
        /// Name of the environment variable holding the API key
        #[serde(default = "default_api_key_env")]
        api_key_env: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig::Fastembed {
            model: default_model(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

fn default_metadata_file() -> String {
    search::store::DEFAULT_METADATA_FILE.to_string()
}

fn default_model() -> String {
    search::DEFAULT_MODEL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_top_k() -> usize {
    search::DEFAULT_TOP_K
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    /// Base directory for config, data and models.
    ///
    /// `LOCSCOUT_BASE_PATH` wins; otherwise `~/.local/share/locscout`.
    pub fn base_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var("LOCSCOUT_BASE_PATH") {
            return Ok(PathBuf::from(path));
        }
        let home = my_home()
            .map_err(|e| ConfigError::Invalid(format!("could not determine home directory: {e}")))?
            .ok_or_else(|| ConfigError::Invalid("home directory path is empty".to_string()))?;
        Ok(home.join(".local/share/locscout"))
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(&Self::base_path()?)
    }

    /// Load `config.yaml` from `base_path`, writing defaults if it does not exist.
    pub fn load_with(base_path: &Path) -> Result<Self, ConfigError> {
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            let mut config = Self::default();
            config.base_path = base_path.to_path_buf();
            config.save()?;
            log::info!("wrote default config to {}", path.display());
        }

        let config_str = std::fs::read_to_string(&path)?;
        let mut config: Self = serde_yml::from_str(&config_str)?;
        config.base_path = base_path.to_path_buf();

        config.validate()?;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.base_path)?;
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }

    pub fn path(&self) -> PathBuf {
        self.base_path.join(CONFIG_FILE)
    }

    /// Cache directory for the local embedding model; models land in `models/` below it.
    pub fn cache_dir(&self) -> PathBuf {
        self.base_path.clone()
    }

    /// Local data directory, resolved against the base path.
    pub fn data_dir(&self) -> Option<PathBuf> {
        match &self.data.source {
            DataSourceConfig::Local { dir } => Some(self.base_path.join(dir)),
            DataSourceConfig::Http { .. } => None,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.search.top_k == 0 {
            return Err(ConfigError::Invalid(
                "search.top_k must be at least 1".to_string(),
            ));
        }

        if let Some(min) = self.search.min_score {
            if !(-1.0..=1.0).contains(&min) {
                return Err(ConfigError::Invalid(format!(
                    "search.min_score must be between -1.0 and 1.0, got {min}"
                )));
            }
        }

        match &self.data.source {
            DataSourceConfig::Local { dir } if dir.trim().is_empty() => {
                return Err(ConfigError::Invalid("data.dir must not be empty".to_string()));
            }
            DataSourceConfig::Http {
                base_url,
                timeout_secs,
            } => {
                url::Url::parse(base_url).map_err(|e| {
                    ConfigError::Invalid(format!("data.base_url '{base_url}' is invalid: {e}"))
                })?;
                if *timeout_secs == 0 {
                    return Err(ConfigError::Invalid(
                        "data.timeout_secs must be greater than 0".to_string(),
                    ));
                }
            }
            _ => {}
        }

        for (axis, file) in &self.data.axis_files {
            if file.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "data.axis_files.{axis} must not be empty"
                )));
            }
        }
        if self.data.metadata_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "data.metadata_file must not be empty".to_string(),
            ));
        }

        if let EmbeddingConfig::Http {
            base_url,
            timeout_secs,
            ..
        } = &self.embedding
        {
            url::Url::parse(base_url).map_err(|e| {
                ConfigError::Invalid(format!("embedding.base_url '{base_url}' is invalid: {e}"))
            })?;
            if *timeout_secs == 0 {
                return Err(ConfigError::Invalid(
                    "embedding.timeout_secs must be greater than 0".to_string(),
                ));
            }
        }

        self.server
            .listen
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                ConfigError::Invalid(format!(
                    "server.listen '{}' is invalid: {e}",
                    self.server.listen
                ))
            })?;

        Ok(())
    }
}
