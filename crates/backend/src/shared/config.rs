use once_cell::sync::OnceCell;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub omie: OmieConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "target/db/app.db".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OmieConfig {
    pub base_url: String,
    #[serde(default)]
    pub app_key: String,
    #[serde(default)]
    pub app_secret: String,
}

impl Default for OmieConfig {
    fn default() -> Self {
        Self {
            base_url: crate::shared::omie::endpoints::DEFAULT_BASE_URL.to_string(),
            app_key: String::new(),
            app_secret: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SyncConfig {
    /// Bearer token expected by the sync trigger endpoints.
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct DataConfig {
    #[serde(default)]
    pub mode: DataMode,
}

/// Selected once at startup; `Mock` short-circuits the sync triggers.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DataMode {
    #[default]
    Live,
    Mock,
}

/// Default configuration embedded in the binary
const DEFAULT_CONFIG: &str = r#"
[database]
path = "target/db/app.db"

[omie]
base_url = "https://app.omie.com.br/api/v1"

[data]
mode = "live"
"#;

static CONFIG: OnceCell<Config> = OnceCell::new();

/// Load configuration from config.toml file
///
/// Search order:
/// 1. Next to the executable (for production)
/// 2. Falls back to embedded default config
///
/// Secrets can always be supplied via env vars (OMIE_APP_KEY,
/// OMIE_APP_SECRET, SYNC_TOKEN), which take precedence over the file.
pub fn load_config() -> anyhow::Result<Config> {
    let mut config = read_config_file()?;

    if let Ok(key) = std::env::var("OMIE_APP_KEY") {
        config.omie.app_key = key;
    }
    if let Ok(secret) = std::env::var("OMIE_APP_SECRET") {
        config.omie.app_secret = secret;
    }
    if let Ok(token) = std::env::var("SYNC_TOKEN") {
        config.sync.token = token;
    }

    Ok(config)
}

fn read_config_file() -> anyhow::Result<Config> {
    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            let config_path = exe_dir.join("config.toml");

            if config_path.exists() {
                tracing::info!("Loading config from: {}", config_path.display());
                let contents = std::fs::read_to_string(&config_path)?;
                let config: Config = toml::from_str(&contents)?;
                return Ok(config);
            }
        }
    }

    tracing::info!("Using default embedded configuration");
    let config: Config = toml::from_str(DEFAULT_CONFIG)?;
    Ok(config)
}

/// Install the loaded configuration process-wide. Called once from main.
pub fn init(config: Config) {
    let _ = CONFIG.set(config);
}

pub fn get() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}
