// Configuration module for anime-gateway
// Handles XDG-compliant config discovery and the TOML configuration file

use serde::Deserialize;
use std::path::PathBuf;

const APP_NAME: &str = "anime-gateway";
const CONFIG_FILENAME: &str = "config.toml";

const DEFAULT_PROVIDER_URL: &str = "https://hianime.to";
const DEFAULT_SCRAPE_API_URL: &str = "http://localhost:4000";

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server configuration
    pub server: ServerConfig,

    /// Upstream endpoints
    pub upstream: UpstreamConfig,

    /// Response cache configuration
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server port (default: 3000)
    pub port: u16,

    /// Bind address (default: 0.0.0.0)
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_address: "0.0.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Streaming catalog base URL
    pub provider_url: String,

    /// Scrape API base URL, used for source fallback
    pub scrape_api_url: String,

    /// Override for the AniList GraphQL endpoint (testing)
    pub anilist_api_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            provider_url: DEFAULT_PROVIDER_URL.to_string(),
            scrape_api_url: DEFAULT_SCRAPE_API_URL.to_string(),
            anilist_api_url: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the in-process response cache (default: true)
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Application configuration - combines TOML file with environment overrides
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Server port
    pub port: u16,

    /// Bind address
    pub bind_address: String,

    /// Streaming catalog base URL
    pub provider_url: String,

    /// Scrape API base URL
    pub scrape_api_url: String,

    /// AniList GraphQL endpoint override
    pub anilist_api_url: Option<String>,

    /// Whether the response cache is enabled
    pub cache_enabled: bool,
}

impl AppConfig {
    /// Load configuration from TOML file and environment
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. TOML config file
    /// 3. Default values
    pub fn load() -> Self {
        let config_dir = Self::find_config_dir();
        let config_file = Self::load_config_file(&config_dir);
        Self::build(config_file)
    }

    /// Find the config directory (for locating config.toml)
    fn find_config_dir() -> PathBuf {
        // Environment variable takes priority
        if let Ok(path) = std::env::var("ANIME_GATEWAY_CONFIG_DIR") {
            return PathBuf::from(path);
        }

        // Then XDG config dir
        if let Some(dir) = dirs::config_dir() {
            return dir.join(APP_NAME);
        }

        // Fallback to current directory
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Load and parse the TOML config file
    fn load_config_file(config_dir: &std::path::Path) -> ConfigFile {
        let config_path = config_dir.join(CONFIG_FILENAME);

        if !config_path.exists() {
            tracing::debug!(
                "No config file found at {}, using defaults",
                config_path.display()
            );
            return ConfigFile::default();
        }

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded configuration from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse config file {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    );
                    ConfigFile::default()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}. Using defaults.",
                    config_path.display(),
                    e
                );
                ConfigFile::default()
            }
        }
    }

    /// Build configuration from config file with environment overrides
    fn build(config_file: ConfigFile) -> Self {
        // Port: env > config > default
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(config_file.server.port);

        let bind_address = std::env::var("ANIME_GATEWAY_BIND_ADDRESS")
            .unwrap_or_else(|_| config_file.server.bind_address.clone());

        // ZORO_URL is the historical name for the catalog base
        let provider_url = std::env::var("ZORO_URL")
            .map(|host| normalize_url(&host))
            .unwrap_or(config_file.upstream.provider_url);

        let scrape_api_url = std::env::var("ANIWATCH_API")
            .map(|host| normalize_url(&host))
            .unwrap_or(config_file.upstream.scrape_api_url);

        let anilist_api_url = std::env::var("ANILIST_API")
            .ok()
            .or(config_file.upstream.anilist_api_url);

        let cache_enabled = if let Ok(v) = std::env::var("CACHE_ENABLED") {
            v.eq_ignore_ascii_case("true") || v == "1"
        } else {
            config_file.cache.enabled
        };

        Self {
            port,
            bind_address,
            provider_url,
            scrape_api_url,
            anilist_api_url,
            cache_enabled,
        }
    }

    /// Log configuration status
    pub fn log_config(&self) {
        tracing::info!("Server listening on {}:{}", self.bind_address, self.port);
        tracing::info!("Catalog provider: {}", self.provider_url);
        tracing::info!("Scrape API: {}", self.scrape_api_url);

        if self.cache_enabled {
            tracing::info!("Response cache: ENABLED");
        } else {
            tracing::info!("Response cache: disabled (every request hits upstream)");
        }
    }
}

/// Environment overrides may carry a bare hostname; URLs pass through as-is.
fn normalize_url(value: &str) -> String {
    let trimmed = value.trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_file() {
        let config = ConfigFile::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.bind_address, "0.0.0.0");
        assert!(config.cache.enabled);
        assert!(config.upstream.anilist_api_url.is_none());
    }

    #[test]
    fn test_parse_config_toml() {
        let toml_str = r#"
[server]
port = 9000
bind_address = "127.0.0.1"

[upstream]
provider_url = "https://catalog.example"
scrape_api_url = "https://scrape.example"

[cache]
enabled = false
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.upstream.provider_url, "https://catalog.example");
        assert_eq!(config.upstream.scrape_api_url, "https://scrape.example");
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_partial_config_toml() {
        // Partial configs work (only specify what you need)
        let toml_str = r#"
[cache]
enabled = false
"#;
        let config: ConfigFile = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.port, 3000); // default
        assert!(!config.cache.enabled); // from file
    }

    #[test]
    fn test_bare_hostnames_gain_scheme() {
        assert_eq!(normalize_url("hianime.to"), "https://hianime.to");
        assert_eq!(
            normalize_url("http://localhost:4000/"),
            "http://localhost:4000"
        );
    }
}
