use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_parse<T: std::str::FromStr>(profile: &str, key: &str, default: T) -> T {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    match profiled_env_opt(profile, key) {
        Some(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        None => default,
    }
}

/// Comma-separated list, blanks dropped.
fn profiled_env_list(profile: &str, key: &str, default: &[&str]) -> Vec<String> {
    match profiled_env_opt(profile, key) {
        Some(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => default.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub postgres: PostgresConfig,
    pub sources: SourcesConfig,
    pub delivery: DeliveryConfig,
    pub filters: FiltersConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `GRANTFLOW_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("GRANTFLOW_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            server: ServerConfig::from_env_profiled(p),
            postgres: PostgresConfig::from_env_profiled(p),
            sources: SourcesConfig::from_env_profiled(p),
            delivery: DeliveryConfig::from_env_profiled(p),
            filters: FiltersConfig::from_env_profiled(p),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:    {}:{}", self.server.host, self.server.port);
        tracing::info!("  postgres:  host={}, db={}, configured={}", self.postgres.host, self.postgres.database, self.postgres.is_configured());
        tracing::info!("  sources:   timeout={}s, page_size={}, pdfs={}", self.sources.timeout_secs, self.sources.page_size, self.sources.process_pdfs);
        tracing::info!(
            "  delivery:  webhook={}, max_retries={}, backoff={}s..{}s",
            if self.delivery.is_configured() { "set" } else { "(none)" },
            self.delivery.max_retries,
            self.delivery.base_delay_secs,
            self.delivery.max_delay_secs
        );
        tracing::info!("  filters:   profiles={}", self.filters.profiles_path.display());
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "postgres": {
                "host": self.postgres.host,
                "port": self.postgres.port,
                "database": self.postgres.database,
                "configured": self.postgres.is_configured(),
            },
            "sources": {
                "boe_api_url": self.sources.boe_api_url,
                "bdns_api_url": self.sources.bdns_api_url,
                "placsp_feed_url": self.sources.placsp_feed_url,
                "timeout_secs": self.sources.timeout_secs,
                "process_pdfs": self.sources.process_pdfs,
            },
            "delivery": {
                "configured": self.delivery.is_configured(),
                "max_retries": self.delivery.max_retries,
                "base_delay_secs": self.delivery.base_delay_secs,
                "max_delay_secs": self.delivery.max_delay_secs,
                "sweep_interval_secs": self.delivery.sweep_interval_secs,
                "auto_forward": self.delivery.auto_forward,
            },
            "filters": {
                "profiles_path": self.filters.profiles_path,
                "source_profiles": self.filters.source_profiles,
            },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            host: profiled_env_or(p, "HOST", "0.0.0.0"),
            port: profiled_env_parse(p, "PORT", 8000),
            cors_origin: profiled_env_or(p, "CORS_ORIGIN", "*"),
        }
    }
}

// ── PostgreSQL ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    /// Full connection URL; takes precedence over the individual parts.
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub ssl_mode: String,
    pub max_connections: u32,
}

impl PostgresConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            url: profiled_env_opt(p, "PG_URL"),
            host: profiled_env_or(p, "PG_HOST", "localhost"),
            port: profiled_env_parse(p, "PG_PORT", 5432),
            database: profiled_env_or(p, "PG_DATABASE", "grantflow"),
            username: profiled_env_opt(p, "PG_USERNAME"),
            password: profiled_env_opt(p, "PG_PASSWORD"),
            ssl_mode: profiled_env_or(p, "PG_SSL_MODE", "prefer"),
            max_connections: profiled_env_parse(p, "PG_MAX_CONNECTIONS", 10),
        }
    }

    pub fn connection_string(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        let user = self.username.as_deref().unwrap_or("postgres");
        let pass = self.password.as_deref().unwrap_or("");
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            user, pass, self.host, self.port, self.database, self.ssl_mode
        )
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some() || self.username.is_some()
    }
}

// ── Sources ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    pub boe_api_url: String,
    pub bdns_api_url: String,
    pub placsp_feed_url: String,
    /// Per-request timeout for source fetches.
    pub timeout_secs: u64,
    /// Records requested per page from paginated sources.
    pub page_size: u32,
    pub max_pages: u32,
    pub max_results: u32,
    /// Download and extract gazette PDFs during capture.
    pub process_pdfs: bool,
}

impl SourcesConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            boe_api_url: profiled_env_or(p, "BOE_API_URL", "https://www.boe.es/datosabiertos/api"),
            bdns_api_url: profiled_env_or(p, "BDNS_API_URL", "https://www.infosubvenciones.es/bdnstrans/api"),
            placsp_feed_url: profiled_env_or(
                p,
                "PLACSP_FEED_URL",
                "https://contrataciondelsectorpublico.gob.es/sindicacion/sindicacion_643/licitacionesPerfilesContratanteCompleto3.atom",
            ),
            timeout_secs: profiled_env_parse(p, "SOURCE_TIMEOUT_SECS", 30),
            page_size: profiled_env_parse(p, "SOURCE_PAGE_SIZE", 50),
            max_pages: profiled_env_parse(p, "CAPTURE_MAX_PAGES", 10),
            max_results: profiled_env_parse(p, "CAPTURE_MAX_RESULTS", 500),
            process_pdfs: profiled_env_bool(p, "PROCESS_PDFS", false),
        }
    }
}

// ── Delivery ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    pub webhook_url: Option<String>,
    /// Extra headers as `Name=value` pairs; values may reference `${ENV}`.
    pub webhook_headers: HashMap<String, String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    pub batch_concurrency: usize,
    pub sweep_interval_secs: u64,
    pub sweep_limit: usize,
    /// Forward newly captured grants right after a capture run.
    pub auto_forward: bool,
}

impl DeliveryConfig {
    fn from_env_profiled(p: &str) -> Self {
        let webhook_headers = profiled_env_list(p, "WEBHOOK_HEADERS", &[])
            .into_iter()
            .filter_map(|pair| {
                let (k, v) = pair.split_once('=')?;
                Some((k.trim().to_string(), v.trim().to_string()))
            })
            .collect();

        Self {
            webhook_url: profiled_env_opt(p, "WEBHOOK_URL"),
            webhook_headers,
            timeout_secs: profiled_env_parse(p, "WEBHOOK_TIMEOUT_SECS", 30),
            max_retries: profiled_env_parse(p, "WEBHOOK_MAX_RETRIES", 3),
            base_delay_secs: profiled_env_parse(p, "WEBHOOK_BASE_DELAY_SECS", 2),
            max_delay_secs: profiled_env_parse(p, "WEBHOOK_MAX_DELAY_SECS", 60),
            batch_concurrency: profiled_env_parse(p, "WEBHOOK_BATCH_CONCURRENCY", 4),
            sweep_interval_secs: profiled_env_parse(p, "SWEEP_INTERVAL_SECS", 30),
            sweep_limit: profiled_env_parse(p, "SWEEP_LIMIT", 100),
            auto_forward: profiled_env_bool(p, "AUTO_FORWARD", false),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.webhook_url.is_some()
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_headers: HashMap::new(),
            timeout_secs: 30,
            max_retries: 3,
            base_delay_secs: 2,
            max_delay_secs: 60,
            batch_concurrency: 4,
            sweep_interval_secs: 30,
            sweep_limit: 100,
            auto_forward: false,
        }
    }
}

// ── Filters ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FiltersConfig {
    /// JSON or YAML document holding every filter profile.
    pub profiles_path: PathBuf,
    /// Profiles evaluated per source prefix (`BOE`, `BDNS`, `PLACSP`).
    pub source_profiles: HashMap<String, Vec<String>>,
    /// Cron expressions for scheduled captures, keyed by source prefix.
    pub schedules: HashMap<String, String>,
}

impl FiltersConfig {
    fn from_env_profiled(p: &str) -> Self {
        let mut source_profiles = HashMap::new();
        source_profiles.insert("BOE".to_string(), profiled_env_list(p, "BOE_PROFILES", &["nonprofit"]));
        source_profiles.insert("BDNS".to_string(), profiled_env_list(p, "BDNS_PROFILES", &["nonprofit"]));
        source_profiles.insert("PLACSP".to_string(), profiled_env_list(p, "PLACSP_PROFILES", &["test_placsp"]));

        let mut schedules = HashMap::new();
        for prefix in ["BOE", "BDNS", "PLACSP"] {
            if let Some(expr) = profiled_env_opt(p, &format!("CAPTURE_SCHEDULE_{prefix}")) {
                schedules.insert(prefix.to_string(), expr);
            }
        }

        Self {
            profiles_path: PathBuf::from(profiled_env_or(p, "FILTER_PROFILES_PATH", "data/filter_profiles.json")),
            source_profiles,
            schedules,
        }
    }

    /// Profile names configured for a source prefix.
    pub fn profiles_for(&self, prefix: &str) -> Vec<String> {
        self.source_profiles.get(prefix).cloned().unwrap_or_default()
    }
}
