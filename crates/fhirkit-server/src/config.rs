use fhirkit_bundle::BundleConfig;
use fhirkit_search::SearchConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

use crate::authz::PolicyKind;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bundle: BundleSettings,
    #[serde(default)]
    pub search: SearchSettings,
    /// Resource types and bundle search routes the server accepts
    #[serde(default)]
    pub routing: RoutingConfig,
    /// Authorization policy applied to bundle entries
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        // Server validations
        if self.server.port == 0 {
            return Err("server.port must be > 0".into());
        }
        if self.server.body_limit_bytes == 0 {
            return Err("server.body_limit_bytes must be > 0".into());
        }
        // Bundle validations
        if self.bundle.max_entries == 0 {
            return Err("bundle.max_entries must be > 0".into());
        }
        if self.bundle.max_concurrency == 0 {
            return Err("bundle.max_concurrency must be > 0".into());
        }
        // Search validations
        if self.search.default_count == 0 {
            return Err("search.default_count must be > 0".into());
        }
        if self.search.max_count == 0 {
            return Err("search.max_count must be > 0".into());
        }
        if self.search.default_count > self.search.max_count {
            return Err("search.default_count must be <= search.max_count".into());
        }
        // Routing validation
        if self.routing.resource_types.is_empty() {
            return Err("routing.resource_types must not be empty".into());
        }
        if let Some(unknown) = self
            .routing
            .search_parameters
            .keys()
            .find(|t| !self.routing.knows(t))
        {
            return Err(format!(
                "routing.search_parameters names unknown resource type '{unknown}'"
            ));
        }
        // Logging validation
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    pub fn addr(&self) -> SocketAddr {
        use std::net::{IpAddr, Ipv4Addr};
        let host: IpAddr = self
            .server
            .host
            .parse()
            .unwrap_or(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)));
        SocketAddr::from((host, self.server.port))
    }

    /// Returns the base URL for the server.
    /// If `base_url` is configured, returns that; otherwise computes from host:port.
    pub fn base_url(&self) -> String {
        self.server
            .base_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", self.server.host, self.server.port))
    }

    /// Base of the FHIR REST surface, used in searchset links.
    pub fn fhir_base_url(&self) -> String {
        format!("{}/fhir", self.base_url().trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Base URL for the server, used in links and responses.
    /// If not set, defaults to http://{host}:{port}
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_body_limit() -> usize {
    4 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            base_url: None,
            body_limit_bytes: default_body_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSettings {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}
fn default_max_entries() -> usize {
    BundleConfig::default().max_entries
}
fn default_max_concurrency() -> usize {
    BundleConfig::default().max_concurrency
}
impl Default for BundleSettings {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl BundleSettings {
    pub fn to_bundle_config(&self) -> BundleConfig {
        BundleConfig {
            max_entries: self.max_entries,
            max_concurrency: self.max_concurrency,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_default")]
    pub default_count: u32,
    #[serde(default = "default_search_max")]
    pub max_count: u32,
    /// Search parameters handed to the backend; others come back as warnings.
    #[serde(default = "default_allowed_params")]
    pub allowed_params: Vec<String>,
}
fn default_search_default() -> u32 {
    10
}
fn default_search_max() -> u32 {
    100
}
fn default_allowed_params() -> Vec<String> {
    SearchConfig::default().allowed_params
}
impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_count: default_search_default(),
            max_count: default_search_max(),
            allowed_params: default_allowed_params(),
        }
    }
}

impl SearchSettings {
    pub fn to_search_config(&self) -> SearchConfig {
        SearchConfig {
            default_count: self.default_count,
            max_count: self.max_count,
            allowed_params: self.allowed_params.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_resource_types")]
    pub resource_types: Vec<String>,
    /// Search parameters a bundle `GET` may use per resource type. A bundle
    /// search with any other parameter has no route.
    #[serde(default)]
    pub search_parameters: HashMap<String, Vec<String>>,
}

fn default_resource_types() -> Vec<String> {
    [
        "Account",
        "Condition",
        "Encounter",
        "Medication",
        "MedicationRequest",
        "Observation",
        "Organization",
        "Patient",
        "Practitioner",
        "Procedure",
        "ValueSet",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            resource_types: default_resource_types(),
            search_parameters: HashMap::new(),
        }
    }
}

impl RoutingConfig {
    /// Whether `resource_type` is configured, ignoring ASCII case.
    pub fn knows(&self, resource_type: &str) -> bool {
        self.resource_types
            .iter()
            .any(|t| t.eq_ignore_ascii_case(resource_type))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    #[serde(default)]
    pub policy: PolicyKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}
fn default_log_level() -> String {
    "info".into()
}
impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

pub mod loader {
    use super::AppConfig;
    use config::{Config, Environment, File};
    use std::path::{Path, PathBuf};

    pub const DEFAULT_CONFIG_FILE: &str = "fhirkit.toml";

    pub fn load_config(path: Option<&str>) -> Result<AppConfig, String> {
        let mut builder = Config::builder();
        let pathbuf = PathBuf::from(path.unwrap_or(DEFAULT_CONFIG_FILE));
        if pathbuf.exists() {
            builder = builder.add_source(File::from(pathbuf));
        }
        // Environment variable overrides, e.g., FHIRKIT__SERVER__PORT=9090
        builder = builder.add_source(
            Environment::with_prefix("FHIRKIT")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| format!("config build error: {e}"))?;
        let merged: AppConfig = cfg
            .try_deserialize()
            .map_err(|e| format!("config deserialize error: {e}"))?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn load_config_with_default_path<P: AsRef<Path>>(
        path: Option<P>,
    ) -> Result<AppConfig, String> {
        let p = path
            .as_ref()
            .map(|p| p.as_ref().to_string_lossy().to_string());
        load_config(p.as_deref())
    }
}
