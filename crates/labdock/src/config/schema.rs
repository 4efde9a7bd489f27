use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub version: String,
    /// Root for deployment workspaces, one directory per project.
    pub workspace_root: PathBuf,
    /// Root for viewer extractions, one directory per project.
    pub cache_root: PathBuf,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub logs: LogsConfig,
}

impl RuntimeConfig {
    /// Builds a config with defaults for everything but the storage roots.
    pub fn new(workspace_root: PathBuf, cache_root: PathBuf, object_store: ObjectStoreConfig) -> Self {
        Self {
            version: "1.0".to_string(),
            workspace_root,
            cache_root,
            database_path: None,
            object_store,
            routing: RoutingConfig::default(),
            engine: EngineConfig::default(),
            images: ImagesConfig::default(),
            reaper: ReaperConfig::default(),
            logs: LogsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObjectStoreConfig {
    /// Archive references are paths relative to `root`.
    Fs { root: PathBuf },
    /// Archive references are appended to `base_url`.
    Http {
        base_url: String,
        #[serde(default)]
        token_file: Option<String>,
        #[serde(default)]
        token_env: Option<String>,
        #[serde(default = "default_fetch_timeout")]
        timeout_secs: u64,
    },
}

impl ObjectStoreConfig {
    pub fn timeout_secs(&self) -> u64 {
        match self {
            ObjectStoreConfig::Fs { .. } => default_fetch_timeout(),
            ObjectStoreConfig::Http { timeout_secs, .. } => *timeout_secs,
        }
    }
}

fn default_fetch_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_base_domain")]
    pub base_domain: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// External network shared with the reverse proxy.
    #[serde(default = "default_proxy_network")]
    pub proxy_network: String,
    #[serde(default = "default_entrypoint")]
    pub entrypoint: String,
}

fn default_base_domain() -> String {
    "labs.localhost".to_string()
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_proxy_network() -> String {
    "labdock-proxy".to_string()
}

fn default_entrypoint() -> String {
    "web".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            base_domain: default_base_domain(),
            scheme: default_scheme(),
            proxy_network: default_proxy_network(),
            entrypoint: default_entrypoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_binary")]
    pub binary: String,
    #[serde(default = "default_build_timeout")]
    pub build_timeout_secs: u64,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_binary() -> String {
    "docker".to_string()
}

fn default_build_timeout() -> u64 {
    600
}

fn default_command_timeout() -> u64 {
    60
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            build_timeout_secs: default_build_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_static_server")]
    pub static_server: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_database_admin")]
    pub database_admin: String,
    #[serde(default = "default_node")]
    pub node: String,
    #[serde(default = "default_php")]
    pub php: String,
    #[serde(default = "default_python")]
    pub python: String,
}

fn default_static_server() -> String {
    "nginx:1.27-alpine".to_string()
}

fn default_database() -> String {
    "mysql:8.0".to_string()
}

fn default_database_admin() -> String {
    "phpmyadmin:5".to_string()
}

fn default_node() -> String {
    "node:20-alpine".to_string()
}

fn default_php() -> String {
    "php:8.2-apache".to_string()
}

fn default_python() -> String {
    "python:3.12-slim".to_string()
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            static_server: default_static_server(),
            database: default_database(),
            database_admin: default_database_admin(),
            node: default_node(),
            php: default_php(),
            python: default_python(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "default_deployment_interval")]
    pub deployment_interval_secs: u64,
    #[serde(default = "default_deployment_idle")]
    pub deployment_idle_secs: u64,
    #[serde(default = "default_cache_interval")]
    pub cache_interval_secs: u64,
    #[serde(default = "default_cache_idle")]
    pub cache_idle_secs: u64,
}

fn default_deployment_interval() -> u64 {
    300
}

fn default_deployment_idle() -> u64 {
    3600
}

fn default_cache_interval() -> u64 {
    600
}

fn default_cache_idle() -> u64 {
    1800
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            deployment_interval_secs: default_deployment_interval(),
            deployment_idle_secs: default_deployment_idle(),
            cache_interval_secs: default_cache_interval(),
            cache_idle_secs: default_cache_idle(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    #[serde(default = "default_tail")]
    pub default_tail: usize,
}

fn default_tail() -> usize {
    200
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            default_tail: default_tail(),
        }
    }
}
