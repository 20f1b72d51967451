//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! `PORT` and `UPSTREAM_API_KEY` environment variables override the file.

use crate::domain::node::SensorNode;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

/// Where latest-reading queries are answered from
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Rest,
}

/// How the dashboard reaches the gateway
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DashboardMode {
    Poll,
    Stream,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "sensor-gateway".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
    /// Largest accepted ingest body
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_http_port(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_max_body_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Disable on hosts that cannot keep connections open; dashboards then poll
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-subscriber queue depth before events are dropped for that subscriber
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Reconnect hint sent to clients (milliseconds)
    #[serde(default = "default_retry_ms")]
    pub retry_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subscriber_buffer: default_subscriber_buffer(),
            retry_ms: default_retry_ms(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_subscriber_buffer() -> usize {
    16
}

fn default_retry_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { backend: default_store_backend() }
    }
}

fn default_store_backend() -> StoreBackend {
    StoreBackend::Memory
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Mirror accepted readings to the durable store
    #[serde(default)]
    pub enabled: bool,
    /// Base URL of the REST query interface
    #[serde(default)]
    pub query_url: String,
    /// URL of the ingest function receiving mirrored readings
    #[serde(default)]
    pub ingest_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_mirror_buffer")]
    pub mirror_buffer: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            query_url: String::new(),
            ingest_url: String::new(),
            api_key: None,
            table: default_table(),
            timeout_ms: default_upstream_timeout_ms(),
            mirror_buffer: default_mirror_buffer(),
        }
    }
}

fn default_table() -> String {
    "telemetry".to_string()
}

fn default_upstream_timeout_ms() -> u64 {
    5000
}

fn default_mirror_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default = "default_mqtt_topic")]
    pub topic: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Republish accepted readings here (QoS 0)
    #[serde(default)]
    pub republish_topic: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            topic: default_mqtt_topic(),
            username: None,
            password: None,
            republish_topic: None,
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_mqtt_topic() -> String {
    "sensors/+/telemetry".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LayoutSection {
    #[serde(default = "default_layout_cols")]
    pub cols: usize,
    #[serde(default = "default_layout_rows")]
    pub rows: usize,
    /// Canvas margin in percent
    #[serde(default = "default_layout_margin")]
    pub margin: f64,
    /// Seed for jitter and the demo fleet; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
    /// Real fleet; a simulated one is generated when empty
    #[serde(default)]
    pub nodes: Vec<SensorNode>,
}

impl Default for LayoutSection {
    fn default() -> Self {
        Self {
            cols: default_layout_cols(),
            rows: default_layout_rows(),
            margin: default_layout_margin(),
            seed: None,
            nodes: Vec::new(),
        }
    }
}

fn default_layout_cols() -> usize {
    5
}

fn default_layout_rows() -> usize {
    10
}

fn default_layout_margin() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_dashboard_url")]
    pub url: String,
    #[serde(default = "default_dashboard_mode")]
    pub mode: DashboardMode,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            url: default_dashboard_url(),
            mode: default_dashboard_mode(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_dashboard_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_dashboard_mode() -> DashboardMode {
    DashboardMode::Poll
}

fn default_poll_interval_ms() -> u64 {
    1000
}

/// Raw file layout; every section is optional
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub layout: LayoutSection,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    config_file: String,
    http_bind_address: String,
    http_port: u16,
    max_body_bytes: usize,
    stream_enabled: bool,
    subscriber_buffer: usize,
    stream_retry_ms: u64,
    store_backend: StoreBackend,
    upstream_enabled: bool,
    upstream_query_url: String,
    upstream_ingest_url: String,
    upstream_api_key: Option<String>,
    upstream_table: String,
    upstream_timeout_ms: u64,
    mirror_buffer: usize,
    mqtt_enabled: bool,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_topic: String,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_republish_topic: Option<String>,
    layout_cols: usize,
    layout_rows: usize,
    layout_margin: f64,
    layout_seed: Option<u64>,
    layout_nodes: Vec<SensorNode>,
    metrics_interval_secs: u64,
    dashboard_url: String,
    dashboard_mode: DashboardMode,
    dashboard_poll_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default")
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            config_file: config_file.to_string(),
            http_bind_address: toml_config.http.bind_address,
            http_port: toml_config.http.port,
            max_body_bytes: toml_config.http.max_body_bytes,
            stream_enabled: toml_config.stream.enabled,
            subscriber_buffer: toml_config.stream.subscriber_buffer.max(1),
            stream_retry_ms: toml_config.stream.retry_ms,
            store_backend: toml_config.store.backend,
            upstream_enabled: toml_config.upstream.enabled,
            upstream_query_url: toml_config.upstream.query_url,
            upstream_ingest_url: toml_config.upstream.ingest_url,
            upstream_api_key: toml_config.upstream.api_key,
            upstream_table: toml_config.upstream.table,
            upstream_timeout_ms: toml_config.upstream.timeout_ms,
            mirror_buffer: toml_config.upstream.mirror_buffer.max(1),
            mqtt_enabled: toml_config.mqtt.enabled,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_topic: toml_config.mqtt.topic,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_republish_topic: toml_config.mqtt.republish_topic,
            layout_cols: toml_config.layout.cols,
            layout_rows: toml_config.layout.rows,
            layout_margin: toml_config.layout.margin,
            layout_seed: toml_config.layout.seed,
            layout_nodes: toml_config.layout.nodes,
            metrics_interval_secs: toml_config.metrics.interval_secs.max(1),
            dashboard_url: toml_config.dashboard.url,
            dashboard_mode: toml_config.dashboard.mode,
            dashboard_poll_interval_ms: toml_config.dashboard.poll_interval_ms.max(1),
        }
    }

    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str, config_file: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)
            .with_context(|| format!("Failed to parse config file {}", config_file))?;
        Ok(Self::from_toml(toml_config, config_file))
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content, &path.display().to_string())
    }

    /// Load configuration - tries the TOML file first, falls back to defaults,
    /// then applies environment overrides
    pub fn load_from_path(path: &str) -> Self {
        let config = match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Some(port) = env::var("PORT").ok().and_then(|p| p.parse().ok()) {
            self.http_port = port;
        }
        if let Ok(key) = env::var("UPSTREAM_API_KEY") {
            if !key.is_empty() {
                self.upstream_api_key = Some(key);
            }
        }
        self
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    pub fn http_bind_address(&self) -> &str {
        &self.http_bind_address
    }

    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_bytes
    }

    pub fn stream_enabled(&self) -> bool {
        self.stream_enabled
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    pub fn stream_retry_ms(&self) -> u64 {
        self.stream_retry_ms
    }

    pub fn store_backend(&self) -> StoreBackend {
        self.store_backend
    }

    pub fn upstream_enabled(&self) -> bool {
        self.upstream_enabled
    }

    pub fn upstream_query_url(&self) -> &str {
        &self.upstream_query_url
    }

    pub fn upstream_ingest_url(&self) -> &str {
        &self.upstream_ingest_url
    }

    pub fn upstream_api_key(&self) -> Option<&str> {
        self.upstream_api_key.as_deref()
    }

    pub fn upstream_table(&self) -> &str {
        &self.upstream_table
    }

    pub fn upstream_timeout_ms(&self) -> u64 {
        self.upstream_timeout_ms
    }

    pub fn mirror_buffer(&self) -> usize {
        self.mirror_buffer
    }

    pub fn mqtt_enabled(&self) -> bool {
        self.mqtt_enabled
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_topic(&self) -> &str {
        &self.mqtt_topic
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    pub fn mqtt_republish_topic(&self) -> Option<&str> {
        self.mqtt_republish_topic.as_deref()
    }

    pub fn layout_cols(&self) -> usize {
        self.layout_cols
    }

    pub fn layout_rows(&self) -> usize {
        self.layout_rows
    }

    pub fn layout_margin(&self) -> f64 {
        self.layout_margin
    }

    pub fn layout_seed(&self) -> Option<u64> {
        self.layout_seed
    }

    pub fn layout_nodes(&self) -> &[SensorNode] {
        &self.layout_nodes
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn dashboard_url(&self) -> &str {
        &self.dashboard_url
    }

    pub fn dashboard_mode(&self) -> DashboardMode {
        self.dashboard_mode
    }

    pub fn dashboard_poll_interval_ms(&self) -> u64 {
        self.dashboard_poll_interval_ms
    }

    /// Builder method for tests and embedders to toggle push delivery
    pub fn with_stream_enabled(mut self, enabled: bool) -> Self {
        self.stream_enabled = enabled;
        self
    }

    /// Builder method for tests to pin the layout seed
    pub fn with_layout_seed(mut self, seed: u64) -> Self {
        self.layout_seed = Some(seed);
        self
    }

    /// Builder method for tests to set the HTTP port (0 picks an ephemeral port)
    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::node::NodeStatus;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.site_id(), "sensor-gateway");
        assert_eq!(config.http_port(), 3000);
        assert!(config.stream_enabled());
        assert_eq!(config.subscriber_buffer(), 16);
        assert_eq!(config.store_backend(), StoreBackend::Memory);
        assert!(!config.upstream_enabled());
        assert!(!config.mqtt_enabled());
        assert_eq!(config.layout_cols(), 5);
        assert_eq!(config.layout_rows(), 10);
        assert_eq!(config.layout_margin(), 1.0);
        assert!(config.layout_nodes().is_empty());
        assert_eq!(config.dashboard_mode(), DashboardMode::Poll);
    }

    #[test]
    fn test_builders_override_defaults() {
        let config =
            Config::default().with_http_port(0).with_layout_seed(7).with_stream_enabled(false);
        assert_eq!(config.http_port(), 0);
        assert_eq!(config.layout_seed(), Some(7));
        assert!(!config.stream_enabled());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
[http]
port = 8080

[stream]
enabled = false
"#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.http_port(), 8080);
        assert!(!config.stream_enabled());
        assert_eq!(config.stream_retry_ms(), 1000);
        assert_eq!(config.mqtt_topic(), "sensors/+/telemetry");
    }

    #[test]
    fn test_layout_nodes_parse() {
        let config = Config::from_toml_str(
            r#"
[layout]
cols = 2
rows = 1
seed = 7

[[layout.nodes]]
name = "ESP-01"
status = "active"
distance = 4.5

[[layout.nodes]]
name = "ESP-02"
status = "inactive"
distance = 9.0
"#,
            "inline",
        )
        .unwrap();

        assert_eq!(config.layout_seed(), Some(7));
        assert_eq!(config.layout_nodes().len(), 2);
        assert_eq!(config.layout_nodes()[1].status, NodeStatus::Inactive);
    }

    #[test]
    fn test_zero_buffers_are_clamped() {
        let config =
            Config::from_toml_str("[stream]\nsubscriber_buffer = 0\n", "inline").unwrap();
        assert_eq!(config.subscriber_buffer(), 1);
    }

    #[test]
    fn test_invalid_backend_is_an_error() {
        let result = Config::from_toml_str("[store]\nbackend = \"redis\"\n", "inline");
        assert!(result.is_err());
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "sensor-gateway".to_string(),
            "--config".to_string(),
            "config/prod.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/prod.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg_equals() {
        let args: Vec<String> =
            vec!["sensor-gateway".to_string(), "--config=config/lab.toml".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/lab.toml");
    }
}
