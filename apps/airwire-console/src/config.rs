use std::path::PathBuf;

use airwire_mirror::MirrorConfig;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub log_filter: String,
    pub mirror: MirrorConfig,
    pub catalog_path: Option<PathBuf>,
    pub panel_path: Option<PathBuf>,
    pub simulate_proxy: bool,
    pub proxy_latency_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let log_filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,airwire_mirror=debug".into());
        let mirror = MirrorConfig::from_env();
        let catalog_path = std::env::var("AIRWIRE_CATALOG").ok().map(PathBuf::from);
        let panel_path = std::env::var("AIRWIRE_PANEL").ok().map(PathBuf::from);
        let simulate_proxy = std::env::var("AIRWIRE_SIMULATE_PROXY")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes" | "on"))
            .unwrap_or(true);
        let proxy_latency_ms = std::env::var("AIRWIRE_PROXY_LATENCY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(20);
        Self {
            log_filter,
            mirror,
            catalog_path,
            panel_path,
            simulate_proxy,
            proxy_latency_ms,
        }
    }
}
