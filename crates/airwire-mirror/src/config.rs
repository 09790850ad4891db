use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use airwire_bus::topic;

/// Settings shared by the mirror, the correlator and the command service.
///
/// Passed explicitly to every constructor; there is no process-wide instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MirrorConfig {
    pub base_topic: String,
    pub ui_drain_interval_ms: u64,
    pub command_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub proxy_inbox_topic: String,
    pub proxy_outbox_topic: String,
    pub command_root: String,
    /// Number of command path segments kept in the output namespace.
    pub command_namespace_depth: usize,
    pub reply_delimiter: char,
    /// File holding the last-known state between runs. `None` keeps the
    /// cache in memory only.
    pub state_snapshot: Option<PathBuf>,
    pub snapshot_interval_ms: u64,
}

/// Floor for every periodic task; a zero period would stall the timer.
pub const MIN_TICK: Duration = Duration::from_millis(1);

impl Default for MirrorConfig {
    fn default() -> Self {
        let base_topic = "OPEN-AIR".to_string();
        Self {
            proxy_inbox_topic: topic::join([base_topic.as_str(), "Proxy", "Tx_Inbox"]),
            proxy_outbox_topic: topic::join([base_topic.as_str(), "Proxy", "Rx_Outbox"]),
            base_topic,
            ui_drain_interval_ms: 100,
            command_timeout_ms: 10_000,
            sweep_interval_ms: 1_000,
            command_root: "yak".into(),
            command_namespace_depth: 4,
            reply_delimiter: ';',
            state_snapshot: None,
            snapshot_interval_ms: 2_000,
        }
    }
}

impl MirrorConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_topic =
            std::env::var("AIRWIRE_BASE_TOPIC").unwrap_or_else(|_| defaults.base_topic.clone());
        let proxy_inbox_topic = std::env::var("AIRWIRE_PROXY_INBOX")
            .unwrap_or_else(|_| topic::join([base_topic.as_str(), "Proxy", "Tx_Inbox"]));
        let proxy_outbox_topic = std::env::var("AIRWIRE_PROXY_OUTBOX")
            .unwrap_or_else(|_| topic::join([base_topic.as_str(), "Proxy", "Rx_Outbox"]));
        let command_root =
            std::env::var("AIRWIRE_COMMAND_ROOT").unwrap_or_else(|_| defaults.command_root.clone());
        let reply_delimiter = std::env::var("AIRWIRE_REPLY_DELIMITER")
            .ok()
            .and_then(|v| v.chars().next())
            .unwrap_or(defaults.reply_delimiter);
        Self {
            base_topic,
            ui_drain_interval_ms: env_period("AIRWIRE_UI_DRAIN_MS", defaults.ui_drain_interval_ms),
            command_timeout_ms: env_parse("AIRWIRE_COMMAND_TIMEOUT_MS", defaults.command_timeout_ms),
            sweep_interval_ms: env_period("AIRWIRE_SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
            proxy_inbox_topic,
            proxy_outbox_topic,
            command_root,
            command_namespace_depth: env_parse(
                "AIRWIRE_COMMAND_NAMESPACE_DEPTH",
                defaults.command_namespace_depth,
            ),
            reply_delimiter,
            state_snapshot: std::env::var_os("AIRWIRE_STATE_SNAPSHOT")
                .filter(|v| !v.is_empty())
                .map(PathBuf::from),
            snapshot_interval_ms: env_period(
                "AIRWIRE_SNAPSHOT_INTERVAL_MS",
                defaults.snapshot_interval_ms,
            ),
        }
    }

    pub fn ui_drain_interval(&self) -> Duration {
        Duration::from_millis(self.ui_drain_interval_ms).max(MIN_TICK)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms).max(MIN_TICK)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms).max(MIN_TICK)
    }

    /// Filter covering everything the application owns on the bus.
    pub fn state_filter(&self) -> String {
        topic::join([self.base_topic.as_str(), topic::MULTI_LEVEL])
    }

    /// Prefix under which command triggers are published.
    pub fn trigger_prefix(&self) -> String {
        topic::join([self.base_topic.as_str(), self.command_root.as_str(), "commands"])
    }

    pub fn trigger_filter(&self) -> String {
        topic::join([self.trigger_prefix().as_str(), topic::MULTI_LEVEL])
    }

    /// Namespace that receives the outputs of the command at `path_parts`.
    pub fn command_namespace(&self, path_parts: &[String]) -> String {
        let depth = self.command_namespace_depth.min(path_parts.len());
        let mut parts = vec![self.base_topic.as_str(), self.command_root.as_str()];
        parts.extend(path_parts[..depth].iter().map(String::as_str));
        topic::join(parts)
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like [`env_parse`] for periods, where zero falls back to the default.
fn env_period(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_topics_follow_base() {
        let cfg = MirrorConfig::default();
        assert_eq!(cfg.proxy_inbox_topic, "OPEN-AIR/Proxy/Tx_Inbox");
        assert_eq!(cfg.proxy_outbox_topic, "OPEN-AIR/Proxy/Rx_Outbox");
        assert_eq!(cfg.state_filter(), "OPEN-AIR/#");
        assert_eq!(cfg.trigger_filter(), "OPEN-AIR/yak/commands/#");
    }

    #[test]
    fn zero_periods_are_floored() {
        let cfg = MirrorConfig {
            ui_drain_interval_ms: 0,
            sweep_interval_ms: 0,
            snapshot_interval_ms: 0,
            ..MirrorConfig::default()
        };
        assert_eq!(cfg.ui_drain_interval(), MIN_TICK);
        assert_eq!(cfg.sweep_interval(), MIN_TICK);
        assert_eq!(cfg.snapshot_interval(), MIN_TICK);
    }

    #[test]
    fn zero_period_from_env_keeps_default() {
        std::env::set_var("AIRWIRE_TEST_ZERO_PERIOD", "0");
        std::env::set_var("AIRWIRE_TEST_SHORT_PERIOD", "25");
        assert_eq!(env_period("AIRWIRE_TEST_ZERO_PERIOD", 100), 100);
        assert_eq!(env_period("AIRWIRE_TEST_SHORT_PERIOD", 100), 25);
        assert_eq!(env_period("AIRWIRE_TEST_UNSET_PERIOD", 100), 100);
    }

    #[test]
    fn command_namespace_truncates_to_depth() {
        let cfg = MirrorConfig::default();
        let parts: Vec<String> = ["Bandwidth", "nab", "settings", "scpi", "Execute", "trigger"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(
            cfg.command_namespace(&parts),
            "OPEN-AIR/yak/Bandwidth/nab/settings/scpi"
        );
        assert_eq!(
            cfg.command_namespace(&parts[..2]),
            "OPEN-AIR/yak/Bandwidth/nab"
        );
    }
}
