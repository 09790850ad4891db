use std::sync::Arc;
use std::time::Duration;

use airwire_bus::{Bus, LocalBus};
use airwire_console::config::AppConfig;
use airwire_console::node::Node;
use airwire_console::panel;
use airwire_console::proxy_sim::{self, SimulatedInstrument};
use airwire_console::telemetry::init_tracing;
use airwire_mirror::CommandCatalog;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    let cfg = AppConfig::from_env();
    init_tracing(&cfg.log_filter);

    let local_bus = Arc::new(LocalBus::new());
    let bus: Arc<dyn Bus> = local_bus.clone();
    let catalog_json =
        panel::load_catalog_json(cfg.catalog_path.as_deref()).expect("command catalog");
    let catalog = CommandCatalog::from_json(&catalog_json).expect("command catalog json");
    for (command, err) in catalog.rejected() {
        warn!(command = %command, error = %err, "command declaration rejected");
    }
    let widgets = panel::load_panel(cfg.panel_path.as_deref()).expect("panel");

    let _proxy = cfg.simulate_proxy.then(|| {
        proxy_sim::spawn(
            bus.clone(),
            &cfg.mirror,
            SimulatedInstrument::default(),
            Duration::from_millis(cfg.proxy_latency_ms),
        )
        .expect("proxy subscription")
    });

    let node = Node::start(cfg.mirror.clone(), bus, catalog).expect("node");
    let holders = node.mount_panel(&widgets).expect("panel mount");
    let queries = node.refresh_queries();

    info!(
        base = %cfg.mirror.base_topic,
        widgets = holders.len(),
        queries,
        simulate_proxy = cfg.simulate_proxy,
        snapshot = %cfg.mirror.state_snapshot.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "off".into()),
        catalog = %cfg.catalog_path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "builtin".into()),
        "starting airwire-console"
    );

    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to wait for ctrl-c");
    }
    node.shutdown();
    local_bus.close();
}
