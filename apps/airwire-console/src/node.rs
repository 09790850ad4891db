use std::path::PathBuf;
use std::sync::Arc;

use airwire_bus::Bus;
use airwire_mirror::{
    spawn_snapshot_writer, spawn_ui_pump, start_bus_ingest, CommandCatalog, CommandCorrelator, CommandService,
    MirrorConfig, Outbox, StateCache, SubscriberRouter, UiQueue, ValueHolder, WidgetStateMirror,
};
use serde_json::Map;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::ConsoleError;
use crate::panel::PanelWidget;

/// One GUI session attached to the bus: state mirror, command service and
/// the background tasks that drive them.
pub struct Node {
    pub mirror: WidgetStateMirror,
    pub commands: CommandService,
    pub router: SubscriberRouter,
    cache: Arc<StateCache>,
    snapshot: Option<PathBuf>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub fn start(
        config: MirrorConfig,
        bus: Arc<dyn Bus>,
        catalog: CommandCatalog,
    ) -> Result<Self, ConsoleError> {
        let router = SubscriberRouter::new();
        let cache = Arc::new(StateCache::new());
        if let Some(path) = &config.state_snapshot {
            if let Err(err) = cache.load(path) {
                warn!(target = "console", error = %err, "starting without state snapshot");
            }
        }
        let (outbox, outbox_rx) = Outbox::channel();
        let (ui, ui_queue) = UiQueue::channel();

        let mirror = WidgetStateMirror::new(
            config.clone(),
            bus.clone(),
            router.clone(),
            cache.clone(),
            outbox.clone(),
            ui,
        );
        let correlator = CommandCorrelator::new(config.command_timeout());
        let commands = CommandService::new(config.clone(), catalog, correlator.clone(), outbox);
        commands.attach(&router)?;

        let mut tasks = vec![
            outbox_rx.spawn(bus.clone()),
            start_bus_ingest(bus, &config.state_filter(), cache.clone(), router.clone())?,
            spawn_ui_pump(ui_queue, config.ui_drain_interval()),
            correlator.spawn_sweeper(config.sweep_interval()),
        ];
        if let Some(path) = &config.state_snapshot {
            tasks.push(spawn_snapshot_writer(
                cache.clone(),
                path.clone(),
                config.snapshot_interval(),
            ));
        }
        info!(
            target = "console",
            session = %mirror.session_id(),
            base = %config.base_topic,
            commands = commands.catalog().len(),
            restored = cache.len(),
            "node started"
        );
        Ok(Self {
            mirror,
            commands,
            router,
            snapshot: config.state_snapshot.clone(),
            cache,
            tasks,
        })
    }

    /// Registers and initializes every widget of `panel`.
    pub fn mount_panel(&self, panel: &[PanelWidget]) -> Result<Vec<ValueHolder>, ConsoleError> {
        let mut holders = Vec::with_capacity(panel.len());
        for widget in panel {
            let holder = self.mirror.register(
                &widget.id,
                widget.initial_value(),
                &widget.namespace(),
                widget.config.clone(),
            )?;
            let path = widget.id.clone();
            holder.subscribe(move |value| {
                info!(target = "console", path = %path, value = %value, "widget updated");
            });
            let restored = self.mirror.initialize(&widget.id)?;
            debug!(target = "console", path = %widget.id, restored, "widget mounted");
            holders.push(holder);
        }
        Ok(holders)
    }

    /// Issues every query in the catalog that needs no parameters. Returns
    /// how many were sent.
    pub fn refresh_queries(&self) -> usize {
        let queries: Vec<Vec<String>> = self
            .commands
            .catalog()
            .iter()
            .filter(|(_, declaration)| declaration.is_query)
            .map(|(path, _)| path.split('/').map(String::from).collect())
            .collect();
        let params = Map::new();
        let mut sent = 0;
        for path_parts in queries {
            let path = path_parts.join("/");
            match self.commands.issue(path_parts, &params) {
                Ok(_) => sent += 1,
                Err(err) => warn!(target = "console", command = %path, error = %err, "query not sent"),
            }
        }
        sent
    }

    pub fn cache(&self) -> &StateCache {
        &self.cache
    }

    /// Stops the background tasks and writes a final state snapshot.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        if let Some(path) = &self.snapshot {
            if let Err(err) = self.cache.save(path) {
                warn!(target = "console", error = %err, "failed to save state snapshot");
            }
        }
        info!(target = "console", "node stopped");
    }
}
