//! Airwire Mirror: keeps GUI widget state and the message bus in agreement.
//!
//! Responsibilities:
//! - routing inbound bus messages to interested callbacks by topic filter
//! - mirroring locally owned widget values onto retained state topics and
//!   applying remote updates without echoing them back
//! - caching the last known state per topic for widget initialization
//! - issuing instrument commands and publishing their correlated replies

pub mod cache;
pub mod commands;
pub mod config;
pub mod correlator;
pub mod error;
pub mod ingest;
pub mod mirror;
pub mod outbox;
pub mod payload;
pub mod reply;
pub mod router;
pub mod ui;
pub mod value;
pub mod widget;

pub use cache::{spawn_snapshot_writer, CachedState, StateCache};
pub use commands::{fill_template, CommandCatalog, CommandDeclaration, CommandService};
pub use config::MirrorConfig;
pub use correlator::{CommandCorrelator, PendingCommand, ResolvedCommand};
pub use error::{CommandError, MirrorError, MirrorResult, ReplyError, SchemaError, SnapshotError};
pub use ingest::{ingest_message, start_bus_ingest};
pub use mirror::{RemoteOutcome, WidgetBinding, WidgetStateMirror};
pub use outbox::{OutboundMessage, Outbox, OutboxReceiver};
pub use payload::{CommandPayload, ReplyPayload, Source, StatePayload};
pub use reply::{map_reply_to_fields, output_topic, OutputSchema};
pub use router::{SubscriberRouter, SubscriptionId};
pub use ui::{spawn_ui_pump, UiHandle, UiQueue};
pub use value::{ValueHolder, WidgetValue};
pub use widget::{WidgetConfig, WidgetKind};
