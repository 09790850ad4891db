//! Stand-in for the instrument proxy: takes SCPI commands from the proxy
//! inbox, keeps the settings they write, and answers queries on the proxy
//! outbox after a configurable latency.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use airwire_bus::{Bus, BusResult};
use airwire_mirror::{CommandPayload, MirrorConfig, ReplyPayload};
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SimulatedInstrument {
    settings: Arc<Mutex<HashMap<String, String>>>,
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        let settings = [
            (":SENS:FREQ:CENT", "915000000"),
            (":SENS:FREQ:SPAN", "26000000"),
            (":SENS:BAND", "100000"),
            (":SENS:BAND:VID", "300000"),
            (":SENS:BAND:VID:AUTO", "1"),
            (":INIT:CONT", "1"),
            (":SENS:SWE:TIME", "0.05"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Self {
            settings: Arc::new(Mutex::new(settings)),
        }
    }
}

impl SimulatedInstrument {
    /// Executes one command line and returns the reply for queries. Several
    /// `;`-separated commands may share a line; their answers are joined the
    /// same way.
    pub fn execute(&self, line: &str) -> Option<String> {
        let mut answers = Vec::new();
        let mut settings = self.settings.lock();
        for command in line.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            if let Some(header) = command.strip_suffix('?') {
                answers.push(settings.get(header).cloned().unwrap_or_else(|| "0".into()));
            } else if let Some((header, value)) = command.split_once(' ') {
                settings.insert(header.to_string(), value.trim().to_string());
            }
        }
        (!answers.is_empty()).then(|| answers.join(";"))
    }

    pub fn setting(&self, header: &str) -> Option<String> {
        self.settings.lock().get(header).cloned()
    }
}

/// Subscribes to the proxy inbox and answers on the outbox.
pub fn spawn(
    bus: Arc<dyn Bus>,
    config: &MirrorConfig,
    instrument: SimulatedInstrument,
    latency: Duration,
) -> BusResult<JoinHandle<()>> {
    let mut inbox = bus.subscribe(&config.proxy_inbox_topic)?;
    let outbox_topic = config.proxy_outbox_topic.clone();
    info!(target = "proxy", inbox = %config.proxy_inbox_topic, outbox = %outbox_topic, "simulated proxy listening");
    Ok(tokio::spawn(async move {
        loop {
            let msg = match inbox.recv().await {
                Ok(msg) => msg,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(target = "proxy", skipped, "proxy inbox lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let command: CommandPayload = match serde_json::from_slice(&msg.payload) {
                Ok(command) => command,
                Err(err) => {
                    warn!(target = "proxy", error = %err, "ignoring malformed command");
                    continue;
                }
            };
            let answer = instrument.execute(&command.command);
            debug!(target = "proxy", command = %command.command, query = command.query, "executed");
            if !command.query {
                continue;
            }
            let Some(response) = answer else {
                continue;
            };
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            let reply = ReplyPayload {
                response: Some(response),
                command: Some(command.command),
                correlation_id: Some(command.correlation_id),
            };
            let published = serde_json::to_vec(&reply)
                .map_err(|err| err.to_string())
                .and_then(|bytes| {
                    bus.publish(&outbox_topic, Bytes::from(bytes), false)
                        .map_err(|err| err.to_string())
                });
            if let Err(err) = published {
                warn!(target = "proxy", error = %err, "failed to publish reply");
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_are_remembered_and_queries_answered() {
        let instrument = SimulatedInstrument::default();
        assert_eq!(instrument.execute(":SENS:FREQ:CENT 100MHZ"), None);
        assert_eq!(instrument.setting(":SENS:FREQ:CENT").as_deref(), Some("100MHZ"));
        assert_eq!(
            instrument.execute(":SENS:FREQ:CENT?").as_deref(),
            Some("100MHZ")
        );
        assert_eq!(
            instrument
                .execute(":SENS:BAND?;:SENS:BAND:VID?;:SENS:BAND:VID:AUTO?;:INIT:CONT?;:SENS:SWE:TIME?")
                .as_deref(),
            Some("100000;300000;1;1;0.05")
        );
        assert_eq!(instrument.execute(":UNKNOWN?").as_deref(), Some("0"));
    }
}
