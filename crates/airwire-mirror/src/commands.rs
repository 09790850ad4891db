//! Instrument command issuing and reply publishing.
//!
//! Declarations live in a JSON tree; a node carrying `scpi_template` is a
//! command and its position in the tree is its path. A trigger published on
//! `<base>/<root>/commands/<path...>` fills the template from the trigger's
//! JSON object and sends it to the proxy inbox. Replies from the proxy outbox
//! are correlated and their fields published retained under the command's
//! `Outputs` namespace.

use std::collections::HashMap;
use std::sync::Arc;

use airwire_bus::topic::{self, TopicError};
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::correlator::CommandCorrelator;
use crate::error::{CommandError, ReplyError, SchemaError};
use crate::outbox::Outbox;
use crate::payload::{unix_seconds, CommandPayload, ReplyPayload, Source, StatePayload};
use crate::reply::{map_reply_to_fields, output_topic, OutputSchema};
use crate::router::{SubscriberRouter, SubscriptionId};
use crate::value::WidgetValue;

const TEMPLATE_KEY: &str = "scpi_template";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandDeclaration {
    pub scpi_template: String,
    #[serde(default)]
    pub is_query: bool,
    #[serde(rename = "Outputs", default, deserialize_with = "output_names")]
    pub outputs: OutputSchema,
    /// Field order the device is known to reply in, when it has been checked.
    #[serde(default)]
    pub reply_order: Option<Vec<String>>,
}

impl CommandDeclaration {
    pub fn validate(&self, command: &str) -> Result<(), SchemaError> {
        self.outputs.validate(command, self.reply_order.as_deref())
    }
}

/// `Outputs` is an object whose keys, in document order, are the field names.
fn output_names<'de, D>(deserializer: D) -> Result<OutputSchema, D::Error>
where
    D: Deserializer<'de>,
{
    let outputs = Option::<Map<String, Value>>::deserialize(deserializer)?;
    Ok(outputs
        .map(|map| OutputSchema::new(map.keys().cloned()))
        .unwrap_or_default())
}

/// Validated command declarations keyed by their slash-joined path.
#[derive(Debug, Default)]
pub struct CommandCatalog {
    commands: HashMap<String, CommandDeclaration>,
    rejected: Vec<(String, SchemaError)>,
}

impl CommandCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let tree: Value = serde_json::from_str(json)?;
        let mut catalog = Self::new();
        catalog.load_tree(&tree, &mut Vec::new());
        info!(
            target = "commands",
            commands = catalog.len(),
            rejected = catalog.rejected.len(),
            "command catalog loaded"
        );
        Ok(catalog)
    }

    fn load_tree(&mut self, node: &Value, path: &mut Vec<String>) {
        let Value::Object(map) = node else {
            return;
        };
        if map.contains_key(TEMPLATE_KEY) {
            let key = path.join("/");
            match CommandDeclaration::deserialize(node) {
                Ok(declaration) => {
                    let _ = self.insert(&key, declaration);
                }
                Err(err) => warn!(
                    target = "commands",
                    command = %key,
                    error = %err,
                    "skipping malformed declaration"
                ),
            }
            return;
        }
        for (name, child) in map {
            path.push(name.clone());
            self.load_tree(child, path);
            path.pop();
        }
    }

    /// Adds a declaration after validating its output schema. Rejected
    /// declarations are remembered for reporting.
    pub fn insert(&mut self, path: &str, declaration: CommandDeclaration) -> Result<(), SchemaError> {
        if let Err(err) = declaration.validate(path) {
            warn!(target = "commands", command = path, error = %err, "rejecting declaration");
            self.rejected.push((path.to_string(), err.clone()));
            return Err(err);
        }
        self.commands.insert(path.to_string(), declaration);
        Ok(())
    }

    pub fn get(&self, path_parts: &[String]) -> Option<&CommandDeclaration> {
        self.commands.get(&path_parts.join("/"))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &CommandDeclaration)> {
        self.commands
            .iter()
            .map(|(path, declaration)| (path.as_str(), declaration))
    }

    pub fn rejected(&self) -> &[(String, SchemaError)] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Substitutes `{name}` placeholders from `params`. `{{` and `}}` produce
/// literal braces.
pub fn fill_template(template: &str, params: &Map<String, Value>) -> Result<String, CommandError> {
    let malformed = || CommandError::MalformedTemplate(template.to_string());
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '}' => return Err(malformed()),
            '{' => {
                let mut name = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some('{') | None => return Err(malformed()),
                        Some(c) => name.push(c),
                    }
                }
                let name = name.trim();
                if name.is_empty() {
                    return Err(malformed());
                }
                match params.get(name) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        return Err(CommandError::MissingPlaceholder {
                            template: template.to_string(),
                            placeholder: name.to_string(),
                        })
                    }
                }
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Issues catalog commands through the correlator and publishes the fields of
/// their replies.
#[derive(Clone)]
pub struct CommandService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    config: MirrorConfig,
    catalog: CommandCatalog,
    correlator: CommandCorrelator,
    outbox: Outbox,
}

impl CommandService {
    pub fn new(
        config: MirrorConfig,
        catalog: CommandCatalog,
        correlator: CommandCorrelator,
        outbox: Outbox,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                config,
                catalog,
                correlator,
                outbox,
            }),
        }
    }

    pub fn catalog(&self) -> &CommandCatalog {
        &self.inner.catalog
    }

    pub fn correlator(&self) -> &CommandCorrelator {
        &self.inner.correlator
    }

    /// Builds the command at `path_parts`, registers it as pending and queues
    /// it for the proxy. Returns the correlation id.
    pub fn issue(&self, path_parts: Vec<String>, params: &Map<String, Value>) -> Result<String, CommandError> {
        let declaration = self
            .inner
            .catalog
            .get(&path_parts)
            .ok_or_else(|| CommandError::UnknownCommand(path_parts.join("/")))?;
        let command = fill_template(&declaration.scpi_template, params)?;
        let query = declaration.is_query;
        // Only queries are answered, so only they wait for a reply.
        let correlation_id = if query {
            self.inner
                .correlator
                .submit(path_parts, declaration.outputs.clone())
        } else {
            self.inner.correlator.next_id()
        };

        let payload = CommandPayload {
            command,
            query,
            correlation_id: correlation_id.clone(),
        };
        let published = serde_json::to_vec(&payload)
            .map_err(CommandError::from)
            .and_then(|bytes| {
                self.inner
                    .outbox
                    .publish(&self.inner.config.proxy_inbox_topic, bytes.into(), false)
                    .map_err(|_| CommandError::OutboxClosed)
            });
        if let Err(err) = published {
            self.inner.correlator.cancel(&correlation_id);
            return Err(err);
        }
        debug!(
            target = "commands",
            command = %payload.command,
            query,
            correlation_id = %correlation_id,
            "command sent to proxy"
        );
        Ok(correlation_id)
    }

    /// Handles a trigger published under the trigger prefix. An empty payload
    /// means no parameters.
    pub fn on_trigger(&self, trigger: &str, payload: &[u8]) -> Result<String, CommandError> {
        let prefix = self.inner.config.trigger_prefix();
        let path = trigger
            .strip_prefix(prefix.as_str())
            .and_then(|rest| rest.strip_prefix(topic::DELIMITER))
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| CommandError::UnknownCommand(trigger.to_string()))?;
        let path_parts: Vec<String> = path.split(topic::DELIMITER).map(String::from).collect();

        let params = if payload.iter().all(u8::is_ascii_whitespace) {
            Map::new()
        } else {
            match serde_json::from_slice::<Value>(payload)? {
                Value::Object(map) => map,
                _ => return Err(CommandError::ParamsNotObject),
            }
        };
        self.issue(path_parts, &params)
    }

    /// Correlates a proxy reply and publishes each mapped field. Returns the
    /// topics published; on any error nothing is published.
    pub fn on_reply(&self, payload: &[u8]) -> Result<Vec<String>, ReplyError> {
        let reply: ReplyPayload = serde_json::from_slice(payload)?;
        let correlation_id = reply
            .correlation_id
            .ok_or(ReplyError::MissingField("correlation_id"))?;
        let response = reply
            .response
            .filter(|r| !r.is_empty())
            .ok_or(ReplyError::MissingField("response"))?;

        let resolved = self
            .inner
            .correlator
            .resolve(&correlation_id, &response)
            .ok_or_else(|| ReplyError::UnknownCorrelation(correlation_id.clone()))?;
        let fields = map_reply_to_fields(
            &resolved.raw_reply,
            &resolved.output_schema,
            self.inner.config.reply_delimiter,
        )?;

        let namespace = self.inner.config.command_namespace(&resolved.path_parts);
        let mut published = Vec::with_capacity(fields.len());
        for (field, raw) in fields {
            let topic = output_topic(&namespace, &field);
            let state = StatePayload {
                val: field_value(&raw),
                src: Source::Remote,
                ts: Some(unix_seconds()),
                session: None,
            };
            self.inner
                .outbox
                .publish(&topic, state.encode()?, true)
                .map_err(|_| ReplyError::OutboxClosed)?;
            published.push(topic);
        }
        debug!(
            target = "commands",
            correlation_id = %correlation_id,
            command = reply.command.as_deref().unwrap_or_default(),
            fields = published.len(),
            "reply published"
        );
        Ok(published)
    }

    /// Routes triggers and proxy replies to this service.
    pub fn attach(&self, router: &SubscriberRouter) -> Result<[SubscriptionId; 2], TopicError> {
        let service = self.clone();
        let triggers = router.subscribe(
            &self.inner.config.trigger_filter(),
            move |trigger: &str, payload: &[u8]| {
                if let Err(err) = service.on_trigger(trigger, payload) {
                    warn!(target = "commands", trigger, error = %err, "dropping command trigger");
                }
            },
        )?;
        let service = self.clone();
        let replies = router.subscribe(
            &self.inner.config.proxy_outbox_topic,
            move |_: &str, payload: &[u8]| {
                if let Err(err) = service.on_reply(payload) {
                    warn!(target = "commands", error = %err, "dropping proxy reply");
                }
            },
        )?;
        Ok([triggers, replies])
    }
}

/// Numeric replies become numbers; anything else stays text.
fn field_value(raw: &str) -> WidgetValue {
    match raw.parse::<f64>() {
        Ok(n) if n.is_finite() => WidgetValue::Number(n),
        _ => WidgetValue::Text(raw.to_string()),
    }
}
