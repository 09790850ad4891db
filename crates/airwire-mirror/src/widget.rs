//! Declarative widget descriptors and the type-tag dispatch that decides how
//! an inbound value is coerced before it reaches a widget.

use serde::{Deserialize, Deserializer};

use crate::error::{MirrorError, MirrorResult};
use crate::value::WidgetValue;

const DEFAULT_MIN: f64 = -1e9;
const DEFAULT_MAX: f64 = 1e9;

/// Widget type tag as written in the layout descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(from = "String")]
pub enum WidgetKind {
    Toggle,
    Fader,
    Slider,
    Knob,
    VuMeter,
    NeedleVuMeter,
    Panner,
    Table,
    #[default]
    Other,
}

impl WidgetKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "_GuiButtonToggle" => WidgetKind::Toggle,
            "_CustomFader" => WidgetKind::Fader,
            "_sliderValue" => WidgetKind::Slider,
            "_Knob" => WidgetKind::Knob,
            "_VUMeter" => WidgetKind::VuMeter,
            "_NeedleVUMeter" => WidgetKind::NeedleVuMeter,
            "_Panner" => WidgetKind::Panner,
            "OcaTable" => WidgetKind::Table,
            _ => WidgetKind::Other,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            WidgetKind::Fader
                | WidgetKind::Slider
                | WidgetKind::Knob
                | WidgetKind::VuMeter
                | WidgetKind::NeedleVuMeter
                | WidgetKind::Panner
        )
    }
}

impl From<String> for WidgetKind {
    fn from(tag: String) -> Self {
        WidgetKind::from_tag(&tag)
    }
}

/// Descriptor used when no retained value exists yet.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct WidgetConfig {
    #[serde(rename = "type", default)]
    pub kind: WidgetKind,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub min: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub max: Option<f64>,
    #[serde(rename = "value", default)]
    pub default: Option<WidgetValue>,
}

impl WidgetConfig {
    pub fn new(kind: WidgetKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_default(mut self, value: impl Into<WidgetValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Converts an inbound value into what this widget accepts.
    pub fn coerce(&self, value: &WidgetValue) -> MirrorResult<WidgetValue> {
        match self.kind {
            WidgetKind::Toggle => coerce_toggle(value)
                .map(WidgetValue::Bool)
                .ok_or_else(|| self.reject(value)),
            kind if kind.is_numeric() => {
                let number = as_number(value).ok_or_else(|| self.reject(value))?;
                let min = self.min.unwrap_or(DEFAULT_MIN);
                let max = self.max.unwrap_or(DEFAULT_MAX);
                Ok(WidgetValue::Number(number.max(min).min(max)))
            }
            _ => Ok(value.clone()),
        }
    }

    fn reject(&self, value: &WidgetValue) -> MirrorError {
        MirrorError::Coerce {
            kind: self.kind,
            value: value.to_string(),
        }
    }
}

fn coerce_toggle(value: &WidgetValue) -> Option<bool> {
    if let WidgetValue::Bool(b) = value {
        return Some(*b);
    }
    match value.to_string().to_lowercase().as_str() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn as_number(value: &WidgetValue) -> Option<f64> {
    match value {
        WidgetValue::Number(n) if n.is_finite() => Some(*n),
        WidgetValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        WidgetValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
        _ => None,
    }
}

/// Bounds appear both as numbers and as numeric strings in descriptors.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(f64),
        Text(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid number {s:?}"))),
    }
}
