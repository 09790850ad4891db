//! Panel descriptors: which widgets exist, where they sit in the GUI tree,
//! and how they are configured.

use std::path::{Path, PathBuf};

use airwire_bus::topic;
use airwire_mirror::{WidgetConfig, WidgetValue};
use serde::Deserialize;

use crate::error::ConsoleError;

/// Root of the GUI tree that panel locations are written against.
pub const GUI_ROOT: &str = "gui";

#[derive(Debug, Clone, Deserialize)]
pub struct PanelWidget {
    pub location: PathBuf,
    pub id: String,
    #[serde(flatten)]
    pub config: WidgetConfig,
}

impl PanelWidget {
    pub fn namespace(&self) -> String {
        topic::derive_namespace(&self.location, Path::new(GUI_ROOT))
    }

    pub fn initial_value(&self) -> WidgetValue {
        self.config
            .default
            .clone()
            .unwrap_or(WidgetValue::Number(0.0))
    }
}

pub fn parse_panel(json: &str) -> Result<Vec<PanelWidget>, ConsoleError> {
    serde_json::from_str(json).map_err(|source| ConsoleError::Json {
        what: "panel".into(),
        source,
    })
}

pub fn load_panel(path: Option<&Path>) -> Result<Vec<PanelWidget>, ConsoleError> {
    match path {
        Some(path) => parse_panel(&read(path)?),
        None => parse_panel(DEMO_PANEL),
    }
}

pub fn load_catalog_json(path: Option<&Path>) -> Result<String, ConsoleError> {
    match path {
        Some(path) => read(path),
        None => Ok(DEMO_CATALOG.to_string()),
    }
}

fn read(path: &Path) -> Result<String, ConsoleError> {
    std::fs::read_to_string(path).map_err(|source| ConsoleError::Io {
        path: path.display().to_string(),
        source,
    })
}

pub const DEMO_PANEL: &str = r#"[
    {"location": "gui/display/1_Frequency/left_controls", "id": "Center_Freq", "type": "_CustomFader", "min": 9000, "max": 6000000000, "value": 915000000},
    {"location": "gui/display/1_Frequency/left_controls", "id": "Span", "type": "_Knob", "min": "0", "max": "6000000000", "value": 26000000},
    {"location": "gui/display/2_Amplitude/right_controls", "id": "Ref_Level", "type": "_sliderValue", "min": -150, "max": 30, "value": -20},
    {"location": "gui/display/2_Amplitude/right_controls", "id": "Preamp", "type": "_GuiButtonToggle", "value": false},
    {"location": "gui/display/3_Markers", "id": "Marker_Table", "type": "OcaTable", "value": {}},
    {"location": "gui/yak/Frequency/center/settings/scpi", "id": "Outputs/Center_Hz/value", "type": "_VUMeter", "min": 0, "max": 6000000000},
    {"location": "gui/yak/Bandwidth/nab/NAB_bandwidth_settings/scpi_details", "id": "Outputs/RBW_Hz/value", "type": "label"}
]"#;

pub const DEMO_CATALOG: &str = r#"{
    "Frequency": {
        "center": {
            "settings": {
                "scpi": {
                    "set": {"scpi_template": ":SENS:FREQ:CENT {value}", "is_query": false},
                    "get": {"scpi_template": ":SENS:FREQ:CENT?", "is_query": true, "Outputs": {"Center_Hz": {}}}
                }
            }
        }
    },
    "Bandwidth": {
        "nab": {
            "NAB_bandwidth_settings": {
                "scpi_details": {
                    "Execute Command": {
                        "scpi_template": ":SENS:BAND?;:SENS:BAND:VID?;:SENS:BAND:VID:AUTO?;:INIT:CONT?;:SENS:SWE:TIME?",
                        "is_query": true,
                        "Outputs": {
                            "RBW_Hz": {},
                            "VBW_Hz": {},
                            "VBW_Auto_On": {},
                            "Continuous_Mode_On": {},
                            "Sweep_Time_s": {}
                        },
                        "reply_order": ["RBW_Hz", "VBW_Hz", "VBW_Auto_On", "Continuous_Mode_On", "Sweep_Time_s"]
                    }
                }
            }
        }
    }
}"#;
