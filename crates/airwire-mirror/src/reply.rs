//! Positional instrument replies and the named fields they carry.

use airwire_bus::topic;
use serde::{Deserialize, Serialize};

use crate::error::{ReplyError, SchemaError};

/// Ordered output field names of one command, as declared in the catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputSchema(Vec<String>);

impl OutputSchema {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(fields.into_iter().map(Into::into).collect())
    }

    pub fn fields(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Checks that every field is declared once and, when the device's reply
    /// order is known, that the declaration follows it.
    pub fn validate(&self, command: &str, reply_order: Option<&[String]>) -> Result<(), SchemaError> {
        for (idx, field) in self.0.iter().enumerate() {
            if self.0[..idx].contains(field) {
                return Err(SchemaError::DuplicateField {
                    command: command.to_string(),
                    field: field.clone(),
                });
            }
        }
        match reply_order {
            Some(order) if order != self.0.as_slice() => Err(SchemaError::OrderMismatch {
                command: command.to_string(),
                declared: self.0.clone(),
                reply_order: order.to_vec(),
            }),
            _ => Ok(()),
        }
    }
}

/// Splits `raw` on `delimiter` and pairs each trimmed part with the schema
/// field at the same position. A count mismatch maps nothing.
pub fn map_reply_to_fields(
    raw: &str,
    schema: &OutputSchema,
    delimiter: char,
) -> Result<Vec<(String, String)>, ReplyError> {
    let parts: Vec<&str> = raw.split(delimiter).map(str::trim).collect();
    if parts.len() != schema.len() {
        return Err(ReplyError::FieldCountMismatch {
            expected: schema.len(),
            received: parts.len(),
        });
    }
    Ok(schema
        .fields()
        .iter()
        .cloned()
        .zip(parts.into_iter().map(str::to_string))
        .collect())
}

/// `<namespace>/Outputs/<field>/value`
pub fn output_topic(namespace: &str, field: &str) -> String {
    topic::join([namespace, "Outputs", field, "value"])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bandwidth() -> OutputSchema {
        OutputSchema::new([
            "RBW_Hz",
            "VBW_Hz",
            "VBW_Auto_On",
            "Continuous_Mode_On",
            "Sweep_Time_s",
        ])
    }

    #[test]
    fn maps_trimmed_parts_in_declared_order() {
        let fields = map_reply_to_fields("1000; 3000 ;1;0;0.05", &bandwidth(), ';').unwrap();
        assert_eq!(fields.len(), 5);
        assert_eq!(fields[0], ("RBW_Hz".to_string(), "1000".to_string()));
        assert_eq!(fields[1].1, "3000");
        assert_eq!(fields[4], ("Sweep_Time_s".to_string(), "0.05".to_string()));
    }

    #[test]
    fn count_mismatch_maps_nothing() {
        let err = map_reply_to_fields("1000;3000", &bandwidth(), ';').unwrap_err();
        assert!(matches!(
            err,
            ReplyError::FieldCountMismatch {
                expected: 5,
                received: 2
            }
        ));
    }

    #[test]
    fn single_field_reply_without_delimiter() {
        let schema = OutputSchema::new(["Center_Hz"]);
        let fields = map_reply_to_fields(" 1.5E9\n", &schema, ';').unwrap();
        assert_eq!(fields, [("Center_Hz".to_string(), "1.5E9".to_string())]);
    }

    #[test]
    fn validate_flags_order_disagreement() {
        let reply_order: Vec<String> = [
            "RBW_Hz",
            "VBW_Hz",
            "VBW_Auto_On",
            "Sweep_Time_s",
            "Continuous_Mode_On",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        let err = bandwidth()
            .validate("Bandwidth/nab", Some(&reply_order))
            .unwrap_err();
        assert!(matches!(err, SchemaError::OrderMismatch { .. }));
        assert!(bandwidth()
            .validate("Bandwidth/nab", Some(bandwidth().fields()))
            .is_ok());
        assert!(bandwidth().validate("Bandwidth/nab", None).is_ok());
    }

    #[test]
    fn validate_flags_duplicates() {
        let schema = OutputSchema::new(["a", "b", "a"]);
        assert_eq!(
            schema.validate("cmd", None),
            Err(SchemaError::DuplicateField {
                command: "cmd".into(),
                field: "a".into()
            })
        );
    }

    #[test]
    fn output_topic_layout() {
        assert_eq!(
            output_topic("OPEN-AIR/yak/Bandwidth/nab/NAB_bandwidth_settings/scpi_details", "RBW_Hz"),
            "OPEN-AIR/yak/Bandwidth/nab/NAB_bandwidth_settings/scpi_details/Outputs/RBW_Hz/value"
        );
    }
}
