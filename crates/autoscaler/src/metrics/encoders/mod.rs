use std::collections::BTreeMap;

pub mod influx;
pub mod json;

/// A single field value of a metrics line
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        FieldValue::UnsignedInteger(value)
    }
}

impl From<u32> for FieldValue {
    fn from(value: u32) -> Self {
        FieldValue::UnsignedInteger(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Boolean(value)
    }
}

/// Tags and fields are kept ordered so encoded lines are stable.
pub type Tags = BTreeMap<&'static str, String>;
pub type Fields = BTreeMap<&'static str, FieldValue>;

/// Encodes one measurement into a single output line
pub trait MetricsEncoder: Send + Sync {
    fn encode_metrics(&self, measurement: &str, tags: &Tags, fields: &Fields, timestamp: i64)
        -> String;
}

/// Creates the encoder for `format`; anything but "json" selects line protocol.
pub fn create_encoder(format: &str) -> Box<dyn MetricsEncoder> {
    match format.to_lowercase().as_str() {
        "json" => Box::new(json::JsonEncoder),
        _ => Box::new(influx::InfluxEncoder),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_falls_back_to_line_protocol() {
        let encoder = create_encoder("prometheus");
        let mut fields = Fields::new();
        fields.insert("value", 1u64.into());
        let line = encoder.encode_metrics("m", &Tags::new(), &fields, 1);
        assert!(line.starts_with("m value=1u"), "got {line}");
    }

    #[test]
    fn json_format_is_case_insensitive() {
        let encoder = create_encoder("JSON");
        let mut fields = Fields::new();
        fields.insert("value", 1u64.into());
        let line = encoder.encode_metrics("m", &Tags::new(), &fields, 1);
        assert!(line.starts_with('{'), "got {line}");
    }
}
