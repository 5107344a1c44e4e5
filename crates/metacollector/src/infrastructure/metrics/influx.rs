use std::collections::BTreeMap;

use influxdb_line_protocol::LineProtocolBuilder;

/// Field value of a line protocol point
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    String(String),
    Integer(i64),
    UnsignedInteger(u64),
    Float(f64),
    Boolean(bool),
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
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

impl From<usize> for FieldValue {
    fn from(value: usize) -> Self {
        FieldValue::UnsignedInteger(value as u64)
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

/// One measurement with its tags and fields, both kept sorted.
#[derive(Debug, Clone, Default)]
pub struct Point {
    measurement: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
}

impl Point {
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            ..Default::default()
        }
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Encode as one line of InfluxDB line protocol, without the trailing newline.
    pub fn encode(&self, timestamp: i64) -> String {
        let mut builder = LineProtocolBuilder::new().measurement(&self.measurement);
        for (key, value) in &self.tags {
            builder = builder.tag(key, value);
        }

        // the first field moves the builder into its after-field state
        let mut fields = self.fields.iter();
        let mut line = match fields.next() {
            Some((key, value)) => match value {
                FieldValue::String(s) => builder.field(key, s.as_str()),
                FieldValue::Integer(i) => builder.field(key, *i),
                FieldValue::UnsignedInteger(u) => builder.field(key, *u),
                FieldValue::Float(f) => builder.field(key, *f),
                FieldValue::Boolean(b) => builder.field(key, *b),
            },
            None => builder.field("_empty", true),
        };
        for (key, value) in fields {
            line = match value {
                FieldValue::String(s) => line.field(key, s.as_str()),
                FieldValue::Integer(i) => line.field(key, *i),
                FieldValue::UnsignedInteger(u) => line.field(key, *u),
                FieldValue::Float(f) => line.field(key, *f),
                FieldValue::Boolean(b) => line.field(key, *b),
            };
        }

        let bytes = line.timestamp(timestamp).close_line().build();
        String::from_utf8_lossy(&bytes).trim_end().to_string()
    }
}
