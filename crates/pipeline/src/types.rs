//! Shared value types for the pipeline domain.
//!
//! Unlike the newtype identifiers in [`crate::identifiers`], these types carry
//! the data that flows between operators ([`PortValue`]) and the typed slot
//! descriptors that constrain it ([`Port`], [`PortType`]).

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::PortKey;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// The closed set of data types that can flow between operator ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortType {
    /// Free-form text.
    Text,
    /// Structured JSON (object or array).
    Json,
    /// A collection of encoded images.
    Images,
    /// A binary document (typically PDF bytes).
    PdfBytes,
    /// A list of card-shaped JSON objects.
    Cards,
}

impl std::fmt::Display for PortType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PortType::Text => "text",
            PortType::Json => "json",
            PortType::Images => "images",
            PortType::PdfBytes => "pdf_bytes",
            PortType::Cards => "cards",
        };
        f.write_str(name)
    }
}

/// A named, typed input or output slot on an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Port {
    /// Port name; unique within one side (inputs or outputs) of an operator.
    pub key: PortKey,

    /// Type of the values accepted or produced on this port.
    #[serde(rename = "type")]
    pub port_type: PortType,

    /// Human-readable description shown in tooling.
    #[serde(default)]
    pub description: String,

    /// Whether an input port must be bound at execution time.
    ///
    /// Ignored for output ports.
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl Port {
    /// Creates a required port.
    pub fn new(key: PortKey, port_type: PortType, description: impl Into<String>) -> Self {
        Self {
            key,
            port_type,
            description: description.into(),
            required: true,
        }
    }

    /// Marks this port as optional.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Port values
// ---------------------------------------------------------------------------

/// A value bound to a port.
///
/// Serialised as `{"type": <port type>, "value": ...}`; binary payloads are
/// base64-encoded so values can be stored in text logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum PortValue {
    /// Free-form text.
    Text(String),
    /// Structured JSON.
    Json(serde_json::Value),
    /// Encoded images (JPEG/PNG bytes).
    Images(#[serde(with = "base64_list")] Vec<Vec<u8>>),
    /// A binary document.
    PdfBytes(#[serde(with = "base64_bytes")] Vec<u8>),
    /// Card-shaped JSON objects.
    Cards(Vec<serde_json::Value>),
}

/// Port-keyed values: the inputs and outputs of one operator invocation.
pub type PortMap = BTreeMap<PortKey, PortValue>;

impl PortValue {
    /// Returns the [`PortType`] this value was constructed as.
    pub fn port_type(&self) -> PortType {
        match self {
            PortValue::Text(_) => PortType::Text,
            PortValue::Json(_) => PortType::Json,
            PortValue::Images(_) => PortType::Images,
            PortValue::PdfBytes(_) => PortType::PdfBytes,
            PortValue::Cards(_) => PortType::Cards,
        }
    }

    /// Returns `true` if this value may be bound to a port of type `expected`.
    ///
    /// Cards are JSON, so a card list satisfies a `json` port and a JSON array
    /// satisfies a `cards` port.
    pub fn conforms_to(&self, expected: PortType) -> bool {
        match (self, expected) {
            (PortValue::Cards(_), PortType::Json) => true,
            (PortValue::Json(serde_json::Value::Array(_)), PortType::Cards) => true,
            (value, expected) => value.port_type() == expected,
        }
    }

    /// Returns the text payload, if this is a text value.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PortValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the JSON payload, if this is a JSON value.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            PortValue::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Returns the image payloads, if this is an image collection.
    pub fn as_images(&self) -> Option<&[Vec<u8>]> {
        match self {
            PortValue::Images(images) => Some(images),
            _ => None,
        }
    }

    /// Returns the document bytes, if this is a binary document.
    pub fn as_pdf_bytes(&self) -> Option<&[u8]> {
        match self {
            PortValue::PdfBytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the items of a card list or of a JSON array.
    pub fn card_items(&self) -> Option<&[serde_json::Value]> {
        match self {
            PortValue::Cards(items) => Some(items),
            PortValue::Json(serde_json::Value::Array(items)) => Some(items),
            _ => None,
        }
    }

    /// Converts this value into JSON for prompt rendering and reporting.
    ///
    /// Binary payloads are summarised rather than embedded.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PortValue::Text(text) => serde_json::Value::String(text.clone()),
            PortValue::Json(value) => value.clone(),
            PortValue::Cards(items) => serde_json::Value::Array(items.clone()),
            PortValue::Images(images) => {
                serde_json::Value::String(format!("<{} image(s)>", images.len()))
            }
            PortValue::PdfBytes(bytes) => {
                serde_json::Value::String(format!("<{} byte(s)>", bytes.len()))
            }
        }
    }

    /// Short human-readable description (type and size) for reports.
    pub fn describe(&self) -> String {
        match self {
            PortValue::Text(text) => format!("text ({} chars)", text.chars().count()),
            PortValue::Json(serde_json::Value::Array(items)) => {
                format!("json (array of {})", items.len())
            }
            PortValue::Json(_) => "json".to_string(),
            PortValue::Images(images) => format!("images ({})", images.len()),
            PortValue::PdfBytes(bytes) => format!("pdf_bytes ({} bytes)", bytes.len()),
            PortValue::Cards(items) => format!("cards ({})", items.len()),
        }
    }
}

impl From<serde_json::Value> for PortValue {
    /// JSON strings become text values; everything else stays JSON.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(text) => PortValue::Text(text),
            other => PortValue::Json(other),
        }
    }
}

impl From<String> for PortValue {
    fn from(value: String) -> Self {
        PortValue::Text(value)
    }
}

impl From<&str> for PortValue {
    fn from(value: &str) -> Self {
        PortValue::Text(value.to_string())
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_list {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(items.iter().map(|bytes| STANDARD.encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Vec<u8>>, D::Error> {
        Vec::<String>::deserialize(deserializer)?
            .into_iter()
            .map(|encoded| STANDARD.decode(encoded).map_err(serde::de::Error::custom))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Token accounting
// ---------------------------------------------------------------------------

/// Number of tokens consumed in an LLM API call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TokenCount(u64);

impl TokenCount {
    /// Creates a [`TokenCount`] from a raw integer.
    pub fn new(count: u64) -> Self {
        Self(count)
    }

    /// Returns the underlying integer value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for TokenCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::ops::Add for TokenCount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly; the underlying representation can change without affecting the
/// domain API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn port_defaults_to_required_when_deserialised() {
        let port: Port = serde_json::from_value(json!({"key": "text", "type": "text"})).unwrap();
        assert!(port.required);
        assert_eq!(port.port_type, PortType::Text);
        assert_eq!(port.description, "");
    }

    #[test]
    fn port_type_uses_wire_names() {
        assert_eq!(serde_json::to_value(PortType::PdfBytes).unwrap(), json!("pdf_bytes"));
        assert_eq!(PortType::Cards.to_string(), "cards");
    }

    #[test]
    fn card_lists_and_json_arrays_are_interchangeable() {
        let cards = PortValue::Cards(vec![json!({"question": "q", "answer": "a"})]);
        assert!(cards.conforms_to(PortType::Json));
        assert!(cards.conforms_to(PortType::Cards));

        let array = PortValue::Json(json!([{"title": "t"}]));
        assert!(array.conforms_to(PortType::Cards));
        assert_eq!(array.card_items().map(<[_]>::len), Some(1));

        let object = PortValue::Json(json!({"title": "t"}));
        assert!(!object.conforms_to(PortType::Cards));
        assert!(!PortValue::from("x").conforms_to(PortType::Json));
    }

    #[test]
    fn json_strings_convert_to_text_values() {
        assert_eq!(PortValue::from(json!("flashcard")), PortValue::Text("flashcard".into()));
        assert_eq!(PortValue::from(json!(3)), PortValue::Json(json!(3)));
    }

    #[test]
    fn binary_payloads_serialise_as_base64() {
        let value = PortValue::PdfBytes(vec![0x25, 0x50, 0x44, 0x46]);
        let encoded = serde_json::to_value(&value).unwrap();
        assert_eq!(encoded, json!({"type": "pdf_bytes", "value": "JVBERg=="}));

        let decoded: PortValue = serde_json::from_value(encoded).unwrap();
        assert_eq!(decoded, value);

        let images = PortValue::Images(vec![vec![1, 2, 3]]);
        let decoded: PortValue =
            serde_json::from_value(serde_json::to_value(&images).unwrap()).unwrap();
        assert_eq!(decoded, images);
    }
}
