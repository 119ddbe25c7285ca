//! Payload shapes returned by the gateway `sessions_history` tool.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ASSISTANT_ROLE: &str = "assistant";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub session_key: String,
    #[serde(default, deserialize_with = "deserialize_messages")]
    pub messages: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    #[serde(default, deserialize_with = "deserialize_lenient_string")]
    pub role: String,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: Option<Vec<ContentBlock>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default, deserialize_with = "deserialize_lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "deserialize_text")]
    pub text: Option<String>,
}

impl HistoryMessage {
    pub fn is_assistant(&self) -> bool {
        self.role == ASSISTANT_ROLE
    }

    /// Positive timestamp or `None`; zero and missing are treated alike.
    pub fn positive_timestamp(&self) -> Option<i64> {
        self.timestamp.filter(|ts| *ts > 0)
    }

    pub fn text(&self) -> String {
        join_text_blocks(self.content.as_deref().unwrap_or_default())
    }
}

/// Concatenates every text-typed block and trims the result.
pub fn join_text_blocks(blocks: &[ContentBlock]) -> String {
    let mut joined = String::new();
    for block in blocks {
        if block.kind != "text" {
            continue;
        }
        if let Some(text) = block.text.as_deref() {
            joined.push_str(text);
        }
    }
    joined.trim().to_string()
}

// A non-array `messages` field decodes as an empty history; non-object
// entries are dropped.
fn deserialize_messages<'de, D>(deserializer: D) -> Result<Vec<HistoryMessage>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(objects_from_array(value))
}

// A non-array `content` decodes as absent; malformed blocks are dropped.
fn deserialize_content<'de, D>(deserializer: D) -> Result<Option<Vec<ContentBlock>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value.is_array().then(|| objects_from_array(value)))
}

fn objects_from_array<T>(value: Value) -> Vec<T>
where
    T: serde::de::DeserializeOwned,
{
    let Value::Array(items) = value else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

fn deserialize_lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => text,
        _ => String::new(),
    })
}

// Non-numeric timestamps decode as absent. Fractional ones round up so a
// message just above an integer watermark is still newer than it.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_f64().map(|float| float.ceil() as i64)),
        _ => None,
    })
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(text) => Some(text),
        _ => None,
    })
}
