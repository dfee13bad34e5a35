use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

/// The field names a repaired/rewritten record is keyed on. The line itself
/// (`Record::raw`) remains the source of truth for serialization so that
/// untouched fields round-trip byte-for-byte.
const FIELD_UUID: &str = "uuid";
const FIELD_PARENT_UUID: &str = "parentUuid";
const FIELD_PARENT_UUID_LEGACY: &str = "parent_uuid";
const FIELD_SESSION_ID: &str = "sessionId";
const FIELD_SESSION_ID_LEGACY: &str = "session_id";
const FIELD_KIND: &str = "type";
const FIELD_ROLE: &str = "role";
const FIELD_MESSAGE: &str = "message";
const FIELD_TIMESTAMP: &str = "timestamp";
const FIELD_CONTENT: &str = "content";

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record is missing a non-empty `uuid` field")]
    MissingUuid,
}

/// A single diagnostic produced while loading a batch of lines. Malformed
/// lines are collected here instead of aborting the whole load (spec.md
/// §4.1, §4.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseDiagnostic {
    pub line_number: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    User,
    Assistant,
    System,
    Summary,
    FileHistorySnapshot,
}

impl RecordKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Summary => "summary",
            Self::FileHistorySnapshot => "file-history-snapshot",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            "summary" => Some(Self::Summary),
            "file-history-snapshot" => Some(Self::FileHistorySnapshot),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }

    fn from_str(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }
}

/// A tagged content block. `Other` preserves the original JSON verbatim so
/// block types this crate doesn't model round-trip without loss.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        output: Value,
    },
    Other(Value),
}

impl ContentBlock {
    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            Self::ToolResult { tool_use_id, .. } => Some(tool_use_id.as_str()),
            _ => None,
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text.as_str()),
            _ => None,
        }
    }

    fn from_value(value: &Value) -> Self {
        let Some(obj) = value.as_object() else {
            return Self::Other(value.clone());
        };
        match obj.get("type").and_then(Value::as_str) {
            Some("text") => match obj.get("text").and_then(Value::as_str) {
                Some(text) => Self::Text {
                    text: text.to_string(),
                },
                None => Self::Other(value.clone()),
            },
            Some("tool_use") => {
                let id = obj.get("id").and_then(Value::as_str);
                let name = obj.get("name").and_then(Value::as_str);
                match (id, name) {
                    (Some(id), Some(name)) => Self::ToolUse {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: obj.get("input").cloned().unwrap_or(Value::Null),
                    },
                    _ => Self::Other(value.clone()),
                }
            }
            Some("tool_result") => {
                let tool_use_id = obj.get("tool_use_id").and_then(Value::as_str);
                match tool_use_id {
                    Some(tool_use_id) => {
                        let output = obj
                            .get("output")
                            .or_else(|| obj.get("content"))
                            .cloned()
                            .unwrap_or(Value::Null);
                        Self::ToolResult {
                            tool_use_id: tool_use_id.to_string(),
                            output,
                        }
                    }
                    None => Self::Other(value.clone()),
                }
            }
            _ => Self::Other(value.clone()),
        }
    }
}

/// One line of an append-only conversation log (spec.md §3 "Record").
///
/// `raw` is the parsed JSON object backing this record and is the only
/// thing `to_json_line` ever serializes; every other field is a read-through
/// view computed at parse/repair time so unrelated fields and key order
/// survive untouched.
#[derive(Debug, Clone)]
pub struct Record {
    raw: Value,
    pub uuid: String,
    pub parent_uuid: Option<String>,
    pub session_id: String,
    pub kind: RecordKind,
    pub role: Option<Role>,
    pub timestamp: DateTime<Utc>,
    pub content: Vec<ContentBlock>,
    pub is_orphan: bool,
    pub corruption_score: f64,
}

impl Record {
    pub fn from_json_line(line: &str) -> Result<Self, ParseError> {
        let raw: Value = serde_json::from_str(line)?;
        Self::from_value(raw)
    }

    pub fn from_value(raw: Value) -> Result<Self, ParseError> {
        let obj = raw.as_object().ok_or(ParseError::NotAnObject)?;

        let uuid = obj
            .get(FIELD_UUID)
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .ok_or(ParseError::MissingUuid)?
            .to_string();

        let parent_uuid = obj
            .get(FIELD_PARENT_UUID)
            .or_else(|| obj.get(FIELD_PARENT_UUID_LEGACY))
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        let session_id = obj
            .get(FIELD_SESSION_ID)
            .or_else(|| obj.get(FIELD_SESSION_ID_LEGACY))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let message = obj.get(FIELD_MESSAGE).and_then(Value::as_object);

        let role = message
            .and_then(|message| message.get(FIELD_ROLE))
            .or_else(|| obj.get(FIELD_ROLE))
            .and_then(Value::as_str)
            .and_then(Role::from_str);

        let kind = obj
            .get(FIELD_KIND)
            .and_then(Value::as_str)
            .and_then(RecordKind::from_str)
            .unwrap_or(match role {
                Some(Role::User) => RecordKind::User,
                Some(Role::Assistant) => RecordKind::Assistant,
                None => RecordKind::System,
            });

        let timestamp = obj
            .get(FIELD_TIMESTAMP)
            .and_then(Value::as_str)
            .and_then(|value| DateTime::parse_from_rfc3339(value).ok())
            .map(|value| value.with_timezone(&Utc))
            .unwrap_or_else(|| DateTime::<Utc>::from_timestamp(0, 0).expect("epoch is valid"));

        let content_array = message
            .and_then(|message| message.get(FIELD_CONTENT))
            .or_else(|| obj.get(FIELD_CONTENT))
            .and_then(Value::as_array);
        let content = content_array
            .map(|blocks| blocks.iter().map(ContentBlock::from_value).collect())
            .unwrap_or_default();

        Ok(Self {
            raw,
            uuid,
            parent_uuid,
            session_id,
            kind,
            role,
            timestamp,
            content,
            is_orphan: false,
            corruption_score: 0.0,
        })
    }

    pub fn to_json_line(&self) -> String {
        serde_json::to_string(&self.raw).expect("Record::raw is always valid JSON")
    }

    /// Repoints `parentUuid` in both the typed view and the backing JSON,
    /// leaving every other field (and key order) untouched.
    pub fn set_parent_uuid(&mut self, parent_uuid: Option<String>) {
        self.parent_uuid = parent_uuid.clone();
        if let Some(obj) = self.raw.as_object_mut() {
            obj.remove(FIELD_PARENT_UUID_LEGACY);
            match parent_uuid {
                Some(value) => {
                    obj.insert(FIELD_PARENT_UUID.to_string(), Value::String(value));
                }
                None => {
                    obj.insert(FIELD_PARENT_UUID.to_string(), Value::Null);
                }
            }
        }
    }

    /// Replaces the content block array in both the typed view and the
    /// backing JSON, preserving whichever field (`message.content` vs
    /// top-level `content`) the record originally used.
    pub fn set_content(&mut self, content: Vec<ContentBlock>) {
        let rendered: Vec<Value> = content
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => {
                    serde_json::json!({ "type": "text", "text": text })
                }
                ContentBlock::ToolUse { id, name, input } => {
                    serde_json::json!({ "type": "tool_use", "id": id, "name": name, "input": input })
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    output,
                } => {
                    serde_json::json!({ "type": "tool_result", "tool_use_id": tool_use_id, "output": output })
                }
                ContentBlock::Other(value) => value.clone(),
            })
            .collect();
        self.set_content_values(rendered);
    }

    /// The raw (unparsed) content blocks backing this record, in order.
    /// `None` means the content field is absent or not a JSON array
    /// (spec's "non-list content" edge case).
    pub fn content_values(&self) -> Option<Vec<Value>> {
        let message = self.raw.get(FIELD_MESSAGE).and_then(Value::as_object);
        let found = message
            .and_then(|message| message.get(FIELD_CONTENT))
            .or_else(|| self.raw.get(FIELD_CONTENT))?;
        found.as_array().cloned()
    }

    /// Writes raw content blocks back verbatim, preserving whichever field
    /// (`message.content` vs top-level `content`) the record originally
    /// used, and re-derives the typed `content` view from them.
    pub fn set_content_values(&mut self, rendered: Vec<Value>) {
        let wrote_to_message = self
            .raw
            .get_mut(FIELD_MESSAGE)
            .and_then(Value::as_object_mut)
            .map(|message| {
                if message.contains_key(FIELD_CONTENT) {
                    message.insert(FIELD_CONTENT.to_string(), Value::Array(rendered.clone()));
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);

        if !wrote_to_message {
            if let Some(obj) = self.raw.as_object_mut() {
                obj.insert(FIELD_CONTENT.to_string(), Value::Array(rendered.clone()));
            }
        }

        self.content = rendered.iter().map(ContentBlock::from_value).collect();
    }

    pub fn byte_len(&self) -> usize {
        self.to_json_line().len()
    }

    pub fn last_text_block(&self) -> Option<&str> {
        self.content.iter().rev().find_map(ContentBlock::text)
    }

    pub fn first_text_block(&self) -> Option<&str> {
        self.content.iter().find_map(ContentBlock::text)
    }
}

/// Ensures `map` has canonical key ordering expectations documented; kept
/// for callers that need to inspect unknown top-level fields directly.
pub fn extra_fields(record: &Record) -> Option<&Map<String, Value>> {
    record.raw.as_object()
}
