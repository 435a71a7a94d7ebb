//! Typed block configuration
//!
//! Blocks keep their configuration as the JSON map the editor wrote.
//! [`BlockConfig::parse`] turns that map into one strongly typed variant per
//! block kind, collecting every missing or mistyped field instead of
//! stopping at the first.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Block, BlockKind};

/// What is wrong with a single configuration field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    /// Absent, null, or empty
    Missing,
    /// Present with the wrong shape
    Invalid { expected: &'static str },
}

/// A field-level configuration problem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub issue: FieldIssue,
}

/// A dialplan priority: a step number or a label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Priority {
    Number(u32),
    Label(String),
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Number(n) => write!(f, "{}", n),
            Priority::Label(label) => f.write_str(label),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuConfig {
    pub prompt: String,
    pub timeout: u32,
    pub max_digits: u32,
    pub invalid_retries: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalDialConfig {
    pub extension: String,
    pub timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub queue_name: String,
    pub timeout: u32,
    pub announce_frequency: u32,
    /// AGI script run for the answering agent
    pub agi: Option<String>,
    /// Macro run on the answering agent's channel
    #[serde(rename = "macro")]
    pub macro_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalDialConfig {
    pub trunk: String,
    pub number: String,
    pub timeout: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayAudioConfig {
    pub audio_file: String,
    pub allow_skip: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetVariableConfig {
    pub var_name: String,
    pub var_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoIfTimeConfig {
    /// `<times>,<weekdays>,<mdays>,<months>` as accepted by GotoIfTime
    pub time_string: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckListConfig {
    pub list_name: String,
    pub field_to_check: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GotoConfig {
    pub context: String,
    pub extension: String,
    pub priority: Priority,
}

/// Typed configuration, one variant per [`BlockKind`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockConfig {
    Start,
    End,
    Menu(MenuConfig),
    InternalDial(InternalDialConfig),
    Queue(QueueConfig),
    ExternalDial(ExternalDialConfig),
    PlayAudio(PlayAudioConfig),
    SetVariable(SetVariableConfig),
    GotoIfTime(GotoIfTimeConfig),
    CheckList(CheckListConfig),
    Goto(GotoConfig),
}

impl BlockConfig {
    /// Parse raw block data for the given kind.
    ///
    /// Returns every field problem found, in field declaration order.
    pub fn parse(kind: BlockKind, data: &Value) -> Result<Self, Vec<FieldError>> {
        let mut f = Fields::new(data);
        let config = match kind {
            BlockKind::Start => BlockConfig::Start,
            BlockKind::End => BlockConfig::End,
            BlockKind::Menu => BlockConfig::Menu(MenuConfig {
                prompt: f.text("prompt"),
                timeout: f.number("timeout"),
                max_digits: f.number("maxDigits"),
                invalid_retries: f.optional_number("invalidRetries"),
            }),
            BlockKind::InternalDial => BlockConfig::InternalDial(InternalDialConfig {
                extension: f.identifier("extension"),
                timeout: f.number("timeout"),
            }),
            BlockKind::Queue => BlockConfig::Queue(QueueConfig {
                queue_name: f.text("queueName"),
                timeout: f.number("timeout"),
                announce_frequency: f.number("announceFrequency"),
                agi: f.optional_text("agi"),
                macro_name: f.optional_text("macro"),
            }),
            BlockKind::ExternalDial => BlockConfig::ExternalDial(ExternalDialConfig {
                trunk: f.text("trunk"),
                number: f.identifier("number"),
                timeout: f.number("timeout"),
            }),
            BlockKind::PlayAudio => BlockConfig::PlayAudio(PlayAudioConfig {
                audio_file: f.text("audioFile"),
                allow_skip: f.optional_bool("allowSkip"),
            }),
            BlockKind::SetVariable => BlockConfig::SetVariable(SetVariableConfig {
                var_name: f.text("varName"),
                var_value: f.scalar("varValue"),
            }),
            BlockKind::GotoIfTime => BlockConfig::GotoIfTime(GotoIfTimeConfig {
                time_string: f.text("timeString"),
            }),
            BlockKind::CheckList => BlockConfig::CheckList(CheckListConfig {
                list_name: f.text("listName"),
                field_to_check: f.text("fieldToCheck"),
            }),
            BlockKind::Goto => BlockConfig::Goto(GotoConfig {
                context: f.text("context"),
                extension: f.identifier("extension"),
                priority: f.priority("priority"),
            }),
        };
        f.finish(config)
    }

    /// The kind this configuration belongs to
    pub fn kind(&self) -> BlockKind {
        match self {
            BlockConfig::Start => BlockKind::Start,
            BlockConfig::End => BlockKind::End,
            BlockConfig::Menu(_) => BlockKind::Menu,
            BlockConfig::InternalDial(_) => BlockKind::InternalDial,
            BlockConfig::Queue(_) => BlockKind::Queue,
            BlockConfig::ExternalDial(_) => BlockKind::ExternalDial,
            BlockConfig::PlayAudio(_) => BlockKind::PlayAudio,
            BlockConfig::SetVariable(_) => BlockKind::SetVariable,
            BlockConfig::GotoIfTime(_) => BlockKind::GotoIfTime,
            BlockConfig::CheckList(_) => BlockKind::CheckList,
            BlockConfig::Goto(_) => BlockKind::Goto,
        }
    }
}

impl Block {
    /// Typed view of this block's configuration
    pub fn config(&self) -> Result<BlockConfig, Vec<FieldError>> {
        BlockConfig::parse(self.kind, &self.data)
    }
}

/// Required configuration fields for a block kind
pub fn required_fields(kind: BlockKind) -> &'static [&'static str] {
    match kind {
        BlockKind::Start | BlockKind::End => &[],
        BlockKind::Menu => &["prompt", "timeout", "maxDigits"],
        BlockKind::InternalDial => &["extension", "timeout"],
        BlockKind::Queue => &["queueName", "timeout", "announceFrequency"],
        BlockKind::ExternalDial => &["trunk", "number", "timeout"],
        BlockKind::PlayAudio => &["audioFile"],
        BlockKind::SetVariable => &["varName", "varValue"],
        BlockKind::GotoIfTime => &["timeString"],
        BlockKind::CheckList => &["listName", "fieldToCheck"],
        BlockKind::Goto => &["context", "extension", "priority"],
    }
}

/// Field reader that records problems and yields placeholder values
struct Fields<'a> {
    map: Option<&'a Map<String, Value>>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn new(data: &'a Value) -> Self {
        Self {
            map: data.as_object(),
            errors: Vec::new(),
        }
    }

    fn finish<T>(self, value: T) -> Result<T, Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self.errors)
        }
    }

    /// Present, non-null, non-empty value
    fn get(&self, field: &str) -> Option<&'a Value> {
        match self.map?.get(field)? {
            Value::Null => None,
            Value::String(s) if s.trim().is_empty() => None,
            other => Some(other),
        }
    }

    fn missing(&mut self, field: &'static str) {
        self.errors.push(FieldError {
            field,
            issue: FieldIssue::Missing,
        });
    }

    fn invalid(&mut self, field: &'static str, expected: &'static str) {
        self.errors.push(FieldError {
            field,
            issue: FieldIssue::Invalid { expected },
        });
    }

    fn text(&mut self, field: &'static str) -> String {
        match self.get(field) {
            None => {
                self.missing(field);
                String::new()
            }
            Some(Value::String(s)) => s.clone(),
            Some(_) => {
                self.invalid(field, "a string");
                String::new()
            }
        }
    }

    fn identifier(&mut self, field: &'static str) -> String {
        match self.get(field) {
            None => {
                self.missing(field);
                String::new()
            }
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) if n.is_u64() || n.is_i64() => n.to_string(),
            Some(_) => {
                self.invalid(field, "a string or integer");
                String::new()
            }
        }
    }

    fn number(&mut self, field: &'static str) -> u32 {
        match self.get(field) {
            None => {
                self.missing(field);
                0
            }
            Some(value) => match as_u32(value) {
                Some(n) => n,
                None => {
                    self.invalid(field, "a non-negative integer");
                    0
                }
            },
        }
    }

    fn scalar(&mut self, field: &'static str) -> String {
        match self.get(field) {
            None => {
                self.missing(field);
                String::new()
            }
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(_) => {
                self.invalid(field, "a string, number or boolean");
                String::new()
            }
        }
    }

    fn priority(&mut self, field: &'static str) -> Priority {
        match self.get(field) {
            None => {
                self.missing(field);
                Priority::Number(1)
            }
            Some(value) => match as_u32(value) {
                Some(0) => {
                    self.invalid(field, "a positive integer or label");
                    Priority::Number(1)
                }
                Some(n) => Priority::Number(n),
                None => match value {
                    Value::String(label) => Priority::Label(label.trim().to_string()),
                    _ => {
                        self.invalid(field, "a positive integer or label");
                        Priority::Number(1)
                    }
                },
            },
        }
    }

    fn optional_text(&mut self, field: &'static str) -> Option<String> {
        match self.get(field)? {
            Value::String(s) => Some(s.clone()),
            _ => {
                self.invalid(field, "a string");
                None
            }
        }
    }

    fn optional_number(&mut self, field: &'static str) -> Option<u32> {
        let value = self.get(field)?;
        let parsed = as_u32(value);
        if parsed.is_none() {
            self.invalid(field, "a non-negative integer");
        }
        parsed
    }

    fn optional_bool(&mut self, field: &'static str) -> Option<bool> {
        match self.get(field)? {
            Value::Bool(b) => Some(*b),
            _ => {
                self.invalid(field, "a boolean");
                None
            }
        }
    }
}

fn as_u32(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    }
}
