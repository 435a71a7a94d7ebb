//! Core types for call-flow graphs
//!
//! A flow is a set of typed blocks joined by connections. Block
//! configuration is stored exactly as the editor produced it; the typed
//! view lives in [`crate::blocks`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Unique identifier for a flow
pub type FlowId = String;

/// Unique identifier for a block (unique within its flow)
pub type BlockId = String;

/// Metadata key holding the RFC 3339 time of the last successful publish
pub const META_LAST_PUBLISHED: &str = "lastPublished";

/// Metadata key holding the number of successful publishes
pub const META_PUBLISHED_VERSION: &str = "publishedVersion";

/// Lifecycle state of a flow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Editable, not deployed to the switch
    #[default]
    Draft,
    /// Deployed and reloaded at least once
    Published,
}

/// The type of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    /// Entry point. Exactly one per flow.
    Start,
    /// Terminal block. At least one per flow.
    End,
    /// DTMF menu with a prompt
    Menu,
    /// Dial a local extension
    InternalDial,
    /// Place the caller in a call queue
    Queue,
    /// Dial out through a trunk
    ExternalDial,
    /// Play a recorded prompt
    PlayAudio,
    /// Assign a channel variable
    SetVariable,
    /// Branch on a time window
    GotoIfTime,
    /// Look the caller up in a named list
    CheckList,
    /// Jump to a dialplan location
    Goto,
}

impl BlockKind {
    /// All block kinds, in declaration order
    pub const ALL: [BlockKind; 11] = [
        BlockKind::Start,
        BlockKind::End,
        BlockKind::Menu,
        BlockKind::InternalDial,
        BlockKind::Queue,
        BlockKind::ExternalDial,
        BlockKind::PlayAudio,
        BlockKind::SetVariable,
        BlockKind::GotoIfTime,
        BlockKind::CheckList,
        BlockKind::Goto,
    ];

    /// Get the name used on the wire and in diagnostics
    pub fn label(&self) -> &'static str {
        match self {
            BlockKind::Start => "Start",
            BlockKind::End => "End",
            BlockKind::Menu => "Menu",
            BlockKind::InternalDial => "InternalDial",
            BlockKind::Queue => "Queue",
            BlockKind::ExternalDial => "ExternalDial",
            BlockKind::PlayAudio => "PlayAudio",
            BlockKind::SetVariable => "SetVariable",
            BlockKind::GotoIfTime => "GotoIfTime",
            BlockKind::CheckList => "CheckList",
            BlockKind::Goto => "Goto",
        }
    }

    /// Whether a block of this kind ends the call path
    pub fn is_terminal(&self) -> bool {
        matches!(self, BlockKind::End)
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// One typed step in a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Unique identifier within the flow
    pub id: BlockId,
    /// Block type
    #[serde(rename = "type")]
    pub kind: BlockKind,
    /// Type-specific configuration, as authored
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Block {
    /// Create a block with empty configuration
    pub fn new(id: impl Into<String>, kind: BlockKind) -> Self {
        Self {
            id: id.into(),
            kind,
            data: empty_object(),
        }
    }

    /// Create a block with configuration
    pub fn with_data(id: impl Into<String>, kind: BlockKind, data: Value) -> Self {
        Self {
            id: id.into(),
            kind,
            data,
        }
    }
}

/// An allowed transition between two blocks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    /// Source block ID
    pub from: BlockId,
    /// Target block ID
    pub to: BlockId,
    /// Branch label (e.g. a menu digit or "timeout")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Connection {
    /// Create an unlabelled connection
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: None,
        }
    }

    /// Create a labelled connection
    pub fn labelled(from: impl Into<String>, to: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            label: Some(label.into()),
        }
    }
}

/// A saved call-routing graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    /// Opaque identifier
    pub id: FlowId,
    /// Human-readable name
    pub name: String,
    /// What this flow does
    #[serde(default)]
    pub description: String,
    /// Blocks in authoring order
    #[serde(default)]
    pub blocks: Vec<Block>,
    /// Allowed transitions between blocks
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Free-form metadata; publish bookkeeping lives here too
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Owner allowed to mutate the flow
    pub created_by: String,
    /// Draft or published
    #[serde(default)]
    pub status: FlowStatus,
    /// When the flow was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// When the flow was last modified by an editor
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Create a new empty draft flow
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_by: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            blocks: Vec::new(),
            connections: Vec::new(),
            metadata: Map::new(),
            created_by: created_by.into(),
            status: FlowStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    /// Find a block by its ID
    pub fn find_block(&self, block_id: &str) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == block_id)
    }

    /// Find all blocks of a given kind
    pub fn blocks_of_kind(&self, kind: BlockKind) -> Vec<&Block> {
        self.blocks.iter().filter(|b| b.kind == kind).collect()
    }

    /// Find the Start block, if there is exactly one
    pub fn start_block(&self) -> Option<&Block> {
        match self.blocks_of_kind(BlockKind::Start).as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }

    /// Get all connections leaving a block
    pub fn outgoing(&self, block_id: &str) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.from == block_id).collect()
    }

    /// Get all connections entering a block
    pub fn incoming(&self, block_id: &str) -> Vec<&Connection> {
        self.connections.iter().filter(|c| c.to == block_id).collect()
    }

    /// Whether the flow has been published at least once
    pub fn is_published(&self) -> bool {
        self.status == FlowStatus::Published
    }

    /// Number of successful publishes recorded in metadata
    pub fn published_version(&self) -> u64 {
        self.metadata
            .get(META_PUBLISHED_VERSION)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }

    /// Time of the last successful publish recorded in metadata
    pub fn last_published(&self) -> Option<DateTime<Utc>> {
        self.metadata
            .get(META_LAST_PUBLISHED)
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// Input for creating a flow
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub created_by: String,
}

/// Partial update of a flow. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub blocks: Option<Vec<Block>>,
    #[serde(default)]
    pub connections: Option<Vec<Connection>>,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
}

impl FlowPatch {
    /// Apply this patch to a flow, bumping its modification time
    pub fn apply_to(self, flow: &mut Flow) {
        if let Some(name) = self.name {
            flow.name = name;
        }
        if let Some(description) = self.description {
            flow.description = description;
        }
        if let Some(blocks) = self.blocks {
            flow.blocks = blocks;
        }
        if let Some(connections) = self.connections {
            flow.connections = connections;
        }
        if let Some(mut metadata) = self.metadata {
            // Publish bookkeeping is owned by the publisher, not the editor.
            for key in [META_PUBLISHED_VERSION, META_LAST_PUBLISHED] {
                if metadata.contains_key(key) {
                    continue;
                }
                if let Some(value) = flow.metadata.get(key) {
                    metadata.insert(key.to_string(), value.clone());
                }
            }
            flow.metadata = metadata;
        }
        flow.updated_at = Utc::now();
    }
}

/// Listing entry for a flow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSummary {
    pub id: FlowId,
    pub name: String,
    pub description: String,
    pub status: FlowStatus,
    pub block_count: usize,
    pub updated_at: DateTime<Utc>,
}

impl From<&Flow> for FlowSummary {
    fn from(flow: &Flow) -> Self {
        Self {
            id: flow.id.clone(),
            name: flow.name.clone(),
            description: flow.description.clone(),
            status: flow.status,
            block_count: flow.blocks.len(),
            updated_at: flow.updated_at,
        }
    }
}
