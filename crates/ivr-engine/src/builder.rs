//! Fluent builder for call flows
//!
//! Provides a fluent API for constructing flows programmatically, mostly
//! for tests and command-line tooling.

use serde_json::{Map, Value};

use crate::types::{Block, BlockKind, Connection, Flow};

/// Fluent builder for call flows
///
/// # Example
///
/// ```ignore
/// let flow = FlowBuilder::new("flow-1", "Reception", "alice")
///     .add_start("start")
///     .add_block("menu", BlockKind::Menu, json!({"prompt": "main", "timeout": 5, "maxDigits": 1}))
///     .add_end("end")
///     .connect("start", "menu")
///     .connect_labelled("menu", "end", "1")
///     .build();
/// ```
pub struct FlowBuilder {
    flow: Flow,
}

impl FlowBuilder {
    /// Create a new flow builder
    pub fn new(id: impl Into<String>, name: impl Into<String>, created_by: impl Into<String>) -> Self {
        Self {
            flow: Flow::new(id, name, created_by),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.flow.description = description.into();
        self
    }

    /// Set a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.flow.metadata.insert(key.into(), value);
        self
    }

    /// Add a Start block
    pub fn add_start(mut self, id: impl Into<String>) -> Self {
        self.flow.blocks.push(Block::new(id, BlockKind::Start));
        self
    }

    /// Add an End block
    pub fn add_end(mut self, id: impl Into<String>) -> Self {
        self.flow.blocks.push(Block::new(id, BlockKind::End));
        self
    }

    /// Add a block of any kind with its configuration
    pub fn add_block(mut self, id: impl Into<String>, kind: BlockKind, data: Value) -> Self {
        let data = if data.is_null() {
            Value::Object(Map::new())
        } else {
            data
        };
        self.flow.blocks.push(Block::with_data(id, kind, data));
        self
    }

    /// Connect two blocks
    pub fn connect(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.flow.connections.push(Connection::new(from, to));
        self
    }

    /// Connect two blocks with a branch label
    pub fn connect_labelled(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.flow
            .connections
            .push(Connection::labelled(from, to, label));
        self
    }

    /// Build the flow without validation
    pub fn build(self) -> Flow {
        self.flow
    }
}
