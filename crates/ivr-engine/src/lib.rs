//! IVR Engine - call-flow graphs for a telephony switch
//!
//! This crate holds everything about a flow that does not touch the
//! network or privileged files:
//!
//! - Flow, block and connection types, with typed per-block configuration
//! - Publish-time validation that reports every violation at once
//! - Deterministic compilation of a flow into its dialplan entry stanza
//! - A flow store with optional JSON file persistence
//! - The publish lifecycle event bus
//!
//! # Example
//!
//! ```ignore
//! use ivr_engine::{compile_flow, validate_flow, CompilerOptions, FlowBuilder, BlockKind};
//!
//! let flow = FlowBuilder::new("flow-1", "Reception", "alice")
//!     .add_start("start")
//!     .add_end("end")
//!     .connect("start", "end")
//!     .build();
//!
//! assert!(validate_flow(&flow).is_empty());
//! let dialplan = compile_flow(&flow, &CompilerOptions::default())?;
//! ```

pub mod blocks;
pub mod builder;
pub mod compiler;
pub mod error;
pub mod events;
pub mod store;
pub mod types;
pub mod validation;

// Re-export key types
pub use blocks::{BlockConfig, FieldError, FieldIssue, Priority};
pub use builder::FlowBuilder;
pub use compiler::{
    compile_flow, is_valid_flow_id, stamp_published, CompilationError, CompiledDialplan,
    CompilerOptions,
};
pub use error::{EngineError, Result};
pub use events::{
    EventBus, EventError, EventSink, NullEventSink, PublishEvent, PublishStage, PublishStatus,
    VecEventSink, TOPIC_PUBLISHED,
};
pub use store::FlowStore;
pub use types::{
    Block, BlockId, BlockKind, Connection, Flow, FlowId, FlowPatch, FlowStatus, FlowSummary,
    NewFlow,
};
pub use validation::{validate_flow, violation_messages, ValidationError};
