//! Publish-time validation for call flows
//!
//! Checks Start/End presence, dead ends, dangling connections and the
//! per-type configuration contract of every block. All rules run; the
//! caller gets every violation in one pass.
//!
//! Cycles are allowed: a menu that loops back to itself on invalid input
//! is a normal retry pattern.

use std::collections::HashSet;

use crate::blocks::{FieldError, FieldIssue};
use crate::types::{BlockKind, Flow};

/// A single structural or configuration problem in a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The flow has no Start block
    MissingStartBlock,
    /// The flow has more than one Start block
    MultipleStartBlocks { count: usize },
    /// The flow has no End block
    MissingEndBlock,
    /// Two blocks share an ID
    DuplicateBlockId { block_id: String },
    /// A non-End block has no outgoing connection
    DeadEnd {
        block_id: String,
        block_type: BlockKind,
    },
    /// A connection starts at a block that does not exist
    UnknownSourceBlock { from: String, to: String },
    /// A connection ends at a block that does not exist
    UnknownTargetBlock { from: String, to: String },
    /// A required configuration field is absent or empty
    MissingField {
        block_id: String,
        block_type: BlockKind,
        field: &'static str,
    },
    /// A configuration field has the wrong type
    InvalidField {
        block_id: String,
        block_type: BlockKind,
        field: &'static str,
        expected: &'static str,
    },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingStartBlock => write!(f, "Flow must have exactly one Start block (found none)"),
            Self::MultipleStartBlocks { count } => {
                write!(f, "Flow must have exactly one Start block (found {})", count)
            }
            Self::MissingEndBlock => write!(f, "Flow must have at least one End block"),
            Self::DuplicateBlockId { block_id } => {
                write!(f, "Block ID '{}' is used by more than one block", block_id)
            }
            Self::DeadEnd {
                block_id,
                block_type,
            } => write!(
                f,
                "{} block '{}' has no outgoing connection",
                block_type, block_id
            ),
            Self::UnknownSourceBlock { from, to } => write!(
                f,
                "Connection {} -> {} references non-existent source block '{}'",
                from, to, from
            ),
            Self::UnknownTargetBlock { from, to } => write!(
                f,
                "Connection {} -> {} references non-existent target block '{}'",
                from, to, to
            ),
            Self::MissingField {
                block_id,
                block_type,
                field,
            } => write!(
                f,
                "{} block '{}' is missing required field '{}'",
                block_type, block_id, field
            ),
            Self::InvalidField {
                block_id,
                block_type,
                field,
                expected,
            } => write!(
                f,
                "{} block '{}' field '{}' must be {}",
                block_type, block_id, field, expected
            ),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Validate a flow for publishing
///
/// Returns all validation errors found (not just the first).
pub fn validate_flow(flow: &Flow) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    validate_start_end_presence(flow, &mut errors);
    validate_unique_ids(flow, &mut errors);
    validate_dead_ends(flow, &mut errors);
    validate_connection_references(flow, &mut errors);
    validate_block_fields(flow, &mut errors);

    if !errors.is_empty() {
        log::debug!(
            "Flow '{}' failed validation with {} violation(s)",
            flow.id,
            errors.len()
        );
    }
    errors
}

/// Render violations as the human-readable strings shown to editors
pub fn violation_messages(errors: &[ValidationError]) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}

/// Check Start/End block presence
fn validate_start_end_presence(flow: &Flow, errors: &mut Vec<ValidationError>) {
    let start_count = flow
        .blocks
        .iter()
        .filter(|b| b.kind == BlockKind::Start)
        .count();
    let end_count = flow
        .blocks
        .iter()
        .filter(|b| b.kind == BlockKind::End)
        .count();

    if start_count == 0 {
        errors.push(ValidationError::MissingStartBlock);
    } else if start_count > 1 {
        errors.push(ValidationError::MultipleStartBlocks { count: start_count });
    }

    if end_count == 0 {
        errors.push(ValidationError::MissingEndBlock);
    }
}

fn validate_unique_ids(flow: &Flow, errors: &mut Vec<ValidationError>) {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut reported: HashSet<&str> = HashSet::new();
    for block in &flow.blocks {
        if !seen.insert(&block.id) && reported.insert(&block.id) {
            errors.push(ValidationError::DuplicateBlockId {
                block_id: block.id.clone(),
            });
        }
    }
}

/// Every non-terminal block needs somewhere to go
fn validate_dead_ends(flow: &Flow, errors: &mut Vec<ValidationError>) {
    let sources: HashSet<&str> = flow.connections.iter().map(|c| c.from.as_str()).collect();

    for block in &flow.blocks {
        if !block.kind.is_terminal() && !sources.contains(block.id.as_str()) {
            errors.push(ValidationError::DeadEnd {
                block_id: block.id.clone(),
                block_type: block.kind,
            });
        }
    }
}

/// Check that all connection endpoints exist
fn validate_connection_references(flow: &Flow, errors: &mut Vec<ValidationError>) {
    let block_ids: HashSet<&str> = flow.blocks.iter().map(|b| b.id.as_str()).collect();

    for connection in &flow.connections {
        if !block_ids.contains(connection.from.as_str()) {
            errors.push(ValidationError::UnknownSourceBlock {
                from: connection.from.clone(),
                to: connection.to.clone(),
            });
        }
        if !block_ids.contains(connection.to.as_str()) {
            errors.push(ValidationError::UnknownTargetBlock {
                from: connection.from.clone(),
                to: connection.to.clone(),
            });
        }
    }
}

/// Check each block's configuration against its type contract
fn validate_block_fields(flow: &Flow, errors: &mut Vec<ValidationError>) {
    for block in &flow.blocks {
        let Err(field_errors) = block.config() else {
            continue;
        };
        for FieldError { field, issue } in field_errors {
            errors.push(match issue {
                FieldIssue::Missing => ValidationError::MissingField {
                    block_id: block.id.clone(),
                    block_type: block.kind,
                    field,
                },
                FieldIssue::Invalid { expected } => ValidationError::InvalidField {
                    block_id: block.id.clone(),
                    block_type: block.kind,
                    field,
                    expected,
                },
            });
        }
    }
}
