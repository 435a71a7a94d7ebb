//! Dialplan compilation
//!
//! Turns a validated flow into the switch-native entry stanza. The stanza
//! only answers, records the flow ID in a channel variable and hands the
//! call to the AGI interpreter, which walks the flow's blocks at call time.
//! Output is a pure function of the flow ID and [`CompilerOptions`].

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Flow, META_LAST_PUBLISHED, META_PUBLISHED_VERSION};

/// Prefix of every generated dialplan context
pub const CONTEXT_PREFIX: &str = "ivr-flow-";

/// Prefix of every generated configuration file
pub const FILE_PREFIX: &str = "ivr_";

/// Default AGI endpoint of the runtime interpreter
pub const DEFAULT_AGI_URL: &str = "agi://127.0.0.1:4573/ivr-flow";

/// Default channel variable carrying the flow ID
pub const DEFAULT_FLOW_VARIABLE: &str = "IVR_FLOW_ID";

/// Errors that indicate a flow should never have reached the compiler
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilationError {
    /// Flow was not validated: no single Start block
    #[error("Flow '{0}' has no unique Start block; validate before compiling")]
    MissingStartBlock(String),

    /// Flow ID is not made only of ASCII letters, digits, `-` and `_`
    #[error("Flow ID '{0}' may only contain ASCII letters, digits, '-' and '_'")]
    UnsafeFlowId(String),

    /// Configured channel variable name is not a dialplan identifier
    #[error("Invalid channel variable name '{0}'")]
    InvalidVariableName(String),
}

/// Compiler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompilerOptions {
    /// Address of the runtime interpreter
    pub agi_url: String,
    /// Channel variable the interpreter reads the flow ID from
    pub flow_variable: String,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            agi_url: DEFAULT_AGI_URL.to_string(),
            flow_variable: DEFAULT_FLOW_VARIABLE.to_string(),
        }
    }
}

/// Result of compiling a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledDialplan {
    /// Flow this dialplan was generated from
    pub flow_id: String,
    /// Dialplan context name
    pub context: String,
    /// File name (no directory) the text should be installed as
    pub file_name: String,
    /// Channel variables set before the interpreter runs
    pub variables: BTreeMap<String, String>,
    /// Configuration text
    pub text: String,
}

/// Compile a validated flow into its entry stanza
pub fn compile_flow(
    flow: &Flow,
    options: &CompilerOptions,
) -> Result<CompiledDialplan, CompilationError> {
    if flow.start_block().is_none() {
        return Err(CompilationError::MissingStartBlock(flow.id.clone()));
    }
    if !is_valid_flow_id(&flow.id) {
        return Err(CompilationError::UnsafeFlowId(flow.id.clone()));
    }
    if !is_variable_name(&options.flow_variable) {
        return Err(CompilationError::InvalidVariableName(
            options.flow_variable.clone(),
        ));
    }

    let context = format!("{}{}", CONTEXT_PREFIX, flow.id);
    let file_name = file_name_for(&flow.id);

    let mut variables = BTreeMap::new();
    variables.insert(options.flow_variable.clone(), flow.id.clone());

    let mut text = String::new();
    text.push_str(&format!(
        "; Generated for IVR flow {}. Changes are overwritten on publish.\n",
        flow.id
    ));
    text.push_str(&format!("[{}]\n", context));
    text.push_str(&format!("exten => s,1,NoOp(IVR flow {})\n", flow.id));
    text.push_str(" same => n,Answer()\n");
    for (name, value) in &variables {
        text.push_str(&format!(" same => n,Set({}={})\n", name, value));
    }
    text.push_str(&format!(" same => n,AGI({})\n", options.agi_url));
    text.push_str(" same => n,Hangup()\n");

    log::debug!("Compiled flow '{}' into context '{}'", flow.id, context);

    Ok(CompiledDialplan {
        flow_id: flow.id.clone(),
        context,
        file_name,
        variables,
        text,
    })
}

/// File name a flow's dialplan is installed under
pub fn file_name_for(flow_id: &str) -> String {
    format!("{}{}.conf", FILE_PREFIX, flow_id)
}

/// Record a successful publish in the flow's metadata
pub fn stamp_published(flow: &mut Flow, now: DateTime<Utc>) {
    let version = flow.published_version() + 1;
    flow.metadata.insert(
        META_LAST_PUBLISHED.to_string(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    );
    flow.metadata
        .insert(META_PUBLISHED_VERSION.to_string(), Value::from(version));
}

/// Whether an ID can name a context, a config file and a store file as-is.
///
/// IDs map to file names one-to-one, so no character is ever rewritten.
pub fn is_valid_flow_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_variable_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::FlowBuilder;
    use crate::types::BlockKind;
    use chrono::TimeZone;
    use serde_json::json;

    fn flow(id: &str) -> Flow {
        FlowBuilder::new(id, "Reception", "alice")
            .add_start("start")
            .add_block("menu", BlockKind::Menu, json!({"prompt": "p", "timeout": 5, "maxDigits": 1}))
            .add_end("end")
            .connect("start", "menu")
            .connect("menu", "end")
            .build()
    }

    #[test]
    fn test_entry_stanza() {
        let compiled = compile_flow(&flow("abc-123"), &CompilerOptions::default()).unwrap();
        assert_eq!(compiled.context, "ivr-flow-abc-123");
        assert_eq!(compiled.file_name, "ivr_abc-123.conf");
        assert_eq!(
            compiled.variables.get("IVR_FLOW_ID").map(String::as_str),
            Some("abc-123")
        );
        let expected = "\
; Generated for IVR flow abc-123. Changes are overwritten on publish.
[ivr-flow-abc-123]
exten => s,1,NoOp(IVR flow abc-123)
 same => n,Answer()
 same => n,Set(IVR_FLOW_ID=abc-123)
 same => n,AGI(agi://127.0.0.1:4573/ivr-flow)
 same => n,Hangup()
";
        assert_eq!(compiled.text, expected);
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let f = flow("f-1");
        let options = CompilerOptions::default();
        let first = compile_flow(&f, &options).unwrap();
        let second = compile_flow(&f, &options).unwrap();
        assert_eq!(first.text.as_bytes(), second.text.as_bytes());
    }

    #[test]
    fn test_block_changes_do_not_change_stanza() {
        let mut f = flow("f-1");
        let before = compile_flow(&f, &CompilerOptions::default()).unwrap();
        f.name = "Renamed".to_string();
        f.blocks[1].data = json!({"prompt": "other", "timeout": 9, "maxDigits": 4});
        let after = compile_flow(&f, &CompilerOptions::default()).unwrap();
        assert_eq!(before.text, after.text);
    }

    #[test]
    fn test_rejects_unvalidated_flow() {
        let f = FlowBuilder::new("f-1", "No start", "alice").add_end("end").build();
        assert_eq!(
            compile_flow(&f, &CompilerOptions::default()),
            Err(CompilationError::MissingStartBlock("f-1".to_string()))
        );
    }

    #[test]
    fn test_rejects_unsafe_ids() {
        for id in ["", "a,b", "x)", "new\nline", "semi;colon", "with space", "tenant.x", "a@b", "a:b"] {
            let result = compile_flow(&flow(id), &CompilerOptions::default());
            assert!(
                matches!(result, Err(CompilationError::UnsafeFlowId(_))),
                "id {:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_rejects_bad_variable_name() {
        let options = CompilerOptions {
            flow_variable: "1BAD".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            compile_flow(&flow("ok"), &options),
            Err(CompilationError::InvalidVariableName(_))
        ));
    }

    #[test]
    fn test_distinct_ids_get_distinct_files() {
        let options = CompilerOptions::default();
        let underscore = compile_flow(&flow("tenant_x"), &options).unwrap();
        let dashed = compile_flow(&flow("tenant-x"), &options).unwrap();
        assert_eq!(underscore.file_name, "ivr_tenant_x.conf");
        assert_ne!(underscore.file_name, dashed.file_name);
        assert_ne!(underscore.context, dashed.context);
        assert!(compile_flow(&flow("tenant.x"), &options).is_err());
    }

    #[test]
    fn test_stamp_published_increments_version() {
        let mut f = flow("f-1");
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        stamp_published(&mut f, now);
        stamp_published(&mut f, now);
        assert_eq!(f.published_version(), 2);
        assert_eq!(f.metadata[META_LAST_PUBLISHED], json!("2026-03-01T12:00:00Z"));
        assert_eq!(f.last_published(), Some(now));
    }
}
