//! Reads an operation's call log back out of the store and prints it.

use crate::errors::CacheError;
use crate::logging::append_run_log;
use crate::recorder::{inputs_key, outputs_key};
use crate::runtime::Terminal;
use crate::store::KeyValueStore;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallHistory {
    pub operation: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
}

impl CallHistory {
    pub fn call_count(&self) -> usize {
        self.inputs.len()
    }
}

pub fn load_history(store: &dyn KeyValueStore, operation: &str) -> Result<CallHistory, CacheError> {
    let inputs = decode_entries(store.lrange(&inputs_key(operation), 0, -1)?);
    let outputs = decode_entries(store.lrange(&outputs_key(operation), 0, -1)?);
    Ok(CallHistory {
        operation: operation.to_string(),
        inputs,
        outputs,
    })
}

/// Header line, then one `op(*args) -> output` line per call. Inputs and
/// outputs pair up by position; entries past the shorter log are dropped.
pub fn render_replay(history: &CallHistory) -> Vec<String> {
    let op = &history.operation;
    let mut lines = Vec::with_capacity(history.inputs.len() + 1);
    lines.push(format!("{op} was called {} times:", history.call_count()));
    lines.extend(
        history
            .inputs
            .iter()
            .zip(&history.outputs)
            .map(|(input, output)| format!("{op}(*{input}) -> {output}")),
    );
    lines
}

pub fn replay(
    store: &dyn KeyValueStore,
    operation: &str,
    terminal: &dyn Terminal,
) -> Result<CallHistory, CacheError> {
    let history = load_history(store, operation)?;
    if history.inputs.len() != history.outputs.len() {
        append_run_log(
            "warn",
            "replay.unpaired_entries",
            json!({
                "operation": operation,
                "inputs": history.inputs.len(),
                "outputs": history.outputs.len(),
            }),
        );
    }
    for line in render_replay(&history) {
        terminal.write_line(&line)?;
    }
    Ok(history)
}

fn decode_entries(raw: Vec<Vec<u8>>) -> Vec<String> {
    raw.into_iter()
        .map(|entry| String::from_utf8_lossy(&entry).into_owned())
        .collect()
}
