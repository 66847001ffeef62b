//! Call counting and call history, layered around a cache operation.
//!
//! A `CallRecorder` wraps an operation closure in zero or more layers, outer
//! to inner in the order they were added. Every layer writes through the same
//! store as the cache:
//! - `CountCalls` increments a counter named after the operation before the
//!   call runs.
//! - `CallHistory` appends the rendered arguments to `<operation>:inputs`
//!   before the call, and the rendered result to `<operation>:outputs` after
//!   it returns. A failed call leaves its input entry without a matching
//!   output entry.
//!
//! The layers are separate store commands, not one transaction.

use crate::errors::CacheError;
use crate::logging::append_run_log;
use crate::store::KeyValueStore;
use crate::value::{render_args, StoredValue};
use serde_json::json;
use std::fmt::Display;
use std::sync::Arc;

pub fn inputs_key(operation: &str) -> String {
    format!("{operation}:inputs")
}

pub fn outputs_key(operation: &str) -> String {
    format!("{operation}:outputs")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingLayer {
    CountCalls,
    CallHistory,
}

impl RecordingLayer {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CountCalls => "count_calls",
            Self::CallHistory => "call_history",
        }
    }
}

pub struct CallRecorder {
    store: Arc<dyn KeyValueStore>,
    layers: Vec<RecordingLayer>,
}

impl CallRecorder {
    /// A recorder with no layers runs operations untouched.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            layers: Vec::new(),
        }
    }

    /// Adds `layer` inside every layer added before it.
    pub fn with_layer(mut self, layer: RecordingLayer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn layers(&self) -> &[RecordingLayer] {
        &self.layers
    }

    /// Runs `action` as `operation` called with `args`, applying each layer.
    /// Store failures inside a layer and failures of `action` itself
    /// propagate unchanged.
    pub fn record<R, F>(
        &self,
        operation: &str,
        args: &[StoredValue],
        action: F,
    ) -> Result<R, CacheError>
    where
        R: Display,
        F: FnOnce() -> Result<R, CacheError>,
    {
        let rendered_args = render_args(args);
        self.run_layers(&self.layers, operation, &rendered_args, action)
    }

    fn run_layers<R, F>(
        &self,
        layers: &[RecordingLayer],
        operation: &str,
        rendered_args: &str,
        action: F,
    ) -> Result<R, CacheError>
    where
        R: Display,
        F: FnOnce() -> Result<R, CacheError>,
    {
        let Some((layer, inner)) = layers.split_first() else {
            return action();
        };

        match layer {
            RecordingLayer::CountCalls => {
                let count = self.store.incr(operation)?;
                append_run_log(
                    "debug",
                    "recorder.call_counted",
                    json!({ "operation": operation, "count": count }),
                );
                self.run_layers(inner, operation, rendered_args, action)
            }
            RecordingLayer::CallHistory => {
                self.store
                    .rpush(&inputs_key(operation), rendered_args.as_bytes())?;
                let output = match self.run_layers(inner, operation, rendered_args, action) {
                    Ok(output) => output,
                    Err(err) => {
                        append_run_log(
                            "warn",
                            "recorder.call_failed",
                            json!({
                                "operation": operation,
                                "args": rendered_args,
                                "error": err.to_string(),
                            }),
                        );
                        return Err(err);
                    }
                };
                let rendered_output = output.to_string();
                self.store
                    .rpush(&outputs_key(operation), rendered_output.as_bytes())?;
                append_run_log(
                    "debug",
                    "recorder.call_logged",
                    json!({
                        "operation": operation,
                        "args": rendered_args,
                        "output": rendered_output,
                    }),
                );
                Ok(output)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{inputs_key, outputs_key, CallRecorder, RecordingLayer};
    use crate::errors::CacheError;
    use crate::store::{KeyValueStore, MemoryStore};
    use crate::value::StoredValue;
    use std::sync::Arc;

    fn recorder(store: &MemoryStore, layers: &[RecordingLayer]) -> CallRecorder {
        layers
            .iter()
            .fold(CallRecorder::new(Arc::new(store.clone())), |rec, layer| {
                rec.with_layer(*layer)
            })
    }

    fn entries(store: &MemoryStore, list: &str) -> Vec<String> {
        store
            .lrange(list, 0, -1)
            .expect("lrange")
            .into_iter()
            .map(|raw| String::from_utf8(raw).expect("utf8"))
            .collect()
    }

    #[test]
    fn no_layers_is_a_passthrough() {
        let store = MemoryStore::new();
        let rec = recorder(&store, &[]);
        let out = rec
            .record("op", &[StoredValue::from(1)], || Ok::<_, CacheError>("done"))
            .expect("record");
        assert_eq!(out, "done");
        assert!(store.journal().is_empty());
    }

    #[test]
    fn counting_wraps_history_which_wraps_the_call() {
        let store = MemoryStore::new();
        let rec = recorder(
            &store,
            &[RecordingLayer::CountCalls, RecordingLayer::CallHistory],
        );
        let inner = store.clone();
        rec.record("Cache.store", &[StoredValue::from("foo")], || {
            inner.set("k1", b"foo")?;
            Ok("k1".to_string())
        })
        .expect("record");

        assert_eq!(
            store.journal(),
            vec![
                "INCR Cache.store".to_string(),
                "RPUSH Cache.store:inputs".to_string(),
                "SET k1".to_string(),
                "RPUSH Cache.store:outputs".to_string(),
            ]
        );
        assert_eq!(entries(&store, &inputs_key("Cache.store")), vec!["('foo',)"]);
        assert_eq!(entries(&store, &outputs_key("Cache.store")), vec!["k1"]);
    }

    #[test]
    fn layers_compose_independently() {
        let store = MemoryStore::new();
        let history_only = recorder(&store, &[RecordingLayer::CallHistory]);
        history_only
            .record("h", &[StoredValue::from(2)], || Ok::<_, CacheError>(4))
            .expect("record");
        assert_eq!(store.get("h").expect("get"), None);
        assert_eq!(entries(&store, "h:inputs"), vec!["(2,)"]);
        assert_eq!(entries(&store, "h:outputs"), vec!["4"]);

        let count_only = recorder(&store, &[RecordingLayer::CountCalls]);
        count_only
            .record("c", &[], || Ok::<_, CacheError>(0))
            .expect("record");
        assert_eq!(store.get("c").expect("get"), Some(b"1".to_vec()));
        assert!(entries(&store, "c:inputs").is_empty());
    }

    #[test]
    fn failed_call_keeps_input_but_writes_no_output() {
        let store = MemoryStore::new();
        let rec = recorder(
            &store,
            &[RecordingLayer::CountCalls, RecordingLayer::CallHistory],
        );
        let err = rec
            .record("op", &[StoredValue::from("x")], || {
                Err::<String, _>(CacheError::StoreUnavailable("down".to_string()))
            })
            .expect_err("action fails");
        assert!(matches!(err, CacheError::StoreUnavailable(_)));

        assert_eq!(store.get("op").expect("get"), Some(b"1".to_vec()));
        assert_eq!(entries(&store, "op:inputs"), vec!["('x',)"]);
        assert!(entries(&store, "op:outputs").is_empty());
    }

    #[test]
    fn counter_failure_skips_the_call_entirely() {
        let store = MemoryStore::new();
        let rec = recorder(
            &store,
            &[RecordingLayer::CountCalls, RecordingLayer::CallHistory],
        );
        store.set_fail_next(CacheError::StoreUnavailable("down".to_string()));
        let mut ran = false;
        let result = rec.record("op", &[], || {
            ran = true;
            Ok::<_, CacheError>(1)
        });
        assert!(result.is_err());
        assert!(!ran);
        assert!(entries(&store, "op:inputs").is_empty());
    }
}
