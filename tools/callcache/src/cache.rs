use crate::convert;
use crate::errors::CacheError;
use crate::key::Key;
use crate::logging::append_run_log;
use crate::recorder::{CallRecorder, RecordingLayer};
use crate::replay::{load_history, CallHistory};
use crate::store::KeyValueStore;
use crate::value::StoredValue;
use serde_json::json;
use std::sync::Arc;

/// Identity under which `Cache::store` is counted and logged.
pub const STORE_OPERATION: &str = "Cache.store";

/// Stores scalar values under random keys and reads them back, recording
/// every `store` call in the backing store.
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
    recorder: CallRecorder,
}

impl Cache {
    /// Wipes everything in `store`, then wraps `store` calls in call
    /// counting and call history.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Result<Self, CacheError> {
        let recorder = CallRecorder::new(Arc::clone(&store))
            .with_layer(RecordingLayer::CountCalls)
            .with_layer(RecordingLayer::CallHistory);
        Self::with_recorder(store, recorder)
    }

    /// Like `new`, with caller-chosen recording layers.
    pub fn with_recorder(
        store: Arc<dyn KeyValueStore>,
        recorder: CallRecorder,
    ) -> Result<Self, CacheError> {
        store.flush_all()?;
        append_run_log(
            "info",
            "cache.created",
            json!({
                "layers": recorder
                    .layers()
                    .iter()
                    .map(|layer| layer.as_str())
                    .collect::<Vec<_>>(),
            }),
        );
        Ok(Self { store, recorder })
    }

    /// Writes `value` under a fresh key and returns the key.
    pub fn store(&self, value: impl Into<StoredValue>) -> Result<Key, CacheError> {
        let value = value.into();
        self.recorder
            .record(STORE_OPERATION, std::slice::from_ref(&value), || {
                let key = Key::generate();
                self.store.set(key.as_str(), &value.to_bytes())?;
                Ok(key)
            })
    }

    /// Reads `key` and applies `convert` to the stored bytes. `Ok(None)` when
    /// nothing is stored under `key`.
    pub fn get<T, F>(&self, key: &Key, convert: F) -> Result<Option<T>, CacheError>
    where
        F: FnOnce(Vec<u8>) -> Result<T, CacheError>,
    {
        match self.store.get(key.as_str())? {
            Some(raw) => convert(raw).map(Some),
            None => Ok(None),
        }
    }

    pub fn get_raw(&self, key: &Key) -> Result<Option<Vec<u8>>, CacheError> {
        self.get(key, convert::identity)
    }

    pub fn get_str(&self, key: &Key) -> Result<Option<String>, CacheError> {
        self.get(key, convert::utf8_text)
    }

    pub fn get_int(&self, key: &Key) -> Result<Option<i64>, CacheError> {
        self.get(key, convert::integer)
    }

    pub fn get_float(&self, key: &Key) -> Result<Option<f64>, CacheError> {
        self.get(key, convert::float)
    }

    /// Times `operation` has been called since the store was last flushed.
    pub fn call_count(&self, operation: &str) -> Result<i64, CacheError> {
        Ok(self
            .store
            .get(operation)?
            .map(convert::integer)
            .transpose()?
            .unwrap_or(0))
    }

    pub fn history(&self, operation: &str) -> Result<CallHistory, CacheError> {
        load_history(self.store.as_ref(), operation)
    }

    pub fn backing_store(&self) -> &dyn KeyValueStore {
        self.store.as_ref()
    }
}
