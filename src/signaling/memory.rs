use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::debug;

use crate::error::SignalingError;
use crate::pairing::PairingCode;
use crate::signaling::SignalingStore;

/// Одно изменение, которое видело хранилище.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreWrite {
    pub method: &'static str,
    pub code: String,
    pub keys: Vec<String>,
}

#[derive(Default)]
struct State {
    records: HashMap<String, Value>,
    watchers: HashMap<(String, String), watch::Sender<Option<Value>>>,
    writes: Vec<StoreWrite>,
}

/// Хранилище в процессе для demo и тестов.
pub struct MemoryStore {
    state: Mutex<State>,
    push: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            push: true,
        }
    }

    /// Без подписок: клиенты вынуждены опрашивать.
    pub fn polling_only() -> Self {
        Self {
            push: false,
            ..Self::new()
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn writes(&self) -> Vec<StoreWrite> {
        self.lock().writes.clone()
    }

    pub fn contains(&self, code: &PairingCode) -> bool {
        self.lock().records.contains_key(code.as_str())
    }
}

fn child<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('/')
        .filter(|p| !p.is_empty())
        .try_fold(record, |v, key| v.get(key))
}

impl State {
    fn record_write(&mut self, method: &'static str, code: &str, value: &Value) {
        let keys = value
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        self.writes.push(StoreWrite {
            method,
            code: code.to_string(),
            keys,
        });
    }

    fn notify(&self, code: &str) {
        let record = self.records.get(code);
        for ((c, path), tx) in &self.watchers {
            if c == code {
                let value = record.and_then(|r| child(r, path)).cloned();
                tx.send_if_modified(|current| {
                    if *current == value {
                        false
                    } else {
                        *current = value.clone();
                        true
                    }
                });
            }
        }
    }
}

#[async_trait]
impl SignalingStore for MemoryStore {
    async fn put(&self, code: &PairingCode, value: Value) -> Result<(), SignalingError> {
        let mut state = self.lock();
        state.record_write("PUT", code.as_str(), &value);
        state.records.insert(code.as_str().to_string(), value);
        state.notify(code.as_str());
        Ok(())
    }

    async fn patch(&self, code: &PairingCode, value: Value) -> Result<(), SignalingError> {
        let Value::Object(fields) = value else {
            return Err(SignalingError::Malformed("patch body must be an object".into()));
        };
        let mut state = self.lock();
        state.record_write("PATCH", code.as_str(), &Value::Object(fields.clone()));
        let record = state
            .records
            .entry(code.as_str().to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !record.is_object() {
            *record = Value::Object(Map::new());
        }
        if let Value::Object(existing) = record {
            for (key, v) in fields {
                if v.is_null() {
                    existing.remove(&key);
                } else {
                    existing.insert(key, v);
                }
            }
        }
        state.notify(code.as_str());
        Ok(())
    }

    async fn get(
        &self,
        code: &PairingCode,
        path: Option<&str>,
    ) -> Result<Option<Value>, SignalingError> {
        let state = self.lock();
        let Some(record) = state.records.get(code.as_str()) else {
            return Ok(None);
        };
        Ok(match path {
            Some(path) => child(record, path).cloned(),
            None => Some(record.clone()),
        })
    }

    async fn delete(&self, code: &PairingCode) -> Result<(), SignalingError> {
        let mut state = self.lock();
        state.writes.push(StoreWrite {
            method: "DELETE",
            code: code.as_str().to_string(),
            keys: Vec::new(),
        });
        if state.records.remove(code.as_str()).is_some() {
            debug!(code = %code, "pairing record removed");
        }
        state.notify(code.as_str());
        Ok(())
    }

    fn subscribe(&self, code: &PairingCode, path: &str) -> Option<watch::Receiver<Option<Value>>> {
        if !self.push {
            return None;
        }
        let mut state = self.lock();
        let current = state
            .records
            .get(code.as_str())
            .and_then(|r| child(r, path))
            .cloned();
        let tx = state
            .watchers
            .entry((code.as_str().to_string(), path.to_string()))
            .or_insert_with(|| watch::channel(current).0);
        Some(tx.subscribe())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn code() -> PairingCode {
        PairingCode::parse("ABCD1234").unwrap()
    }

    #[tokio::test]
    async fn patch_merges_and_null_deletes() {
        let store = MemoryStore::new();
        store.put(&code(), json!({ "ts": 1 })).await.unwrap();
        store.patch(&code(), json!({ "offer": { "x": 1 } })).await.unwrap();
        store.patch(&code(), json!({ "ts": null })).await.unwrap();
        let record = store.get(&code(), None).await.unwrap().unwrap();
        assert_eq!(record, json!({ "offer": { "x": 1 } }));
        assert_eq!(store.get(&code(), Some("offer/x")).await.unwrap(), Some(json!(1)));
        assert!(store.patch(&code(), json!(5)).await.is_err());
    }

    #[tokio::test]
    async fn subscribers_see_the_child_appear() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe(&code(), "answer").unwrap();
        assert_eq!(*rx.borrow_and_update(), None);
        store.patch(&code(), json!({ "offer": 1 })).await.unwrap();
        assert!(!rx.has_changed().unwrap());
        store.patch(&code(), json!({ "answer": 2 })).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), Some(json!(2)));
    }

    #[tokio::test]
    async fn polling_only_has_no_subscriptions() {
        let store = MemoryStore::polling_only();
        assert!(store.subscribe(&code(), "answer").is_none());
        store.delete(&code()).await.unwrap();
        assert_eq!(store.writes().len(), 1);
        assert!(!store.contains(&code()));
    }
}
