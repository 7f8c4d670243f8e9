//! Хранилище записей пары: offer камеры и answer монитора встречаются
//! под коротким кодом.

pub mod blob;
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::error::SignalingError;
use crate::pairing::PairingCode;
use crate::peer::types::{PairingRecord, SessionPackage};
use crate::utils::now_millis;

pub use memory::MemoryStore;
pub use rest::RestStore;

pub const OFFER_PATH: &str = "offer";
pub const ANSWER_PATH: &str = "answer";

/// Key-value хранилище JSON записей по коду пары.
#[async_trait]
pub trait SignalingStore: Send + Sync {
    /// Заменяет запись целиком.
    async fn put(&self, code: &PairingCode, value: Value) -> Result<(), SignalingError>;
    /// Сливает ключи верхнего уровня; значение `null` удаляет ключ.
    async fn patch(&self, code: &PairingCode, value: Value) -> Result<(), SignalingError>;
    /// Запись или её дочерний узел. Отсутствие это `Ok(None)`.
    async fn get(&self, code: &PairingCode, path: Option<&str>)
        -> Result<Option<Value>, SignalingError>;
    async fn delete(&self, code: &PairingCode) -> Result<(), SignalingError>;

    /// Push-уведомления для одного узла, если хранилище их поддерживает.
    fn subscribe(&self, _code: &PairingCode, _path: &str) -> Option<watch::Receiver<Option<Value>>> {
        None
    }
}

/// Свежая запись под кодом, старые offer/answer стираются
pub async fn open_record(store: &dyn SignalingStore, code: &PairingCode) -> Result<(), SignalingError> {
    store.put(code, json!({ "ts": now_millis() })).await
}

pub async fn publish_offer(
    store: &dyn SignalingStore,
    code: &PairingCode,
    offer: &SessionPackage,
) -> Result<(), SignalingError> {
    store.patch(code, json!({ OFFER_PATH: offer })).await
}

pub async fn publish_answer(
    store: &dyn SignalingStore,
    code: &PairingCode,
    answer: &SessionPackage,
) -> Result<(), SignalingError> {
    store.patch(code, json!({ ANSWER_PATH: answer })).await
}

pub async fn fetch_offer(
    store: &dyn SignalingStore,
    code: &PairingCode,
) -> Result<Option<SessionPackage>, SignalingError> {
    let value = store.get(code, Some(OFFER_PATH)).await?;
    decode(value)
}

pub async fn fetch_answer(
    store: &dyn SignalingStore,
    code: &PairingCode,
) -> Result<Option<SessionPackage>, SignalingError> {
    let value = store.get(code, Some(ANSWER_PATH)).await?;
    decode(value)
}

/// Запись целиком: метка времени и те пакеты, что есть.
pub async fn fetch_record(
    store: &dyn SignalingStore,
    code: &PairingCode,
) -> Result<Option<PairingRecord>, SignalingError> {
    match store.get(code, None).await? {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| SignalingError::Malformed(e.to_string())),
    }
}

/// Пакет из JSON значения; `null` считается отсутствием.
pub fn decode(value: Option<Value>) -> Result<Option<SessionPackage>, SignalingError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(v) => serde_json::from_value(v)
            .map(Some)
            .map_err(|e| SignalingError::Malformed(e.to_string())),
    }
}
