//! Сессии камеры и монитора: захват, согласование, управление и teardown
//! для одного кода.

pub mod camera;
pub mod monitor;
pub mod teardown;

use std::sync::Arc;

use crate::config::Config;
use crate::error::SignalingError;
use crate::media::{HeadlessDevices, MediaDevices};
use crate::peer::connection::{RtcTransportFactory, TransportFactory};
use crate::peer::loopback::LoopbackNetwork;
use crate::signaling::{MemoryStore, RestStore, SignalingStore};

pub use camera::CameraSession;
pub use monitor::MonitorSession;
pub use teardown::{Teardown, TeardownReport};

/// Всё, что сессии нужно извне
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<Config>,
    pub signaling: Arc<dyn SignalingStore>,
    pub transports: Arc<dyn TransportFactory>,
    pub devices: Arc<dyn MediaDevices>,
}

impl SessionDeps {
    /// Транспорт webrtc-rs и настроенное REST-хранилище.
    pub fn from_config(config: Config) -> Result<Self, SignalingError> {
        let base = config
            .signaling
            .base_url
            .as_deref()
            .ok_or(SignalingError::NotConfigured)?;
        let signaling = Arc::new(RestStore::new(base)?);
        let transports = Arc::new(RtcTransportFactory::new(config.ice.clone()));
        Ok(Self {
            config: Arc::new(config),
            signaling,
            transports,
            devices: Arc::new(HeadlessDevices),
        })
    }

    /// Обе роли в одном процессе: loopback-транспорт и хранилище в памяти.
    pub fn loopback(config: Config, store: Arc<MemoryStore>) -> Self {
        Self {
            config: Arc::new(config),
            signaling: store,
            transports: Arc::new(LoopbackNetwork::new()),
            devices: Arc::new(HeadlessDevices),
        }
    }
}
