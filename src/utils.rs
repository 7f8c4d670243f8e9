use crate::config::ServerConfig;
use rand::Rng;

pub fn random_id() -> String {
    hex::encode(rand::rng().random::<[u8; 8]>())
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// Добавляет схему `stun:` к URL ICE сервера, если она отсутствует
pub fn add_ice_url_scheme(config: &ServerConfig) -> String {
    if config.url.starts_with("stun:") || config.url.starts_with("stuns:") {
        config.url.clone()
    } else {
        format!("stun:{}", config.url)
    }
}
