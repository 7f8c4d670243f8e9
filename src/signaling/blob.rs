//! Пары без хранилища: пакет одной строкой base64.

use std::io::{Read, Write};

use base64::{engine::general_purpose, Engine as _};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::SignalingError;
use crate::peer::types::SessionPackage;

// Ограничиваем размер распаковываемых данных до 256 KiB
const MAX_DECOMPRESSED_SIZE: u64 = 256 * 1024;

fn malformed(e: impl std::fmt::Display) -> SignalingError {
    SignalingError::Malformed(e.to_string())
}

pub fn encode_package(pkg: &SessionPackage) -> Result<String, SignalingError> {
    // 1. JSON -> байты
    let json = serde_json::to_vec(pkg)?;

    // 2. GZIP сжатие
    let mut gz = GzEncoder::new(Vec::new(), Compression::fast());
    gz.write_all(&json).map_err(malformed)?;
    let compressed = gz.finish().map_err(malformed)?;

    // 3. кодируем в base64
    Ok(general_purpose::STANDARD.encode(compressed))
}

pub fn decode_package(s: &str) -> Result<SessionPackage, SignalingError> {
    let compressed = general_purpose::STANDARD
        .decode(s.trim())
        .map_err(malformed)?;

    // gunzip с ограничением размера для защиты от zip-bomb
    let mut json = Vec::new();
    GzDecoder::new(&compressed[..])
        .take(MAX_DECOMPRESSED_SIZE)
        .read_to_end(&mut json)
        .map_err(malformed)?;

    serde_json::from_slice(&json).map_err(malformed)
}
