use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rand::Rng;
use tracing::{debug, warn};

use crate::error::SignalingError;

/// Без 0/1/I/O, чтобы код можно было продиктовать.
pub const CODE_ALPHABET: &[u8] = b"23456789ABCDEFGHJKLMNPQRSTUVWXYZ";
pub const CODE_LEN: usize = 8;
// ключ записи в хранилище, не должен содержать `/ . # $ [ ]`
const MAX_CODE_LEN: usize = 64;

/// Короткий код, который вводят оба устройства, чтобы найти одну запись.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PairingCode(String);

impl PairingCode {
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Ввод обрезается и переводится в верхний регистр. Введённый код может
    /// состоять из любых ASCII букв и цифр.
    pub fn parse(input: &str) -> Result<Self, SignalingError> {
        let code = input.trim().to_ascii_uppercase();
        if code.is_empty()
            || code.len() > MAX_CODE_LEN
            || !code.bytes().all(|b| b.is_ascii_alphanumeric())
        {
            return Err(SignalingError::InvalidCode(input.to_string()));
        }
        Ok(Self(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Код из файла, если он там есть и валиден; иначе новый, который сохраняется.
    pub fn load_or_generate(code_file: Option<&Path>) -> Self {
        let Some(path) = code_file else {
            return Self::generate();
        };
        if let Ok(saved) = std::fs::read_to_string(path) {
            match Self::parse(&saved) {
                Ok(code) => {
                    debug!(path = %path.display(), "reusing saved pairing code");
                    return code;
                }
                Err(e) => warn!("ignoring saved pairing code: {e}"),
            }
        }
        let code = Self::generate();
        code.save(path);
        code
    }

    pub fn save(&self, path: &Path) {
        if let Err(e) = std::fs::write(path, &self.0) {
            warn!(path = %path.display(), "could not remember pairing code: {e}");
        }
    }
}

impl fmt::Display for PairingCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PairingCode {
    type Err = SignalingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_codes_use_the_alphabet() {
        for _ in 0..50 {
            let code = PairingCode::generate();
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(code.as_str().bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }

    #[test]
    fn parse_normalizes_input() {
        assert_eq!(PairingCode::parse("  abcd2345 \n").unwrap().as_str(), "ABCD2345");
        assert_eq!(PairingCode::parse("1234").unwrap().as_str(), "1234");
        assert_eq!(PairingCode::parse("ABCD1234").unwrap().as_str(), "ABCD1234");
    }

    #[test]
    fn parse_rejects_ambiguous_or_empty() {
        assert!(PairingCode::parse("").is_err());
        assert!(PairingCode::parse("ABCD-123").is_err());
        assert!(PairingCode::parse("ABC/1234").is_err());
        assert!(PairingCode::parse(&"A".repeat(65)).is_err());
    }

    #[test]
    fn code_file_round_trip() {
        let path = std::env::temp_dir().join(format!("babymon-code-{}", crate::utils::random_id()));
        let first = PairingCode::load_or_generate(Some(&path));
        let second = PairingCode::load_or_generate(Some(&path));
        assert_eq!(first, second);
        let _ = std::fs::remove_file(&path);
    }
}
