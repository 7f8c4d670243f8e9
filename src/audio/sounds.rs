use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Звуки, которые монитор может попросить сыграть на камере.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoundKind {
    #[serde(rename = "whitenoise")]
    WhiteNoise,
    #[serde(rename = "rain")]
    Rain,
    #[serde(rename = "lullaby1")]
    Lullaby1,
    #[serde(rename = "lullaby2")]
    Lullaby2,
}

impl SoundKind {
    pub const ALL: [SoundKind; 4] = [
        SoundKind::WhiteNoise,
        SoundKind::Rain,
        SoundKind::Lullaby1,
        SoundKind::Lullaby2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SoundKind::WhiteNoise => "whitenoise",
            SoundKind::Rain => "rain",
            SoundKind::Lullaby1 => "lullaby1",
            SoundKind::Lullaby2 => "lullaby2",
        }
    }

    pub fn sound(self) -> Sound {
        match self {
            SoundKind::WhiteNoise => Sound::Noise(Noise::White),
            SoundKind::Rain => Sound::Noise(Noise::Rain),
            SoundKind::Lullaby1 => Sound::Melody(Melody::new(TWINKLE)),
            SoundKind::Lullaby2 => Sound::Melody(Melody::new(DESCENDING)),
        }
    }
}

impl fmt::Display for SoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SoundKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SoundKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown sound {s:?}, expected one of whitenoise, rain, lullaby1, lullaby2"))
    }
}

// ноты: C4 C4 G4 G4 A4 A4 G4 F4 F4 E4 E4 D4 D4 C4
const TWINKLE: &[f32] = &[
    261.63, 261.63, 392.00, 392.00, 440.00, 440.00, 392.00, 349.23, 349.23, 329.63, 329.63,
    293.66, 293.66, 261.63,
];

const DESCENDING: &[f32] = &[
    329.63, 293.66, 293.66, 329.63, 293.66, 261.63, 293.66, 329.63, 329.63, 293.66,
];

pub const NOTE_DURATION: Duration = Duration::from_millis(520);
pub const NOTE_GAP: Duration = Duration::from_millis(620);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Melody {
    pub notes: &'static [f32],
    pub note: Duration,
    /// Пауза после конца ноты перед следующей.
    pub gap: Duration,
}

impl Melody {
    pub fn new(notes: &'static [f32]) -> Self {
        Self {
            notes,
            note: NOTE_DURATION,
            gap: NOTE_GAP,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Noise {
    White,
    /// Шум половинной амплитуды через low-pass 900 Гц.
    Rain,
}

impl Noise {
    pub fn amplitude(self) -> f32 {
        match self {
            Noise::White => 1.0,
            Noise::Rain => 0.5,
        }
    }

    pub fn lowpass_hz(self) -> Option<f32> {
        match self {
            Noise::White => None,
            Noise::Rain => Some(900.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sound {
    Melody(Melody),
    Noise(Noise),
}
