//! Колыбельные и шум, которые камера играет по просьбе монитора.

pub mod engine;
pub mod output;
pub mod sounds;
pub mod synth;

pub use engine::AudioEngine;
pub use output::{AudioContext, SoftwareContext, SoundUnit};
pub use sounds::SoundKind;
