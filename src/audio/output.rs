use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::{BufMut, BytesMut};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::synth::{Biquad, SineOsc};
use crate::error::AudioError;

/// Запущенный источник; повторный stop безвреден.
pub trait SoundUnit: Send {
    fn stop(&mut self) -> Result<(), AudioError>;
    fn disconnect(&mut self);
}

/// Выходной граф движка: тоны и зацикленные буферы за общим gain.
pub trait AudioContext: Send + Sync {
    fn sample_rate(&self) -> u32;
    fn is_suspended(&self) -> bool;
    fn resume(&self) -> Result<(), AudioError>;
    fn start_tone(&self, freq: f32, duration: Duration) -> Result<Box<dyn SoundUnit>, AudioError>;
    fn start_loop(
        &self,
        buffer: Arc<[f32]>,
        lowpass_hz: Option<f32>,
    ) -> Result<Box<dyn SoundUnit>, AudioError>;
}

enum Source {
    Tone { osc: SineOsc, remaining: usize },
    Loop { buffer: Arc<[f32]>, pos: usize, filter: Option<Biquad> },
}

impl Source {
    /// `None`, когда источник закончился.
    fn next_sample(&mut self) -> Option<f32> {
        match self {
            Source::Tone { osc, remaining } => {
                if *remaining == 0 {
                    return None;
                }
                *remaining -= 1;
                Some(osc.next_sample())
            }
            Source::Loop { buffer, pos, filter } => {
                if buffer.is_empty() {
                    return None;
                }
                let x = buffer[*pos];
                *pos = (*pos + 1) % buffer.len();
                Some(match filter {
                    Some(f) => f.process(x),
                    None => x,
                })
            }
        }
    }
}

#[derive(Default)]
struct Mixer {
    next_id: u64,
    sources: HashMap<u64, Source>,
}

/// Программный микшер: источники суммируются и умножаются на общий gain.
///
/// Стартует приостановленным, как браузерный audio context без жеста
/// пользователя; до [`AudioContext::resume`] ничего не рендерится.
pub struct SoftwareContext {
    sample_rate: u32,
    gain: f32,
    suspended: AtomicBool,
    mixer: Arc<Mutex<Mixer>>,
}

impl SoftwareContext {
    pub fn new(sample_rate: u32, gain: f32) -> Self {
        Self {
            sample_rate,
            gain,
            suspended: AtomicBool::new(true),
            mixer: Arc::new(Mutex::new(Mixer::default())),
        }
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Источники, которые ещё звучат.
    pub fn active_sources(&self) -> usize {
        self.mixer().sources.len()
    }

    /// Заполняет `out` следующим блоком микса.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);
        if self.is_suspended() {
            return;
        }
        let mut mixer = self.mixer();
        let mut finished = Vec::new();
        for (id, source) in mixer.sources.iter_mut() {
            for sample in out.iter_mut() {
                match source.next_sample() {
                    Some(s) => *sample += s * self.gain,
                    None => {
                        finished.push(*id);
                        break;
                    }
                }
            }
        }
        for id in finished {
            mixer.sources.remove(&id);
        }
    }

    fn add(&self, source: Source) -> Box<dyn SoundUnit> {
        let mut mixer = self.mixer();
        let id = mixer.next_id;
        mixer.next_id += 1;
        mixer.sources.insert(id, source);
        Box::new(MixerUnit {
            id,
            mixer: self.mixer.clone(),
        })
    }
}

impl AudioContext for SoftwareContext {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_suspended(&self) -> bool {
        self.suspended.load(Ordering::SeqCst)
    }

    fn resume(&self) -> Result<(), AudioError> {
        if self.suspended.swap(false, Ordering::SeqCst) {
            debug!(sample_rate = self.sample_rate, "audio context resumed");
        }
        Ok(())
    }

    fn start_tone(&self, freq: f32, duration: Duration) -> Result<Box<dyn SoundUnit>, AudioError> {
        if !freq.is_finite() || freq <= 0.0 {
            return Err(AudioError::Unit(format!("bad tone frequency {freq}")));
        }
        let remaining = (duration.as_secs_f32() * self.sample_rate as f32) as usize;
        Ok(self.add(Source::Tone {
            osc: SineOsc::new(freq, self.sample_rate),
            remaining,
        }))
    }

    fn start_loop(
        &self,
        buffer: Arc<[f32]>,
        lowpass_hz: Option<f32>,
    ) -> Result<Box<dyn SoundUnit>, AudioError> {
        if buffer.is_empty() {
            return Err(AudioError::Unit("empty loop buffer".into()));
        }
        let filter = lowpass_hz.map(|hz| Biquad::lowpass(hz, self.sample_rate));
        Ok(self.add(Source::Loop {
            buffer,
            pos: 0,
            filter,
        }))
    }
}

struct MixerUnit {
    id: u64,
    mixer: Arc<Mutex<Mixer>>,
}

impl MixerUnit {
    fn detach(&self) {
        self.mixer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sources
            .remove(&self.id);
    }
}

impl SoundUnit for MixerUnit {
    fn stop(&mut self) -> Result<(), AudioError> {
        self.detach();
        Ok(())
    }

    fn disconnect(&mut self) {
        self.detach();
    }
}

/// Пишет микс как signed 16-bit little-endian mono PCM, блоками по 20 мс.
pub fn spawn_pcm_writer(
    ctx: Arc<SoftwareContext>,
    path: PathBuf,
) -> JoinHandle<std::io::Result<()>> {
    tokio::spawn(async move {
        let mut file = tokio::fs::File::create(&path).await?;
        info!(path = %path.display(), rate = ctx.sample_rate(), "writing camera audio as s16le");
        let block = (ctx.sample_rate() / 50).max(1) as usize;
        let mut samples = vec![0.0f32; block];
        let mut bytes = BytesMut::with_capacity(block * 2);
        let mut ticker = tokio::time::interval(Duration::from_millis(20));
        loop {
            ticker.tick().await;
            ctx.render(&mut samples);
            bytes.clear();
            for s in &samples {
                bytes.put_i16_le((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
            }
            file.write_all(&bytes).await?;
        }
    })
}
