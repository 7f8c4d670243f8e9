use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::output::{AudioContext, SoftwareContext, SoundUnit};
use crate::audio::sounds::{Melody, Noise, Sound, SoundKind};
use crate::audio::synth::noise_buffer;
use crate::config::AudioConfig;
use crate::error::AudioError;

pub type ContextFactory =
    Arc<dyn Fn() -> Result<Arc<dyn AudioContext>, AudioError> + Send + Sync>;

/// Состояние текущего голоса. Одновременно звучит не больше одного.
#[derive(Default)]
struct Voice {
    kind: Option<SoundKind>,
    /// Увеличивается при каждом teardown; устаревшие таймеры сверяются с ним.
    generation: u64,
    melody_active: bool,
    timer: Option<JoinHandle<()>>,
    tone: Option<Box<dyn SoundUnit>>,
    noise: Option<Box<dyn SoundUnit>>,
    note: Option<f32>,
}

#[derive(Default)]
struct Inner {
    ctx: Option<Arc<dyn AudioContext>>,
    voice: Voice,
}

/// Проигрыватель звуков на стороне камеры.
#[derive(Clone)]
pub struct AudioEngine {
    inner: Arc<Mutex<Inner>>,
    factory: ContextFactory,
}

impl std::fmt::Debug for AudioEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioEngine")
            .field("playing", &self.current())
            .finish()
    }
}

impl AudioEngine {
    /// Контекст создаётся при первом `play`, не здесь.
    pub fn new(factory: ContextFactory) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            factory,
        }
    }

    /// Движок поверх [`SoftwareContext`], который вызывающий может рендерить или стримить.
    pub fn software(config: &AudioConfig) -> (Self, Arc<SoftwareContext>) {
        let ctx = Arc::new(SoftwareContext::new(config.sample_rate, config.gain));
        let shared = ctx.clone();
        let engine = Self::new(Arc::new(move || Ok(shared.clone() as Arc<dyn AudioContext>)));
        (engine, ctx)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ленивое создание контекста; если он приостановлен, пробуем возобновить.
    fn context(&self, inner: &mut Inner) -> Result<Arc<dyn AudioContext>, AudioError> {
        let ctx = match &inner.ctx {
            Some(ctx) => ctx.clone(),
            None => {
                let ctx = (self.factory)()?;
                info!(sample_rate = ctx.sample_rate(), "audio context created");
                inner.ctx = Some(ctx.clone());
                ctx
            }
        };
        if ctx.is_suspended() {
            if let Err(e) = ctx.resume() {
                warn!("audio context resume failed: {e}");
            }
        }
        Ok(ctx)
    }

    /// Заменяет текущий звук на `kind`, даже если это тот же самый.
    pub fn play(&self, kind: SoundKind) -> Result<(), AudioError> {
        let mut inner = self.lock();
        let ctx = self.context(&mut inner)?;
        teardown(&mut inner.voice);
        inner.voice.kind = Some(kind);
        info!(sound = %kind, "playing");
        match kind.sound() {
            Sound::Noise(noise) => start_noise(&ctx, &mut inner.voice, noise),
            Sound::Melody(melody) => {
                inner.voice.melody_active = true;
                let generation = inner.voice.generation;
                drop(inner);
                self.step(melody, generation, 0);
                Ok(())
            }
        }
    }

    /// Ничего не делает, если ничего не играет.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.voice.kind.is_some() {
            info!("sound stopped");
        }
        teardown(&mut inner.voice);
    }

    pub fn current(&self) -> Option<SoundKind> {
        self.lock().voice.kind
    }

    /// Частота звучащей сейчас ноты мелодии.
    pub fn current_note(&self) -> Option<f32> {
        self.lock().voice.note
    }

    pub fn pending_timers(&self) -> usize {
        let inner = self.lock();
        inner
            .voice
            .timer
            .as_ref()
            .map_or(0, |t| usize::from(!t.is_finished()))
    }

    pub fn active_units(&self) -> usize {
        let voice = &self.lock().voice;
        usize::from(voice.tone.is_some()) + usize::from(voice.noise.is_some())
    }

    /// Запускает ноту `index` и планирует следующую: конец ноты плюс пауза.
    fn step(&self, melody: Melody, generation: u64, index: usize) {
        let mut inner = self.lock();
        if !inner.voice.melody_active || inner.voice.generation != generation {
            return;
        }
        let Some(ctx) = inner.ctx.clone() else {
            return;
        };
        let freq = melody.notes[index];
        if let Some(mut old) = inner.voice.tone.take() {
            old.disconnect();
        }
        match ctx.start_tone(freq, melody.note) {
            Ok(unit) => {
                inner.voice.tone = Some(unit);
                inner.voice.note = Some(freq);
            }
            Err(e) => debug!("note {freq} Hz failed: {e}"),
        }

        let engine = self.clone();
        let next = (index + 1) % melody.notes.len();
        inner.voice.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(melody.note).await;
            if !engine.is_current(generation) {
                return;
            }
            engine.end_note(generation);
            tokio::time::sleep(melody.gap).await;
            engine.step(melody, generation, next);
        }));
    }

    fn is_current(&self, generation: u64) -> bool {
        let inner = self.lock();
        inner.voice.melody_active && inner.voice.generation == generation
    }

    fn end_note(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.voice.generation != generation {
            return;
        }
        inner.voice.note = None;
        if let Some(mut tone) = inner.voice.tone.take() {
            tone.disconnect();
        }
    }
}

fn start_noise(ctx: &Arc<dyn AudioContext>, voice: &mut Voice, noise: Noise) -> Result<(), AudioError> {
    let buffer: Arc<[f32]> = noise_buffer(ctx.sample_rate(), 2, noise.amplitude()).into();
    let unit = ctx.start_loop(buffer, noise.lowpass_hz())?;
    voice.noise = Some(unit);
    Ok(())
}

/// Таймер, тон, шум: каждая часть освобождается независимо от остальных.
fn teardown(voice: &mut Voice) {
    voice.melody_active = false;
    voice.generation += 1;
    voice.kind = None;
    voice.note = None;
    if let Some(timer) = voice.timer.take() {
        timer.abort();
    }
    if let Some(mut tone) = voice.tone.take() {
        if let Err(e) = tone.stop() {
            debug!("tone stop: {e}");
        }
        tone.disconnect();
    }
    if let Some(mut noise) = voice.noise.take() {
        if let Err(e) = noise.stop() {
            debug!("noise stop: {e}");
        }
        noise.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn engine() -> (AudioEngine, Arc<SoftwareContext>) {
        AudioEngine::software(&AudioConfig {
            gain: 0.28,
            sample_rate: 8000,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn second_play_replaces_first_voice() {
        let (engine, ctx) = engine();
        engine.play(SoundKind::Lullaby1).unwrap();
        assert_eq!(engine.pending_timers(), 1);
        engine.play(SoundKind::WhiteNoise).unwrap();

        assert_eq!(engine.current(), Some(SoundKind::WhiteNoise));
        assert_eq!(engine.pending_timers(), 0);
        assert_eq!(engine.active_units(), 1);
        assert_eq!(ctx.active_sources(), 1);

        // старая цепочка мелодии больше не просыпается
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(engine.current_note(), None);
        assert_eq!(ctx.active_sources(), 1);
    }

    #[tokio::test]
    async fn stop_without_voice_is_a_no_op() {
        let (engine, ctx) = engine();
        engine.stop();
        assert_eq!(engine.current(), None);
        assert_eq!(engine.active_units(), 0);
        assert_eq!(ctx.active_sources(), 0);
        assert!(ctx.is_suspended());
    }

    #[tokio::test(start_paused = true)]
    async fn melody_wraps_to_first_note() {
        const NOTES: &[f32] = &[300.0, 400.0];
        let (engine, _ctx) = engine();
        engine.play(SoundKind::Lullaby2).unwrap();
        let melody = Melody::new(NOTES);
        let generation = {
            let mut inner = engine.lock();
            teardown(&mut inner.voice);
            inner.voice.melody_active = true;
            inner.voice.generation
        };
        engine.step(melody, generation, 0);
        let cycle = melody.note + melody.gap;
        let probe = Duration::from_millis(10);

        assert_eq!(engine.current_note(), Some(300.0));
        tokio::time::sleep(cycle + probe).await;
        assert_eq!(engine.current_note(), Some(400.0));
        tokio::time::sleep(cycle).await;
        assert_eq!(engine.current_note(), Some(300.0));
        // пауза между нотами
        tokio::time::sleep(melody.note).await;
        assert_eq!(engine.current_note(), None);
    }

    #[tokio::test]
    async fn context_is_created_once_and_resumed() {
        let created = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = created.clone();
        let ctx = Arc::new(SoftwareContext::new(8000, 0.28));
        let shared = ctx.clone();
        let engine = AudioEngine::new(Arc::new(move || {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(shared.clone() as Arc<dyn AudioContext>)
        }));
        engine.play(SoundKind::Rain).unwrap();
        engine.play(SoundKind::Rain).unwrap();
        engine.stop();
        assert_eq!(created.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert!(!ctx.is_suspended());
        assert_eq!(ctx.active_sources(), 0);
    }
}
