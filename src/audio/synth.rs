use std::f32::consts::PI;

use rand::Rng;

/// Синусоидальный генератор с фазовым аккумулятором
#[derive(Debug, Clone)]
pub struct SineOsc {
    phase: f32,
    step: f32,
}

impl SineOsc {
    pub fn new(freq: f32, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: 2.0 * PI * freq / sample_rate as f32,
        }
    }

    pub fn next_sample(&mut self) -> f32 {
        let s = self.phase.sin();
        self.phase += self.step;
        if self.phase >= 2.0 * PI {
            self.phase -= 2.0 * PI;
        }
        s
    }
}

/// Моно-буфер равномерного шума в `[-amplitude, amplitude)`.
pub fn noise_buffer(sample_rate: u32, seconds: u32, amplitude: f32) -> Vec<f32> {
    let mut rng = rand::rng();
    let len = (sample_rate * seconds) as usize;
    (0..len)
        .map(|_| rng.random_range(-1.0f32..1.0) * amplitude)
        .collect()
}

/// Low-pass второго порядка (RBJ cookbook), прямая форма I.
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl Biquad {
    pub fn lowpass(cutoff: f32, sample_rate: u32) -> Self {
        let q = std::f32::consts::FRAC_1_SQRT_2;
        let w0 = 2.0 * PI * cutoff / sample_rate as f32;
        let alpha = w0.sin() / (2.0 * q);
        let cos = w0.cos();
        let a0 = 1.0 + alpha;
        Self {
            b0: (1.0 - cos) / 2.0 / a0,
            b1: (1.0 - cos) / a0,
            b2: (1.0 - cos) / 2.0 / a0,
            a1: -2.0 * cos / a0,
            a2: (1.0 - alpha) / a0,
            x1: 0.0,
            x2: 0.0,
            y1: 0.0,
            y2: 0.0,
        }
    }

    pub fn process(&mut self, x: f32) -> f32 {
        let y = self.b0 * x + self.b1 * self.x1 + self.b2 * self.x2
            - self.a1 * self.y1
            - self.a2 * self.y2;
        self.x2 = self.x1;
        self.x1 = x;
        self.y2 = self.y1;
        self.y1 = y;
        y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noise_stays_in_range() {
        let buf = noise_buffer(8000, 2, 0.5);
        assert_eq!(buf.len(), 16000);
        assert!(buf.iter().all(|s| (-0.5..0.5).contains(s)));
    }

    #[test]
    fn sine_period_matches_frequency() {
        // 1 kHz при 48 kHz: 48 отсчётов на период
        let mut osc = SineOsc::new(1000.0, 48000);
        let first = osc.next_sample();
        for _ in 0..47 {
            osc.next_sample();
        }
        assert!((osc.next_sample() - first).abs() < 1e-3);
    }

    #[test]
    fn lowpass_passes_dc_and_damps_nyquist() {
        let mut lp = Biquad::lowpass(900.0, 48000);
        let mut dc = 0.0;
        for _ in 0..4800 {
            dc = lp.process(1.0);
        }
        assert!((dc - 1.0).abs() < 1e-3);

        let mut lp = Biquad::lowpass(900.0, 48000);
        let mut peak = 0.0f32;
        for i in 0..4800 {
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let y = lp.process(x);
            if i > 480 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.01);
    }
}
