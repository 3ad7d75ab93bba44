//! Per-voice resonant filter (§4.8): a cascade of Direct Form II transposed
//! biquads, coefficients recomputed only when cutoff/resonance actually
//! change in a block (the `dirty` bit mirrors the teacher's
//! `filter_dirty`), with cents-domain cutoff lookups driven off a shared
//! [`SincosTable`] so no voice computes `sin`/`cos` itself per block.

use calfbox_sfz::opcodes::FilterType;

/// One Direct Form II transposed biquad section, f64 state to keep
/// resonant cascades from drifting into denormal noise at small signals.
#[derive(Clone, Copy, Debug)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    pub fn identity() -> Self {
        Self { b0: 1.0, b1: 0.0, b2: 0.0, a1: 0.0, a2: 0.0, z1: 0.0, z2: 0.0 }
    }

    pub fn set_coeffs(&mut self, b0: f64, b1: f64, b2: f64, a1: f64, a2: f64) {
        self.b0 = b0;
        self.b1 = b1;
        self.b2 = b2;
        self.a1 = a1;
        self.a2 = a2;
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let x = input as f64;
        let output = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * output + self.z2;
        self.z2 = self.b2 * x - self.a2 * output;
        if self.z1.abs() < 1e-20 {
            self.z1 = 0.0;
        }
        if self.z2.abs() < 1e-20 {
            self.z2 = 0.0;
        }
        output as f32
    }

    /// RBJ peaking-EQ coefficients (the per-region `eqN_freq`/`eqN_bw`/
    /// `eqN_gain` bands, §3/§4.8): `bandwidth` is the cookbook `Q`, `gain_db`
    /// the peak/dip height. Unlike the resonant filter cascade these don't
    /// get cheap enough to recompute per block to bother with a sincos
    /// table — a region's EQ bands are set once, at voice start.
    pub fn set_peaking_eq(&mut self, freq_hz: f32, bandwidth: f32, gain_db: f32, sample_rate: u32) {
        let sr = sample_rate as f32;
        let freq = freq_hz.clamp(1.0, sr / 2.0 - 1.0);
        let q = bandwidth.max(0.01);
        let a = 10f32.powf(gain_db / 40.0);
        let w0 = 2.0 * std::f32::consts::PI * freq / sr;
        let (sin_w0, cos_w0) = (w0.sin(), w0.cos());
        let alpha = sin_w0 / (2.0 * q);

        let b0 = 1.0 + alpha * a;
        let b1 = -2.0 * cos_w0;
        let b2 = 1.0 - alpha * a;
        let a0 = 1.0 + alpha / a;
        let a1 = -2.0 * cos_w0;
        let a2 = 1.0 - alpha / a;

        self.set_coeffs((b0 / a0) as f64, (b1 / a0) as f64, (b2 / a0) as f64, (a1 / a0) as f64, (a2 / a0) as f64);
    }
}

/// One-pole section for `lpf_1p`/`hpf_1p`.
#[derive(Clone, Copy, Debug)]
pub struct OnePole {
    a0: f64,
    b1: f64,
    z1: f64,
}

impl OnePole {
    pub fn identity() -> Self {
        Self { a0: 1.0, b1: 0.0, z1: 0.0 }
    }

    pub fn process(&mut self, input: f32) -> f32 {
        let x = input as f64;
        let y = self.a0 * x - self.b1 * self.z1;
        self.z1 = y;
        y as f32
    }

    /// Same exponential one-pole lowpass used by `FilterStage`'s `lpf_1p`,
    /// reused here as the tone-control filter (§3/§4.8's "one-pole tone
    /// control"): `cutoff_hz` toward `sample_rate/2` opens the tone up,
    /// toward 0 darkens it.
    pub fn set_lowpass(&mut self, cutoff_hz: f32, sample_rate: u32) {
        let x = (-2.0 * std::f32::consts::PI * cutoff_hz / sample_rate as f32).exp();
        self.a0 = (1.0 - x) as f64;
        self.b1 = -x as f64;
    }
}

/// Precomputed sin/cos over a cents-scaled cutoff range, shared across
/// voices, so filter coefficient recomputation never calls `sin`/`cos`
/// directly (§4.8: "avoid trig per voice per block").
pub struct SincosTable {
    step_cents: f32,
    span_cents: f32,
    sin: Vec<f32>,
    cos: Vec<f32>,
}

impl SincosTable {
    /// Covers `[0, span_cents]` worth of normalized angle in `step_cents`
    /// steps; `omega` is looked up by converting a frequency ratio to a
    /// synthetic "cents" position.
    pub fn build(span_cents: f32, step_cents: f32) -> Self {
        let len = (span_cents / step_cents).ceil() as usize + 1;
        let mut sin = Vec::with_capacity(len);
        let mut cos = Vec::with_capacity(len);
        for i in 0..len {
            let angle = i as f32 * step_cents / span_cents * std::f32::consts::PI;
            sin.push(angle.sin());
            cos.push(angle.cos());
        }
        Self { step_cents, span_cents, sin, cos }
    }

    /// `omega` in radians, `0..=PI`.
    pub fn lookup(&self, omega: f32) -> (f32, f32) {
        let clamped = omega.clamp(0.0, std::f32::consts::PI);
        let pos = clamped / std::f32::consts::PI * self.span_cents / self.step_cents;
        let idx = (pos.round() as usize).min(self.sin.len() - 1);
        (self.sin[idx], self.cos[idx])
    }
}

impl Default for SincosTable {
    fn default() -> Self {
        Self::build(1200.0, 1.0)
    }
}

/// A voice's filter slot: one or two cascaded biquads (four-pole shapes
/// run two in series with resonance pre-scaled by sqrt so the pair doesn't
/// double the resonant bump), or a one-pole section for the gentle shapes.
pub struct FilterStage {
    filter_type: FilterType,
    stage_a: Biquad,
    stage_b: Option<Biquad>,
    one_pole: Option<OnePole>,
    dirty: bool,
    last_cutoff_hz: f32,
    last_resonance_db: f32,
}

impl FilterStage {
    pub fn new(filter_type: FilterType) -> Self {
        Self {
            filter_type,
            stage_a: Biquad::identity(),
            stage_b: if is_four_pole(filter_type) { Some(Biquad::identity()) } else { None },
            one_pole: if is_one_pole(filter_type) { Some(OnePole::identity()) } else { None },
            dirty: true,
            last_cutoff_hz: -1.0,
            last_resonance_db: f32::NAN,
        }
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn needs_recompute(&self, cutoff_hz: f32, resonance_db: f32) -> bool {
        self.dirty
            || (cutoff_hz - self.last_cutoff_hz).abs() > 0.01
            || (resonance_db - self.last_resonance_db).abs() > 0.01
    }

    pub fn process(
        &mut self,
        input: f32,
        cutoff_hz: f32,
        resonance_db: f32,
        sample_rate: u32,
        table: &SincosTable,
    ) -> f32 {
        if self.needs_recompute(cutoff_hz, resonance_db) {
            self.recompute(cutoff_hz, resonance_db, sample_rate, table);
            self.last_cutoff_hz = cutoff_hz;
            self.last_resonance_db = resonance_db;
            self.dirty = false;
        }

        let mut v = self.stage_a.process(input);
        if let Some(stage_b) = self.stage_b.as_mut() {
            v = stage_b.process(v);
        }
        if let Some(one_pole) = self.one_pole.as_mut() {
            v = one_pole.process(v);
        }
        v
    }

    fn recompute(&mut self, cutoff_hz: f32, resonance_db: f32, sample_rate: u32, table: &SincosTable) {
        let nyquist = sample_rate as f32 / 2.0;
        let freq = cutoff_hz.clamp(1.0, nyquist - 1.0);
        let omega = 2.0 * std::f32::consts::PI * freq / sample_rate as f32;
        let (sin_omega, cos_omega) = table.lookup(omega);

        let q = 10f32.powf(resonance_db.max(0.0) / 20.0).max(0.5);
        let q_a = if is_four_pole(self.filter_type) { (q).sqrt().max(0.5) } else { q };
        let alpha = sin_omega / (2.0 * q_a);

        let coeffs = rbj_coeffs(self.filter_type, cos_omega, alpha);
        self.stage_a.set_coeffs(coeffs.0, coeffs.1, coeffs.2, coeffs.3, coeffs.4);
        if let Some(stage_b) = self.stage_b.as_mut() {
            stage_b.set_coeffs(coeffs.0, coeffs.1, coeffs.2, coeffs.3, coeffs.4);
        }

        if let Some(one_pole) = self.one_pole.as_mut() {
            let x = (-2.0 * std::f32::consts::PI * freq / sample_rate as f32).exp();
            match self.filter_type {
                FilterType::Hpf1p => {
                    one_pole.a0 = ((1.0 + x) / 2.0) as f64;
                    one_pole.b1 = -x as f64;
                }
                _ => {
                    one_pole.a0 = (1.0 - x) as f64;
                    one_pole.b1 = -x as f64;
                }
            }
        }
    }
}

fn is_four_pole(t: FilterType) -> bool {
    matches!(t, FilterType::Lpf24 | FilterType::Hpf24 | FilterType::Lpf24Hybrid)
}

fn is_one_pole(t: FilterType) -> bool {
    matches!(t, FilterType::Lpf1p | FilterType::Hpf1p)
}

/// RBJ cookbook biquad coefficients, already normalized by `a0`, for the
/// two-pole shapes (and the first stage of the four-pole cascades).
fn rbj_coeffs(filter_type: FilterType, cos_omega: f32, alpha: f32) -> (f64, f64, f64, f64, f64) {
    let (b0, b1, b2, a0, a1, a2) = match filter_type {
        FilterType::Hpf12 | FilterType::Hpf24 => {
            let b0 = (1.0 + cos_omega) / 2.0;
            let b1 = -(1.0 + cos_omega);
            let b2 = (1.0 + cos_omega) / 2.0;
            let a0 = 1.0 + alpha;
            let a1 = -2.0 * cos_omega;
            let a2 = 1.0 - alpha;
            (b0, b1, b2, a0, a1, a2)
        }
        FilterType::Bpf12 => {
            let b0 = alpha;
            let b1 = 0.0;
            let b2 = -alpha;
            let a0 = 1.0 + alpha;
            let a1 = -2.0 * cos_omega;
            let a2 = 1.0 - alpha;
            (b0, b1, b2, a0, a1, a2)
        }
        FilterType::Notch => {
            let b0 = 1.0;
            let b1 = -2.0 * cos_omega;
            let b2 = 1.0;
            let a0 = 1.0 + alpha;
            let a1 = -2.0 * cos_omega;
            let a2 = 1.0 - alpha;
            (b0, b1, b2, a0, a1, a2)
        }
        _ => {
            // Lpf12, Lpf24, Lpf24Hybrid, and the one-pole shapes' shared
            // stage_a (one_pole handles their actual rolloff separately).
            let b0 = (1.0 - cos_omega) / 2.0;
            let b1 = 1.0 - cos_omega;
            let b2 = (1.0 - cos_omega) / 2.0;
            let a0 = 1.0 + alpha;
            let a1 = -2.0 * cos_omega;
            let a2 = 1.0 - alpha;
            (b0, b1, b2, a0, a1, a2)
        }
    };
    (
        (b0 / a0) as f64,
        (b1 / a0) as f64,
        (b2 / a0) as f64,
        (a1 / a0) as f64,
        (a2 / a0) as f64,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowpass_attenuates_high_frequency_tone() {
        let table = SincosTable::default();
        let mut filter = FilterStage::new(FilterType::Lpf12);
        let sample_rate = 44100;
        let tone_freq = 8000.0;

        let mut max_in = 0.0f32;
        let mut max_out = 0.0f32;
        for i in 0..2000 {
            let x = (2.0 * std::f32::consts::PI * tone_freq * i as f32 / sample_rate as f32).sin();
            let y = filter.process(x, 500.0, 6.0, sample_rate, &table);
            max_in = max_in.max(x.abs());
            if i > 200 {
                max_out = max_out.max(y.abs());
            }
        }
        assert!(max_out < max_in * 0.5);
    }

    #[test]
    fn unchanged_cutoff_skips_recompute() {
        let table = SincosTable::default();
        let mut filter = FilterStage::new(FilterType::Lpf12);
        filter.process(0.0, 1000.0, 0.0, 44100, &table);
        assert!(!filter.dirty);
        filter.process(0.0, 1000.0, 0.0, 44100, &table);
        assert!(!filter.dirty);
    }

    #[test]
    fn four_pole_cascades_two_sections() {
        let filter = FilterStage::new(FilterType::Lpf24);
        assert!(filter.stage_b.is_some());
        let filter12 = FilterStage::new(FilterType::Lpf12);
        assert!(filter12.stage_b.is_none());
    }
}
