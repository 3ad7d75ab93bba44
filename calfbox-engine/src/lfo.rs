//! Per-voice LFO runtime (§4.6 step 2): delay, fade-in, waveform shaping,
//! and depth scaling. `sample_hold` draws a fresh random value from the
//! voice's own PCG stream each time phase wraps, rather than one engine-wide
//! generator, so replaying the same voice with the same seed is repeatable.

use rand::RngCore;
use rand_pcg::Pcg32;

use calfbox_sfz::layer::LfoRuntimeSpec;
use calfbox_sfz::opcodes::LfoWave;

pub struct LfoRuntime {
    phase: f32,
    elapsed_samples: u32,
    rng: Pcg32,
    held_value: f32,
}

impl LfoRuntime {
    pub fn new(seed: u64, phase0: f32) -> Self {
        Self {
            phase: phase0.rem_euclid(1.0),
            elapsed_samples: 0,
            rng: Pcg32::new(seed, 0xda3e_39cb_94b9_5bdb),
            held_value: 0.0,
        }
    }

    /// Advance by `block_size` frames and return the scaled, delay/fade
    /// adjusted output for this block.
    pub fn advance_block(&mut self, spec: &LfoRuntimeSpec, sample_rate: u32, block_size: u32) -> f32 {
        self.elapsed_samples = self.elapsed_samples.saturating_add(block_size);
        if self.elapsed_samples < spec.delay_samples {
            return 0.0;
        }

        let delta = spec.freq_hz / sample_rate.max(1) as f32 * block_size as f32;
        let prev_phase = self.phase;
        self.phase = (self.phase + delta).rem_euclid(1.0);
        let wrapped = spec.wave == LfoWave::SampleHold && self.phase < prev_phase;
        if wrapped || (spec.wave == LfoWave::SampleHold && self.elapsed_samples == block_size) {
            self.held_value = (self.rng.next_u32() as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }

        let raw = shape(spec.wave, self.phase, self.held_value);

        let since_delay = self.elapsed_samples - spec.delay_samples;
        let fade = if spec.fade_samples == 0 {
            1.0
        } else {
            (since_delay as f32 / spec.fade_samples as f32).min(1.0)
        };

        raw * fade * spec.depth
    }
}

fn shape(wave: LfoWave, phase: f32, held: f32) -> f32 {
    use std::f32::consts::PI;
    match wave {
        LfoWave::Triangle => 4.0 * (phase - (phase + 0.75).floor() + 0.25).abs() - 1.0,
        LfoWave::Sine => (phase * 2.0 * PI).sin(),
        LfoWave::Square | LfoWave::Square50 => {
            if phase < 0.5 {
                1.0
            } else {
                -1.0
            }
        }
        LfoWave::Square25 => {
            if phase < 0.25 {
                1.0
            } else {
                -1.0
            }
        }
        LfoWave::Square12 => {
            if phase < 0.125 {
                1.0
            } else {
                -1.0
            }
        }
        LfoWave::SawUp => 2.0 * phase - 1.0,
        LfoWave::SawDown => 1.0 - 2.0 * phase,
        LfoWave::SampleHold => held,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(wave: LfoWave) -> LfoRuntimeSpec {
        LfoRuntimeSpec {
            freq_hz: 10.0,
            delay_samples: 0,
            fade_samples: 0,
            wave,
            phase0: 0.0,
            depth: 1.0,
        }
    }

    #[test]
    fn delay_holds_at_zero() {
        let mut spec = spec(LfoWave::Sine);
        spec.delay_samples = 1000;
        let mut lfo = LfoRuntime::new(1, 0.0);
        assert_eq!(lfo.advance_block(&spec, 44100, 16), 0.0);
    }

    #[test]
    fn sine_stays_in_unit_range() {
        let spec = spec(LfoWave::Sine);
        let mut lfo = LfoRuntime::new(1, 0.0);
        for _ in 0..200 {
            let v = lfo.advance_block(&spec, 44100, 16);
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn fade_in_ramps_from_zero() {
        let mut spec = spec(LfoWave::Square);
        spec.fade_samples = 160;
        let mut lfo = LfoRuntime::new(1, 0.0);
        let first = lfo.advance_block(&spec, 44100, 16);
        assert!(first.abs() < 1.0);
    }

    #[test]
    fn sample_hold_changes_value_on_wrap() {
        let mut spec = spec(LfoWave::SampleHold);
        spec.freq_hz = 44100.0 / 16.0; // one wrap per block
        let mut lfo = LfoRuntime::new(7, 0.0);
        let a = lfo.advance_block(&spec, 44100, 16);
        let b = lfo.advance_block(&spec, 44100, 16);
        assert_ne!(a, b);
    }
}
