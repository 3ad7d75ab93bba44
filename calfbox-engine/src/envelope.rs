//! DAHDSR envelope runtime (§4.7): delay, attack, hold, decay, sustain,
//! release, terminal, plus the reserved fast-release shortcut used by
//! voice steals and `off_mode=fast` (stage id 15 in the source; modeled
//! here as its own `Stage` variant rather than a magic index).

use calfbox_core::constants::FAST_RELEASE_BLOCKS;
use calfbox_sfz::layer::EnvelopeShape;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Stage {
    Delay,
    Attack,
    Hold,
    Decay,
    Sustain,
    Release,
    Terminal,
    FastRelease,
}

#[derive(Clone, Copy, Debug)]
pub struct EnvelopeRuntime {
    stage: Stage,
    time_in_stage: u32,
    start_value: f32,
    current_value: f32,
    fast_release_remaining: u32,
}

impl EnvelopeRuntime {
    pub fn new() -> Self {
        Self {
            stage: Stage::Delay,
            time_in_stage: 0,
            start_value: 0.0,
            current_value: 0.0,
            fast_release_remaining: 0,
        }
    }

    pub fn value(&self) -> f32 {
        self.current_value
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_finished(&self) -> bool {
        self.stage == Stage::Terminal
    }

    /// Force the release shortcut: a fixed-length linear ramp to zero
    /// regardless of the authored release stage, used for voice steals and
    /// `off_mode=fast` exclusive-group chokes.
    pub fn go_fast_release(&mut self) {
        self.start_stage(Stage::FastRelease);
    }

    fn start_stage(&mut self, stage: Stage) {
        self.start_value = self.current_value;
        self.stage = stage;
        self.time_in_stage = 0;
        if stage == Stage::FastRelease {
            self.fast_release_remaining = FAST_RELEASE_BLOCKS;
        }
    }

    /// Advance by one block of `block_size` frames, returning the new
    /// envelope value. `released` forces an early transition into the
    /// release stage from any earlier stage.
    pub fn advance_block(&mut self, shape: &EnvelopeShape, released: bool, block_size: u32) -> f32 {
        if released && !matches!(self.stage, Stage::Release | Stage::Terminal | Stage::FastRelease)
        {
            self.start_stage(Stage::Release);
        }

        match self.stage {
            Stage::Delay => {
                self.current_value = 0.0;
                self.time_in_stage += block_size;
                if self.time_in_stage >= shape.delay_samples {
                    self.start_stage(Stage::Attack);
                }
            }
            Stage::Attack => {
                self.time_in_stage += block_size;
                let len = shape.attack_samples.max(1);
                self.current_value = (self.time_in_stage as f32 / len as f32).min(1.0);
                if self.time_in_stage >= len {
                    self.start_stage(Stage::Hold);
                }
            }
            Stage::Hold => {
                self.current_value = 1.0;
                self.time_in_stage += block_size;
                if self.time_in_stage >= shape.hold_samples {
                    self.start_stage(Stage::Decay);
                }
            }
            Stage::Decay => {
                self.time_in_stage += block_size;
                let len = shape.decay_samples.max(1);
                let t = (self.time_in_stage as f32 / len as f32).min(1.0);
                self.current_value = 1.0 + (shape.sustain_level - 1.0) * t;
                if self.time_in_stage >= len {
                    self.start_stage(Stage::Sustain);
                }
            }
            Stage::Sustain => {
                self.current_value = shape.sustain_level;
            }
            Stage::Release => {
                self.time_in_stage += block_size;
                let len = shape.release_samples.max(1);
                let t = (self.time_in_stage as f32 / len as f32).min(1.0);
                self.current_value = self.start_value * (1.0 - t);
                if self.time_in_stage >= len {
                    self.start_stage(Stage::Terminal);
                    self.current_value = 0.0;
                }
            }
            Stage::Terminal => {
                self.current_value = 0.0;
            }
            Stage::FastRelease => {
                self.fast_release_remaining = self.fast_release_remaining.saturating_sub(1);
                let done = FAST_RELEASE_BLOCKS - self.fast_release_remaining;
                let t = done as f32 / FAST_RELEASE_BLOCKS.max(1) as f32;
                self.current_value = (self.start_value * (1.0 - t)).max(0.0);
                if self.fast_release_remaining == 0 {
                    self.stage = Stage::Terminal;
                    self.current_value = 0.0;
                }
            }
        }
        self.current_value
    }
}

impl Default for EnvelopeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape(sustain: f32) -> EnvelopeShape {
        EnvelopeShape {
            delay_samples: 0,
            attack_samples: 100,
            hold_samples: 0,
            decay_samples: 100,
            sustain_level: sustain,
            release_samples: 100,
            depth: 0.0,
        }
    }

    #[test]
    fn attack_is_non_decreasing_then_decay_is_non_increasing() {
        let shape = shape(0.5);
        let mut env = EnvelopeRuntime::new();
        let mut prev = -1.0;
        let mut peaked = false;
        let mut values = Vec::new();
        for _ in 0..40 {
            let v = env.advance_block(&shape, false, 16);
            values.push(v);
            if !peaked {
                assert!(v >= prev - 1e-6, "attack should be non-decreasing");
                if v >= 0.999 {
                    peaked = true;
                }
            } else {
                assert!(v <= prev + 1e-6, "post-peak should be non-increasing");
            }
            prev = v;
        }
        assert!(peaked);
    }

    #[test]
    fn fast_release_reaches_zero_within_fixed_blocks() {
        let shape = shape(1.0);
        let mut env = EnvelopeRuntime::new();
        env.advance_block(&shape, false, 16);
        env.go_fast_release();
        for _ in 0..FAST_RELEASE_BLOCKS {
            env.advance_block(&shape, false, 16);
        }
        assert!(env.is_finished());
        assert_eq!(env.value(), 0.0);
    }

    #[test]
    fn release_while_held_jumps_from_any_stage() {
        let shape = shape(0.5);
        let mut env = EnvelopeRuntime::new();
        env.advance_block(&shape, false, 16); // still in attack
        assert_eq!(env.stage(), Stage::Attack);
        env.advance_block(&shape, true, 16);
        assert_eq!(env.stage(), Stage::Release);
    }
}
