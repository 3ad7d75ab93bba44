//! The voice pool: an index arena of playback voices (§3, §9). Membership
//! in the free list or a channel's running list is tracked by plain `u32`
//! indices rather than raw pointers, the arena realization of the
//! teacher's background-channel slot bookkeeping in its NNA system.

use std::sync::Arc;

use smallvec::SmallVec;

use calfbox_core::constants::LOOP_SENTINEL;
use calfbox_core::pitch::{cents_to_ratio, freq_to_delta, FixedPos};
use calfbox_core::waveform::Waveform;
use calfbox_sfz::layer::{EnvelopeShape, FinalizedLayer, LfoRuntimeSpec};
use calfbox_sfz::opcodes::{EgKind, LfoKind, ModDest, ModSrc, XfCurve};
use calfbox_sfz::program::Program;
use calfbox_rt::prefetch::PrefetchHandle;

use crate::envelope::EnvelopeRuntime;
use crate::filter::{Biquad, FilterStage, OnePole, SincosTable};
use crate::lfo::LfoRuntime;

/// Sentinel arena index, mirroring `calfbox_core::constants::LOOP_SENTINEL`'s
/// "no value" convention for voice-pool bookkeeping.
pub const NONE: u32 = u32::MAX;

/// Per-block source values a voice's modulation list draws from; the
/// channel supplies the shared ones (CC, pitch bend, aftertouch), the
/// voice supplies the per-note ones (velocity, envelopes, LFOs).
pub struct ModContext<'a> {
    pub cc: &'a [f32; 128],
    pub pitch_bend_norm: f32,
    pub channel_aftertouch: f32,
    pub poly_aftertouch: f32,
}

#[derive(Default, Clone, Copy)]
struct ModAccum {
    pitch_cents: f32,
    cutoff_cents: f32,
    cutoff2_cents: f32,
    resonance_db: f32,
    resonance2_db: f32,
    amplitude_mult: f32,
    gain_db: f32,
    pan: f32,
    tonectl: f32,
}

pub struct Voice {
    pub active: bool,
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub region_id: u32,
    pub program: Option<Arc<Program>>,

    pub released: bool,

    /// Monotonic allocation counter; breaks ties between voices in the same
    /// steal tier by preferring the one allocated first.
    pub serial: u64,
    pub age_blocks: u64,

    bigpos: FixedPos,
    bigdelta: FixedPos,
    loop_start: u32,
    loop_end: u32,
    /// Wraps remaining under the `count` opcode (§4.3): `None` loops forever,
    /// `Some(0)` means the next arrival at `loop_end` falls through instead
    /// of wrapping back to `loop_start`.
    loop_reps_remaining: Option<u32>,

    pitch_random_cents: f32,
    amp_random_mult: f32,

    amp_env: EnvelopeRuntime,
    fil_env: EnvelopeRuntime,
    pitch_env: EnvelopeRuntime,
    amp_lfo: LfoRuntime,
    fil_lfo: LfoRuntime,
    pitch_lfo: LfoRuntime,
    flex_lfos: SmallVec<[(u8, LfoRuntime); 4]>,
    last_amp_lfo: f32,
    last_fil_lfo: f32,
    last_pitch_lfo: f32,
    last_flex_lfo: SmallVec<[(u8, f32); 4]>,

    filter1: Option<FilterStage>,
    filter2: Option<FilterStage>,
    eq_bands: [Biquad; 3],
    tone_ctl: OnePole,

    pub prefetch: Option<PrefetchHandle>,
    /// Frames already pulled from `prefetch` but not yet consumed by the
    /// interpolator, keyed to the absolute frame index of `stream_cache[0]`.
    stream_cache: Vec<(i16, i16)>,
    stream_cache_base: u32,
}

impl Voice {
    fn empty() -> Self {
        Self {
            active: false,
            channel: 0,
            note: 0,
            velocity: 0,
            region_id: 0,
            program: None,
            released: false,
            serial: 0,
            age_blocks: 0,
            bigpos: 0,
            bigdelta: 0,
            loop_start: 0,
            loop_end: LOOP_SENTINEL,
            loop_reps_remaining: None,
            pitch_random_cents: 0.0,
            amp_random_mult: 1.0,
            amp_env: EnvelopeRuntime::new(),
            fil_env: EnvelopeRuntime::new(),
            pitch_env: EnvelopeRuntime::new(),
            amp_lfo: LfoRuntime::new(0, 0.0),
            fil_lfo: LfoRuntime::new(0, 0.0),
            pitch_lfo: LfoRuntime::new(0, 0.0),
            flex_lfos: SmallVec::new(),
            last_amp_lfo: 0.0,
            last_fil_lfo: 0.0,
            last_pitch_lfo: 0.0,
            last_flex_lfo: SmallVec::new(),
            filter1: None,
            filter2: None,
            eq_bands: [Biquad::identity(); 3],
            tone_ctl: OnePole::identity(),
            prefetch: None,
            stream_cache: Vec::new(),
            stream_cache_base: 0,
        }
    }

    pub fn layer(&self) -> &FinalizedLayer {
        &self.program.as_ref().expect("voice started without a program").regions[self.region_id as usize]
    }

    pub fn is_finished(&self) -> bool {
        !self.active
    }

    /// Bring a freshly allocated voice to life for `note`/`velocity` playing
    /// `region_id` under `program` (§4.5, §4.6 step 1). `rng_seed` feeds the
    /// per-voice LFO and random-opcode generators so re-triggering the same
    /// voice slot never correlates with its previous occupant.
    pub fn start(
        &mut self,
        channel: u8,
        note: u8,
        velocity: u8,
        program: Arc<Program>,
        region_id: u32,
        sample_rate: u32,
        serial: u64,
        rng_seed: u64,
        prefetch: Option<PrefetchHandle>,
    ) {
        let (loop_start, loop_end) = {
            let region = &program.regions[region_id as usize];
            (region.loop_start, region.loop_end)
        };

        self.active = true;
        self.channel = channel;
        self.note = note;
        self.velocity = velocity;
        self.region_id = region_id;
        self.released = false;
        self.serial = serial;
        self.age_blocks = 0;
        self.loop_start = loop_start;
        self.loop_end = loop_end;
        self.prefetch = prefetch;

        let region = &program.regions[region_id as usize];
        // `count` counts total traversals of the loop; the first traversal
        // is the natural playthrough to `loop_end`, so only count-1 wraps
        // remain to be taken after that.
        self.loop_reps_remaining = region.count.map(|c| c.saturating_sub(1));
        self.pitch_random_cents = lcg_unit(rng_seed) * region.pitch_random;
        self.amp_random_mult = db_jitter(lcg_unit(rng_seed ^ 0x9E37_79B9), region.amp_random);

        let offset = region.offset as u64;
        self.bigpos = offset << 32;
        self.bigdelta = 0;

        self.amp_env = EnvelopeRuntime::new();
        self.fil_env = EnvelopeRuntime::new();
        self.pitch_env = EnvelopeRuntime::new();
        self.amp_lfo = LfoRuntime::new(rng_seed, region.amplfo.phase0);
        self.fil_lfo = LfoRuntime::new(rng_seed ^ 1, region.fillfo.phase0);
        self.pitch_lfo = LfoRuntime::new(rng_seed ^ 2, region.pitchlfo.phase0);
        self.flex_lfos = region
            .flex_lfo
            .iter()
            .map(|(id, spec)| (*id, LfoRuntime::new(rng_seed ^ (*id as u64) ^ 3, spec.phase0)))
            .collect();
        self.last_amp_lfo = 0.0;
        self.last_fil_lfo = 0.0;
        self.last_pitch_lfo = 0.0;
        self.last_flex_lfo = region.flex_lfo.iter().map(|(id, _)| (*id, 0.0)).collect();

        self.filter1 = region.cutoff.map(|_| FilterStage::new(region.fil_type));
        self.filter2 = region.cutoff2.map(|_| FilterStage::new(region.fil2_type));

        // `eqN_vel2freq`/`eqN_vel2gain` shift a band's center and height by
        // velocity; since the voice's velocity never changes, each band's
        // coefficients are fixed for the voice's whole lifetime.
        self.eq_bands = std::array::from_fn(|i| {
            let band = &region.eq[i];
            let mut biquad = Biquad::identity();
            if band.audible {
                let freq = band.freq + band.vel2freq * (velocity as f32 / 127.0);
                let gain_db = band.gain + band.vel2gain * (velocity as f32 / 127.0);
                biquad.set_peaking_eq(freq.max(1.0), band.bw, gain_db, sample_rate);
            }
            biquad
        });
        self.tone_ctl = OnePole::identity();
        self.stream_cache.clear();
        self.stream_cache_base = 0;

        self.program = Some(program);
    }

    pub fn release(&mut self) {
        self.released = true;
    }

    /// Force the immediate steal/choke shortcut (§4.7's stage-15 jump).
    pub fn force_fast_release(&mut self) {
        self.released = true;
        self.amp_env.go_fast_release();
        self.fil_env.go_fast_release();
        self.pitch_env.go_fast_release();
    }

    fn accumulate_modulations(&self, ctx: &ModContext) -> ModAccum {
        let mut acc = ModAccum::default();
        let layer = self.layer();
        for m in &layer.modulations {
            let value = self.resolve_source(m.src, ctx);
            let contribution = value * m.amount;
            match m.dest {
                ModDest::Pitch => acc.pitch_cents += contribution,
                ModDest::Cutoff => acc.cutoff_cents += contribution,
                ModDest::Cutoff2 => acc.cutoff2_cents += contribution,
                ModDest::Resonance => acc.resonance_db += contribution,
                ModDest::Resonance2 => acc.resonance2_db += contribution,
                ModDest::Amplitude => acc.amplitude_mult += contribution,
                ModDest::Gain => acc.gain_db += contribution,
                ModDest::Pan => acc.pan += contribution,
                ModDest::ToneCtl => acc.tonectl += contribution,
                // Handled by `stage_time_mods` before the envelopes/LFOs
                // advance this block, since they need to reshape the spec
                // those calls read rather than scale an already-rendered
                // output.
                ModDest::EgStageTime { .. } | ModDest::LfoFreq { .. } => {}
                // Per-band dynamic EQ modulation would need a biquad
                // recompute every block; the bands' static freq/bw/gain
                // (with vel2freq/vel2gain) are applied in `render_block`,
                // but modulating them live is left unimplemented.
                ModDest::EqFreq(_) | ModDest::EqBw(_) | ModDest::EqGain(_) => {}
            }
        }
        acc
    }

    /// Pre-pass over this voice's modulation list for the two destinations
    /// that reshape the envelope/LFO *spec* the normal per-block advance
    /// reads, rather than scale a value after the fact (§4.6 step 1's
    /// "operate on a per-voice writable copy of the shape"). Returns
    /// per-envelope stage-length deltas in seconds (indexed `[delay, attack,
    /// hold, decay, sustain, release]`, sustain unused) and per-LFO
    /// frequency deltas in Hz, both indexed `[amp, filter, pitch]`; flex
    /// LFOs aren't addressable by `LfoFreq` and are left untouched.
    fn stage_time_mods(&self, layer: &FinalizedLayer, ctx: &ModContext) -> ([[f32; 6]; 3], [f32; 3]) {
        let mut eg_seconds = [[0f32; 6]; 3];
        let mut lfo_hz = [0f32; 3];
        for m in &layer.modulations {
            match m.dest {
                ModDest::EgStageTime { eg, stage } => {
                    let idx = eg_index(eg);
                    if let Some(slot) = eg_seconds[idx].get_mut(stage as usize) {
                        *slot += self.resolve_source(m.src, ctx) * m.amount;
                    }
                }
                ModDest::LfoFreq { lfo } => {
                    if let Some(idx) = lfo_index(lfo) {
                        lfo_hz[idx] += self.resolve_source(m.src, ctx) * m.amount;
                    }
                }
                _ => {}
            }
        }
        (eg_seconds, lfo_hz)
    }

    fn resolve_source(&self, src: ModSrc, ctx: &ModContext) -> f32 {
        match src {
            ModSrc::Cc(n) => ctx.cc.get(n as usize).copied().unwrap_or(0.0),
            ModSrc::Velocity => self.velocity as f32 / 127.0,
            ModSrc::Aftertouch => ctx.poly_aftertouch,
            ModSrc::ChannelAftertouch => ctx.channel_aftertouch,
            ModSrc::PitchBend => ctx.pitch_bend_norm,
            ModSrc::EnvAmp => self.amp_env.value(),
            ModSrc::EnvFilter => self.fil_env.value(),
            ModSrc::EnvPitch => self.pitch_env.value(),
            ModSrc::LfoAmp => self.last_amp_lfo,
            ModSrc::LfoFilter => self.last_fil_lfo,
            ModSrc::LfoPitch => self.last_pitch_lfo,
            ModSrc::FlexLfo(id) => self
                .last_flex_lfo
                .iter()
                .find(|(fid, _)| *fid == id)
                .map(|(_, v)| *v)
                .unwrap_or(0.0),
        }
    }

    /// Render one block of `block_size` frames into `out`, mixing into the
    /// caller-owned accumulator (§4.6 steps 2-11). Returns `false` once the
    /// amplitude envelope has reached its terminal stage, at which point the
    /// caller should return this voice to the free list.
    #[allow(clippy::too_many_arguments)]
    pub fn render_block(
        &mut self,
        sample_rate: u32,
        block_size: u32,
        ctx: &ModContext,
        pitch_bend_cents: f32,
        sincos: &SincosTable,
        out: &mut [(f32, f32)],
    ) -> bool {
        debug_assert_eq!(out.len(), block_size as usize);
        // Clone the voice's own `Arc<Program>` so `layer` borrows this local
        // clone instead of `self`, leaving every other field free to mutate
        // below (the clone is one atomic increment, not a data copy).
        let program = self.program.clone().expect("voice rendered without a program");
        let layer = &program.regions[self.region_id as usize];

        let (eg_seconds, lfo_hz) = self.stage_time_mods(layer, ctx);

        let ampeg_shape = modulated_shape(&layer.ampeg, &eg_seconds[0], sample_rate);
        let fileg_shape = modulated_shape(&layer.fileg, &eg_seconds[1], sample_rate);
        let pitcheg_shape = modulated_shape(&layer.pitcheg, &eg_seconds[2], sample_rate);
        let amp_v = self.amp_env.advance_block(&ampeg_shape, self.released, block_size);
        let fil_v = self.fil_env.advance_block(&fileg_shape, self.released, block_size);
        let pitch_v = self.pitch_env.advance_block(&pitcheg_shape, self.released, block_size);

        let amplfo_spec = modulated_lfo_spec(&layer.amplfo, lfo_hz[0]);
        let fillfo_spec = modulated_lfo_spec(&layer.fillfo, lfo_hz[1]);
        let pitchlfo_spec = modulated_lfo_spec(&layer.pitchlfo, lfo_hz[2]);
        self.last_amp_lfo = self.amp_lfo.advance_block(&amplfo_spec, sample_rate, block_size);
        self.last_fil_lfo = self.fil_lfo.advance_block(&fillfo_spec, sample_rate, block_size);
        self.last_pitch_lfo = self.pitch_lfo.advance_block(&pitchlfo_spec, sample_rate, block_size);
        for i in 0..self.flex_lfos.len() {
            let id = self.flex_lfos[i].0;
            if let Some((_, spec)) = layer.flex_lfo.iter().find(|(fid, _)| *fid == id) {
                self.last_flex_lfo[i].1 = self.flex_lfos[i].1.advance_block(spec, sample_rate, block_size);
            }
        }

        let acc = self.accumulate_modulations(ctx);

        let cents_key = (self.note as i32 - layer.pitch_keycenter as i32) as f32 * layer.pitch_keytrack;
        let cents_vel = (self.velocity as f32 / 127.0 - 0.5) * 2.0 * layer.pitch_veltrack;
        let cents_total = cents_key
            + cents_vel
            + layer.transpose_cents
            + layer.tune_cents
            + self.pitch_random_cents
            + pitch_v * layer.pitcheg.depth
            + self.last_pitch_lfo
            + pitch_bend_cents
            + acc.pitch_cents;

        let ratio = cents_to_ratio(cents_total as f64);
        let base_hz = layer.waveform.as_ref().map(|w| w.sample_rate as f64).unwrap_or(sample_rate as f64);
        self.bigdelta = freq_to_delta(base_hz * ratio, sample_rate);

        let amp_curve = layer.amp_velcurve.get(self.velocity);
        let amp_keytrack_db = (self.note as i32 - layer.amp_keycenter as i32) as f32 * layer.amp_keytrack / 12.0;
        let channel_volume = ctx.cc.get(7).copied().unwrap_or(1.0);
        let expression = ctx.cc.get(11).copied().unwrap_or(1.0);
        let gain_lin = layer.gain
            * amp_v
            * amp_curve
            * self.amp_random_mult
            * velocity_xfade_gain(self.velocity, layer)
            * channel_volume
            * expression
            * (acc.amplitude_mult + 1.0).max(0.0)
            * db_to_lin(amp_keytrack_db + acc.gain_db);
        let gain_lin = gain_lin.min(calfbox_core::constants::GAIN_CEILING);

        let pan = (layer.pan / 100.0 + acc.pan).clamp(-1.0, 1.0);
        let (pan_l, pan_r) = equal_power_pan(pan);

        for slot in out.iter_mut() {
            let (l, r) = self.read_interpolated(layer);
            self.bigpos = self.bigpos.wrapping_add(self.bigdelta);
            let looping = (layer.eff_loop_mode == calfbox_sfz::opcodes::LoopMode::LoopContinuous
                || (layer.eff_loop_mode == calfbox_sfz::opcodes::LoopMode::LoopSustain && !self.released))
                && self.loop_reps_remaining != Some(0);
            if looping {
                let frame_pos = self.bigpos >> 32;
                if self.loop_end > self.loop_start && frame_pos as u32 >= self.loop_end {
                    let overshoot = self.bigpos - ((self.loop_end as u64) << 32);
                    self.bigpos = ((self.loop_start as u64) << 32) + overshoot;
                    if let Some(n) = self.loop_reps_remaining {
                        self.loop_reps_remaining = Some(n.saturating_sub(1));
                    }
                }
            }
            *slot = (l * gain_lin * pan_l, r * gain_lin * pan_r);
        }

        if let Some(f1) = self.filter1.as_mut() {
            let cutoff = (layer.cutoff.unwrap_or(1000.0) as f64 * cents_to_ratio((fil_v * layer.fileg.depth + self.last_fil_lfo + acc.cutoff_cents) as f64)) as f32;
            let resonance = layer.resonance + acc.resonance_db;
            for slot in out.iter_mut() {
                slot.0 = f1.process(slot.0, cutoff, resonance, sample_rate, sincos);
                slot.1 = f1.process(slot.1, cutoff, resonance, sample_rate, sincos);
            }
        }
        if let Some(f2) = self.filter2.as_mut() {
            let cutoff = (layer.cutoff2.unwrap_or(1000.0) as f64 * cents_to_ratio(acc.cutoff2_cents as f64)) as f32;
            let resonance = layer.resonance2 + acc.resonance2_db;
            for slot in out.iter_mut() {
                slot.0 = f2.process(slot.0, cutoff, resonance, sample_rate, sincos);
                slot.1 = f2.process(slot.1, cutoff, resonance, sample_rate, sincos);
            }
        }

        // One-pole tone control, gated on the `tonectl` modulation bit being
        // set at all (mirrors `dest_index`'s bit 8 for `ModDest::ToneCtl` in
        // calfbox-sfz's layer finalization). `acc.tonectl` steers the cutoff
        // from dark toward fully open.
        if layer.mod_bitmask & (1 << 8) != 0 {
            let cutoff = tonectl_cutoff_hz(acc.tonectl, sample_rate);
            self.tone_ctl.set_lowpass(cutoff, sample_rate);
            for slot in out.iter_mut() {
                slot.0 = self.tone_ctl.process(slot.0);
                slot.1 = self.tone_ctl.process(slot.1);
            }
        }

        for (i, band) in layer.eq.iter().enumerate() {
            if band.audible {
                let biquad = &mut self.eq_bands[i];
                for slot in out.iter_mut() {
                    slot.0 = biquad.process(slot.0);
                    slot.1 = biquad.process(slot.1);
                }
            }
        }

        self.age_blocks += 1;
        let still_looping = (layer.eff_loop_mode == calfbox_sfz::opcodes::LoopMode::LoopContinuous
            || (layer.eff_loop_mode == calfbox_sfz::opcodes::LoopMode::LoopSustain && !self.released))
            && self.loop_reps_remaining != Some(0);
        let ran_past_sample_end = !still_looping
            && layer
                .waveform
                .as_ref()
                .is_some_and(|w| (self.bigpos >> 32) as u32 >= w.total_frames);
        if self.amp_env.is_finished() || ran_past_sample_end {
            self.active = false;
        }
        self.active
    }

    /// 4-tap cubic read at the current `bigpos` (§4.6 step 8): fetches the
    /// frame the fractional position sits at plus its neighbor on either
    /// side, and interpolates with `cubic_interp`. Takes `&mut self` because
    /// a streamed tap beyond the preloaded prefix pulls from `self.prefetch`.
    fn read_interpolated(&mut self, layer: &FinalizedLayer) -> (f32, f32) {
        let Some(waveform) = layer.waveform.as_deref() else {
            return (0.0, 0.0);
        };
        let frame_index = (self.bigpos >> 32) as i64;
        let frac = ((self.bigpos & 0xFFFF_FFFF) as f64 / (1u64 << 32) as f64) as f32;

        let ym1 = self.tap(layer, waveform, frame_index - 1);
        let y0 = self.tap(layer, waveform, frame_index);
        let y1 = self.tap(layer, waveform, frame_index + 1);
        let y2 = self.tap(layer, waveform, frame_index + 2);

        (
            cubic_interp(ym1.0, y0.0, y1.0, y2.0, frac) / 32768.0,
            cubic_interp(ym1.1, y0.1, y1.1, y2.1, frac) / 32768.0,
        )
    }

    /// Fetch one frame at `raw_index`, transparently folding loop-wrap and
    /// the straightened seam (`loop_scratch`) so the cubic kernel never has
    /// to special-case the boundary itself, and routing frames past the
    /// preloaded prefix through the prefetch pipe when one is attached.
    fn tap(&mut self, layer: &FinalizedLayer, waveform: &Waveform, raw_index: i64) -> (i16, i16) {
        if raw_index < 0 {
            return frame_or_zero(waveform, 0);
        }
        let looping = !layer.loop_scratch.is_empty() && self.loop_end > self.loop_start;
        let index = if looping && raw_index >= self.loop_end as i64 {
            (raw_index - self.loop_end as i64 + self.loop_start as i64).max(0) as u32
        } else {
            raw_index as u32
        };

        if looping {
            let seam_len = layer.loop_scratch.len() as u32;
            let seam_start = self.loop_end.saturating_sub(seam_len);
            if index >= seam_start && index < self.loop_end {
                return layer.loop_scratch[(index - seam_start) as usize];
            }
        }

        if index < waveform.preloaded_frames {
            waveform.frame(index)
        } else if index < waveform.total_frames {
            self.stream_frame(index)
        } else {
            (0, 0)
        }
    }

    /// Pull frames from the prefetch pipe (§4.2, §4.6 step 8's streaming
    /// branch) into a small lookahead cache, since the 4-tap kernel needs up
    /// to 3 frames ahead of the one the interpolator is centered on and the
    /// pipe itself only exposes a pop-style `read`.
    fn stream_frame(&mut self, index: u32) -> (i16, i16) {
        let Some(prefetch) = self.prefetch.as_mut() else {
            return (0, 0);
        };
        if self.stream_cache.is_empty() {
            self.stream_cache_base = index;
        } else if index < self.stream_cache_base {
            return (0, 0);
        }
        while self.stream_cache_base + self.stream_cache.len() as u32 <= index {
            let mut buf = [(0i16, 0i16)];
            if prefetch.read(&mut buf) == 0 {
                break;
            }
            self.stream_cache.push(buf[0]);
        }
        while self.stream_cache.len() > 8 && self.stream_cache_base + 4 < index {
            self.stream_cache.remove(0);
            self.stream_cache_base += 1;
        }
        let offset = index.saturating_sub(self.stream_cache_base) as usize;
        self.stream_cache.get(offset).copied().unwrap_or((0, 0))
    }
}

fn frame_or_zero(waveform: &Waveform, index: u32) -> (i16, i16) {
    if index < waveform.preloaded_frames {
        waveform.frame(index)
    } else {
        (0, 0)
    }
}

/// 4-tap cubic interpolation matching the reference sampler's generator
/// kernel (`sampler_gen.c`'s portable-C path): `frac` in `[0, 1)` moves from
/// `y0` to `y1`, with `ym1`/`y2` shaping the curve through the neighbors so
/// the join between consecutive blocks (and across a loop seam) stays C1
/// continuous.
fn cubic_interp(ym1: i16, y0: i16, y1: i16, y2: i16, frac: f32) -> f32 {
    let t = frac;
    let b0 = -t * (t - 1.0) * (t - 2.0);
    let b1 = 3.0 * (t + 1.0) * (t - 1.0) * (t - 2.0);
    let b2 = -3.0 * (t + 1.0) * t * (t - 2.0);
    let b3 = (t + 1.0) * t * (t - 1.0);
    (b0 * ym1 as f32 + b1 * y0 as f32 + b2 * y1 as f32 + b3 * y2 as f32) / 6.0
}

/// Tone-control frequency mapping: `tonectl` in `[-1, 1]` sweeps the one-pole
/// lowpass from dark (200 Hz) to fully open (Nyquist) on a log scale, the
/// shape of a passive tone-pot control.
fn tonectl_cutoff_hz(tonectl: f32, sample_rate: u32) -> f32 {
    let nyquist = sample_rate as f32 / 2.0;
    let min_cutoff = 200.0f32;
    let t = (tonectl.clamp(-1.0, 1.0) + 1.0) / 2.0;
    min_cutoff * (nyquist / min_cutoff).powf(t)
}

fn eg_index(eg: EgKind) -> usize {
    match eg {
        EgKind::Amp => 0,
        EgKind::Filter => 1,
        EgKind::Pitch => 2,
    }
}

fn lfo_index(lfo: LfoKind) -> Option<usize> {
    match lfo {
        LfoKind::Amp => Some(0),
        LfoKind::Filter => Some(1),
        LfoKind::Pitch => Some(2),
        LfoKind::Flex(_) => None,
    }
}

/// Apply per-stage second deltas (DAHDSR order, sustain unused) onto a copy
/// of `shape`; a voice with no stage-time modulation on this envelope pays
/// only the all-zero check, not a real rebuild.
fn modulated_shape(shape: &EnvelopeShape, deltas: &[f32; 6], sample_rate: u32) -> EnvelopeShape {
    if deltas.iter().all(|d| *d == 0.0) {
        return *shape;
    }
    let add_samples = |base: u32, secs: f32| -> u32 { (base as f32 + secs * sample_rate as f32).max(0.0) as u32 };
    EnvelopeShape {
        delay_samples: add_samples(shape.delay_samples, deltas[0]),
        attack_samples: add_samples(shape.attack_samples, deltas[1]),
        hold_samples: add_samples(shape.hold_samples, deltas[2]),
        decay_samples: add_samples(shape.decay_samples, deltas[3]),
        sustain_level: shape.sustain_level,
        release_samples: add_samples(shape.release_samples, deltas[5]),
        depth: shape.depth,
    }
}

fn modulated_lfo_spec(spec: &LfoRuntimeSpec, hz_delta: f32) -> LfoRuntimeSpec {
    if hz_delta == 0.0 {
        return *spec;
    }
    LfoRuntimeSpec { freq_hz: (spec.freq_hz + hz_delta).max(0.0), ..*spec }
}

fn db_to_lin(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn db_jitter(unit: f32, range_db: f32) -> f32 {
    db_to_lin(unit * range_db)
}

/// Cheap per-voice deterministic jitter source for the opcode-level random
/// opcodes (`amp_random`, `pitch_random`), seeded from the voice's rng seed
/// rather than a shared engine RNG so replays with the same seed match.
fn lcg_unit(seed: u64) -> f32 {
    let x = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    ((x >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
}

fn equal_power_pan(pan: f32) -> (f32, f32) {
    let angle = (pan + 1.0) * 0.25 * std::f32::consts::PI;
    (angle.cos(), angle.sin())
}

/// Combined `xfin_*`/`xfout_*` velocity-crossfade gain (§4.4/§4.6): ramps
/// linearly from 0 to 1 across the `xfin` window and from 1 to 0 across the
/// `xfout` window, shaped by `xf_velcurve` (power curve uses the square root
/// of the linear ramp so two overlapping regions sum to unity power).
fn velocity_xfade_gain(velocity: u8, layer: &FinalizedLayer) -> f32 {
    let ramp = |v: u8, lo: u8, hi: u8, rising: bool| -> f32 {
        if hi <= lo {
            return 1.0;
        }
        let t = ((v as f32 - lo as f32) / (hi as f32 - lo as f32)).clamp(0.0, 1.0);
        if rising {
            t
        } else {
            1.0 - t
        }
    };

    let in_gain = if velocity < layer.xfin_lovel {
        0.0
    } else {
        ramp(velocity, layer.xfin_lovel, layer.xfin_hivel, true)
    };
    let out_gain = if velocity > layer.xfout_hivel {
        0.0
    } else {
        ramp(velocity, layer.xfout_lovel, layer.xfout_hivel, false)
    };

    let linear = in_gain * out_gain;
    match layer.xf_velcurve {
        XfCurve::Gain => linear,
        XfCurve::Power => linear.sqrt(),
    }
}

/// The voice pool itself: a flat arena plus a stack of free slots.
pub struct VoiceArena {
    voices: Vec<Voice>,
    free: Vec<u32>,
    next_serial: u64,
}

impl VoiceArena {
    pub fn with_capacity(max_voices: usize) -> Self {
        let mut voices = Vec::with_capacity(max_voices);
        let mut free = Vec::with_capacity(max_voices);
        for i in 0..max_voices {
            voices.push(Voice::empty());
            free.push((max_voices - 1 - i) as u32);
        }
        Self { voices, free, next_serial: 0 }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn get(&self, id: u32) -> &Voice {
        &self.voices[id as usize]
    }

    pub fn get_mut(&mut self, id: u32) -> &mut Voice {
        &mut self.voices[id as usize]
    }

    pub fn active_count(&self) -> usize {
        self.voices.iter().filter(|v| v.active).count()
    }

    /// Pop a free slot, or `None` if the pool is fully occupied (the caller
    /// then asks `find_steal_victim` for an index to force-release).
    pub fn alloc(&mut self) -> Option<u32> {
        let id = self.free.pop()?;
        self.next_serial += 1;
        Some(id)
    }

    pub fn next_serial(&mut self) -> u64 {
        self.next_serial += 1;
        self.next_serial
    }

    pub fn free_voice(&mut self, id: u32) {
        let voice = &mut self.voices[id as usize];
        voice.active = false;
        voice.program = None;
        voice.prefetch = None;
        self.free.push(id);
    }

    /// Rank every active voice by steal tier (released voices always
    /// outrank playing ones, oldest serial breaks ties), mirroring the
    /// teacher's NNA rule that a background-eligible channel is always
    /// preferred over cutting a still-sounding one. Returns `None` only
    /// when the pool has no active voices at all.
    pub fn find_steal_victim(&self) -> Option<u32> {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.active)
            .min_by_key(|(_, v)| (if v.released { 0u8 } else { 1u8 }, v.serial))
            .map(|(i, _)| i as u32)
    }

    pub fn iter_active(&self) -> impl Iterator<Item = (u32, &Voice)> {
        self.voices.iter().enumerate().filter(|(_, v)| v.active).map(|(i, v)| (i as u32, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arena_alloc_and_free_round_trips_through_the_free_list() {
        let mut arena = VoiceArena::with_capacity(4);
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        assert_ne!(a, b);
        arena.free_voice(a);
        let c = arena.alloc().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn pool_exhausts_after_capacity_allocations() {
        let mut arena = VoiceArena::with_capacity(2);
        assert!(arena.alloc().is_some());
        assert!(arena.alloc().is_some());
        assert!(arena.alloc().is_none());
    }

    #[test]
    fn steal_victim_prefers_released_over_playing() {
        let mut arena = VoiceArena::with_capacity(2);
        let a = arena.alloc().unwrap();
        let b = arena.alloc().unwrap();
        arena.get_mut(a).active = true;
        arena.get_mut(a).serial = 1;
        arena.get_mut(a).released = false;
        arena.get_mut(b).active = true;
        arena.get_mut(b).serial = 2;
        arena.get_mut(b).released = true;
        assert_eq!(arena.find_steal_victim(), Some(b));
    }
}
