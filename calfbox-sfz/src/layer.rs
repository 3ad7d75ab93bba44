//! The SFZ layer tree (`global -> master -> group -> region`) and
//! finalization into the concrete, playback-ready `FinalizedLayer` (§4.3).

use std::sync::Arc;

use calfbox_core::waveform::Waveform;

use crate::curve::{Curve128, Interp, build_dense_128};
use crate::opcodes::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LayerKind {
    Global,
    Master,
    Group,
    Region,
}

pub struct LayerNode {
    pub kind: LayerKind,
    pub parent: Option<usize>,
    pub opcodes: RegionOpcodes,
    pub children: Vec<usize>,
}

/// An arena of layer nodes; indices are stable for the tree's lifetime.
#[derive(Default)]
pub struct LayerArena {
    pub nodes: Vec<LayerNode>,
}

impl LayerArena {
    pub fn push(&mut self, kind: LayerKind, parent: Option<usize>) -> usize {
        let idx = self.nodes.len();
        self.nodes.push(LayerNode {
            kind,
            parent,
            opcodes: RegionOpcodes::default(),
            children: Vec::new(),
        });
        if let Some(p) = parent {
            self.nodes[p].children.push(idx);
        }
        idx
    }

    /// Merge a node's opcodes with its ancestor chain, nearest ancestor
    /// taking priority, matching §4.3 step 1 ("parent-first").
    pub fn merged_opcodes(&self, idx: usize) -> RegionOpcodes {
        let mut merged = self.nodes[idx].opcodes.clone();
        let mut cur = self.nodes[idx].parent;
        while let Some(p) = cur {
            merged.merge_from_parent(&self.nodes[p].opcodes);
            cur = self.nodes[p].parent;
        }
        merged
    }

    pub fn region_indices(&self) -> Vec<usize> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == LayerKind::Region)
            .map(|(i, _)| i)
            .collect()
    }
}

/// Per-stage shape for one envelope, precomputed at the current sample
/// rate (§4.3 step 3, §4.7).
#[derive(Clone, Copy, Debug)]
pub struct EnvelopeShape {
    pub delay_samples: u32,
    pub attack_samples: u32,
    pub hold_samples: u32,
    pub decay_samples: u32,
    pub sustain_level: f32,
    pub release_samples: u32,
    pub depth: f32,
}

impl EnvelopeShape {
    fn from_opcodes(eg: &EgOpcodes, sample_rate: u32) -> Self {
        let secs_to_samples = |s: f32| (s.max(0.0) * sample_rate as f32) as u32;
        Self {
            delay_samples: secs_to_samples(eg.delay.unwrap_or(0.0)),
            attack_samples: secs_to_samples(eg.attack.unwrap_or(0.0)),
            hold_samples: secs_to_samples(eg.hold.unwrap_or(0.0)),
            decay_samples: secs_to_samples(eg.decay.unwrap_or(0.0)),
            sustain_level: (eg.sustain.unwrap_or(100.0) / 100.0).clamp(0.0, 1.0),
            release_samples: secs_to_samples(eg.release.unwrap_or(0.0)).max(1),
            depth: eg.depth.unwrap_or(0.0),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct LfoRuntimeSpec {
    pub freq_hz: f32,
    pub delay_samples: u32,
    pub fade_samples: u32,
    pub wave: LfoWave,
    pub phase0: f32,
    pub depth: f32,
}

impl LfoRuntimeSpec {
    fn from_opcodes(lfo: &LfoOpcodes, sample_rate: u32) -> Self {
        Self {
            freq_hz: lfo.freq.unwrap_or(0.0),
            delay_samples: (lfo.delay.unwrap_or(0.0) * sample_rate as f32) as u32,
            fade_samples: (lfo.fade.unwrap_or(0.0) * sample_rate as f32) as u32,
            wave: lfo.wave.unwrap_or(LfoWave::Sine),
            phase0: lfo.phase0.unwrap_or(0.0),
            depth: lfo.depth.unwrap_or(0.0),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct EqBandRuntime {
    pub freq: f32,
    pub bw: f32,
    pub gain: f32,
    pub vel2freq: f32,
    pub vel2gain: f32,
    pub audible: bool,
}

/// The fully resolved, playback-ready region state the voice engine reads.
/// Immutable once a voice holds an `Arc<FinalizedLayer>` (§5 shared-resource
/// policy); editing a region produces a new allocation.
pub struct FinalizedLayer {
    pub waveform: Option<Arc<Waveform>>,

    pub lokey: u8,
    pub hikey: u8,
    pub lovel: u8,
    pub hivel: u8,
    pub lochan: u8,
    pub hichan: u8,
    pub lorand: f32,
    pub hirand: f32,

    pub pitch_keycenter: u8,
    pub pitch_keytrack: f32,
    pub pitch_veltrack: f32,
    pub pitch_random: f32,
    pub transpose_cents: f32,
    pub tune_cents: f32,

    pub offset: u32,
    pub offset_random: u32,

    pub loop_mode: LoopMode,
    pub eff_loop_mode: LoopMode,
    pub loop_start: u32,
    pub loop_end: u32,
    pub loop_overlap: u32,
    /// Straightened join: `loop_overlap` samples before `loop_end` followed
    /// by `loop_overlap` samples starting at `loop_start`, so the
    /// interpolator can read across the seam with one contiguous slice
    /// (§4.3 step 3, §9 loop_overlap semantics).
    pub loop_scratch: Vec<(i16, i16)>,

    pub count: Option<u32>,

    pub group: Option<u32>,
    pub off_by: Option<u32>,
    pub off_mode: OffMode,

    pub trigger: Trigger,

    pub sw_lokey: Option<u8>,
    pub sw_hikey: Option<u8>,
    pub sw_last: Option<u8>,
    pub sw_down: Option<u8>,
    pub sw_up: Option<u8>,
    pub sw_previous: Option<u8>,

    pub gain: f32, // linearized `volume`
    pub pan: f32,
    pub width: f32,
    pub position: f32,

    pub amp_keycenter: u8,
    pub amp_keytrack: f32,
    pub amp_veltrack: f32,
    pub amp_velcurve: Curve128,
    pub amp_random: f32,
    pub rt_decay: f32,

    pub delay: f32,
    pub delay_random: f32,
    pub delay_cc: hashbrown::HashMap<u8, f32>,

    pub send1bus: Option<u32>,
    pub send1gain: f32,
    pub send2bus: Option<u32>,
    pub send2gain: f32,

    pub cutoff: Option<f32>,
    pub resonance: f32,
    pub fil_type: FilterType,
    pub fil_keytrack: f32,
    pub fil_veltrack: f32,
    pub fil_random: f32,
    pub cutoff_cc: hashbrown::HashMap<u8, f32>,

    pub cutoff2: Option<f32>,
    pub resonance2: f32,
    pub fil2_type: FilterType,

    pub ampeg: EnvelopeShape,
    pub fileg: EnvelopeShape,
    pub pitcheg: EnvelopeShape,

    pub amplfo: LfoRuntimeSpec,
    pub fillfo: LfoRuntimeSpec,
    pub pitchlfo: LfoRuntimeSpec,
    pub flex_lfo: Vec<(u8, LfoRuntimeSpec)>,

    pub eq: [EqBandRuntime; 3],
    pub eq_bitmask: u8,

    pub xfin_lokey: u8,
    pub xfin_hikey: u8,
    pub xfout_lokey: u8,
    pub xfout_hikey: u8,
    pub xfin_lovel: u8,
    pub xfin_hivel: u8,
    pub xfout_lovel: u8,
    pub xfout_hivel: u8,
    pub xf_keycurve: XfCurve,
    pub xf_velcurve: XfCurve,

    pub seq_length: u32,
    pub seq_position: u32,

    pub bend_up: i32,
    pub bend_down: i32,
    pub bend_step: i32,

    pub on_locc: hashbrown::HashMap<u8, u8>,
    pub on_hicc: hashbrown::HashMap<u8, u8>,

    pub modulations: Vec<Modulation>,
    pub nifs: Vec<Nif>,
    pub mod_bitmask: u32,
}

impl FinalizedLayer {
    /// Build a finalized layer from fully merged opcodes (§4.3). `waveform`
    /// is the already-loaded sample this region refers to, or `None` if the
    /// sample failed to load (the region is kept as a silent placeholder
    /// per §7's ResourceError policy).
    pub fn finalize(
        merged: &RegionOpcodes,
        sample_rate: u32,
        waveform: Option<Arc<Waveform>>,
    ) -> Self {
        let gain = db_to_linear(merged.volume.unwrap_or(0.0));
        let loop_mode = merged.loop_mode.unwrap_or(LoopMode::Unknown);

        let wave_declares_loop = waveform
            .as_ref()
            .map(|w| w.loop_meta.is_some())
            .unwrap_or(false);
        let eff_loop_mode = resolve_effective_loop_mode(loop_mode, wave_declares_loop);

        let total_frames = waveform.as_ref().map(|w| w.total_frames).unwrap_or(0);
        let (loop_start, loop_end) = resolve_loop_bounds(merged, &waveform, total_frames);

        let loop_overlap = merged.loop_overlap.unwrap_or(0).min(loop_start);
        let loop_scratch = if matches!(
            eff_loop_mode,
            LoopMode::LoopContinuous | LoopMode::LoopSustain
        ) {
            build_loop_scratch(&waveform, loop_start, loop_end, loop_overlap.max(4))
        } else {
            Vec::new()
        };

        let eq = std::array::from_fn(|i| EqBandRuntime {
            freq: merged.eq[i].freq.unwrap_or(0.0),
            bw: merged.eq[i].bw.unwrap_or(1.0),
            gain: merged.eq[i].gain.unwrap_or(0.0),
            vel2freq: merged.eq[i].vel2freq.unwrap_or(0.0),
            vel2gain: merged.eq[i].vel2gain.unwrap_or(0.0),
            audible: merged.eq[i].freq.is_some(),
        });
        let eq_bitmask = eq
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, b)| if b.audible { acc | (1 << i) } else { acc });

        let mod_bitmask = merged
            .modulations
            .iter()
            .fold(0u32, |acc, m| acc | (1u32 << (dest_index(m.dest) & 31)));

        let flex_lfo = merged
            .flex_lfo
            .iter()
            .map(|(id, spec)| (*id, LfoRuntimeSpec::from_opcodes(spec, sample_rate)))
            .collect();

        Self {
            waveform,
            lokey: merged.lokey.unwrap_or(0),
            hikey: merged.hikey.unwrap_or(127),
            lovel: merged.lovel.unwrap_or(0),
            hivel: merged.hivel.unwrap_or(127),
            lochan: merged.lochan.unwrap_or(1).saturating_sub(1),
            hichan: merged.hichan.unwrap_or(16).saturating_sub(1),
            lorand: merged.lorand.unwrap_or(0.0),
            hirand: merged.hirand.unwrap_or(1.0),

            pitch_keycenter: merged.pitch_keycenter.unwrap_or(60),
            pitch_keytrack: merged.pitch_keytrack.unwrap_or(100.0),
            pitch_veltrack: merged.pitch_veltrack.unwrap_or(0.0),
            pitch_random: merged.pitch_random.unwrap_or(0.0),
            transpose_cents: merged.transpose.unwrap_or(0) as f32 * 100.0,
            tune_cents: merged.tune.unwrap_or(0) as f32,

            offset: merged.offset.unwrap_or(0),
            offset_random: merged.offset_random.unwrap_or(0),

            loop_mode,
            eff_loop_mode,
            loop_start,
            loop_end,
            loop_overlap,
            loop_scratch,

            count: merged.count,

            group: merged.group,
            off_by: merged.off_by,
            off_mode: merged.off_mode.unwrap_or(OffMode::Normal),

            trigger: merged.trigger.unwrap_or(Trigger::Attack),

            sw_lokey: merged.sw_lokey,
            sw_hikey: merged.sw_hikey,
            sw_last: merged.sw_last,
            sw_down: merged.sw_down,
            sw_up: merged.sw_up,
            sw_previous: merged.sw_previous,

            gain,
            pan: merged.pan.unwrap_or(0.0),
            width: merged.width.unwrap_or(100.0),
            position: merged.position.unwrap_or(0.0),

            amp_keycenter: merged.amp_keycenter.unwrap_or(60),
            amp_keytrack: merged.amp_keytrack.unwrap_or(0.0),
            amp_veltrack: merged.amp_veltrack.unwrap_or(100.0),
            amp_velcurve: build_dense_128(&merged.amp_velcurve, Interp::Linear, 0.0, 1.0),
            amp_random: merged.amp_random.unwrap_or(0.0),
            rt_decay: merged.rt_decay.unwrap_or(0.0),

            delay: merged.delay.unwrap_or(0.0),
            delay_random: merged.delay_random.unwrap_or(0.0),
            delay_cc: merged.delay_cc.clone(),

            send1bus: merged.send1bus,
            send1gain: merged.send1gain.unwrap_or(100.0),
            send2bus: merged.send2bus,
            send2gain: merged.send2gain.unwrap_or(100.0),

            cutoff: merged.cutoff,
            resonance: merged.resonance.unwrap_or(0.0),
            fil_type: merged.fil_type.unwrap_or(FilterType::Lpf12),
            fil_keytrack: merged.fil_keytrack.unwrap_or(0.0),
            fil_veltrack: merged.fil_veltrack.unwrap_or(0.0),
            fil_random: merged.fil_random.unwrap_or(0.0),
            cutoff_cc: merged.cutoff_cc.clone(),

            cutoff2: merged.cutoff2,
            resonance2: merged.resonance2.unwrap_or(0.0),
            fil2_type: merged.fil2_type.unwrap_or(FilterType::Lpf12),

            ampeg: EnvelopeShape::from_opcodes(&merged.ampeg, sample_rate),
            fileg: EnvelopeShape::from_opcodes(&merged.fileg, sample_rate),
            pitcheg: EnvelopeShape::from_opcodes(&merged.pitcheg, sample_rate),

            amplfo: LfoRuntimeSpec::from_opcodes(&merged.amplfo, sample_rate),
            fillfo: LfoRuntimeSpec::from_opcodes(&merged.fillfo, sample_rate),
            pitchlfo: LfoRuntimeSpec::from_opcodes(&merged.pitchlfo, sample_rate),
            flex_lfo,

            eq,
            eq_bitmask,

            xfin_lokey: merged.xfin_lokey.unwrap_or(0),
            xfin_hikey: merged.xfin_hikey.unwrap_or(0),
            xfout_lokey: merged.xfout_lokey.unwrap_or(127),
            xfout_hikey: merged.xfout_hikey.unwrap_or(127),
            xfin_lovel: merged.xfin_lovel.unwrap_or(0),
            xfin_hivel: merged.xfin_hivel.unwrap_or(0),
            xfout_lovel: merged.xfout_lovel.unwrap_or(127),
            xfout_hivel: merged.xfout_hivel.unwrap_or(127),
            xf_keycurve: merged.xf_keycurve.unwrap_or(XfCurve::Power),
            xf_velcurve: merged.xf_velcurve.unwrap_or(XfCurve::Power),

            seq_length: merged.seq_length.unwrap_or(1).max(1),
            seq_position: merged.seq_position.unwrap_or(1).max(1),

            bend_up: merged.bend_up.unwrap_or(200),
            bend_down: merged.bend_down.unwrap_or(200),
            bend_step: merged.bend_step.unwrap_or(1).max(1),

            on_locc: merged.on_locc.clone(),
            on_hicc: merged.on_hicc.clone(),

            modulations: merged.modulations.clone(),
            nifs: merged.nifs.clone(),
            mod_bitmask,
        }
    }
}

fn dest_index(dest: ModDest) -> u32 {
    match dest {
        ModDest::Pitch => 0,
        ModDest::Cutoff => 1,
        ModDest::Resonance => 2,
        ModDest::Cutoff2 => 3,
        ModDest::Resonance2 => 4,
        ModDest::Amplitude => 5,
        ModDest::Gain => 6,
        ModDest::Pan => 7,
        ModDest::ToneCtl => 8,
        ModDest::EgStageTime { .. } => 9,
        ModDest::LfoFreq { .. } => 10,
        ModDest::EqFreq(n) => 11 + n as u32,
        ModDest::EqBw(n) => 14 + n as u32,
        ModDest::EqGain(n) => 17 + n as u32,
    }
}

pub fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

fn resolve_effective_loop_mode(mode: LoopMode, wave_declares_loop: bool) -> LoopMode {
    match mode {
        LoopMode::Unknown => {
            if wave_declares_loop {
                LoopMode::LoopContinuous
            } else {
                LoopMode::NoLoop
            }
        }
        other => other,
    }
}

fn resolve_loop_bounds(
    merged: &RegionOpcodes,
    waveform: &Option<Arc<Waveform>>,
    total_frames: u32,
) -> (u32, u32) {
    let wave_loop = waveform.as_ref().and_then(|w| w.loop_meta);
    let start = merged
        .loop_start
        .or(wave_loop.map(|l| l.start))
        .unwrap_or(0);
    let end = merged
        .loop_end
        .or(wave_loop.map(|l| l.end))
        .unwrap_or(total_frames);
    (start, end.min(total_frames.max(start + 1)))
}

/// Build the straightened loop-join scratch buffer (§4.3 step 3, §9):
/// linearly cross-fades the `overlap` frames preceding `loop_end` into the
/// `overlap` frames starting at `loop_start`, producing a contiguous region
/// the cubic interpolator can read across without special-casing the seam.
fn build_loop_scratch(
    waveform: &Option<Arc<Waveform>>,
    loop_start: u32,
    loop_end: u32,
    overlap: u32,
) -> Vec<(i16, i16)> {
    let Some(w) = waveform else {
        return Vec::new();
    };
    if loop_end <= loop_start || loop_end > w.total_frames {
        return Vec::new();
    }
    let overlap = (overlap.max(4).min(loop_start)) as usize;
    let mut out = Vec::with_capacity(overlap * 2);
    for i in 0..overlap {
        let tail_idx = loop_end as usize - overlap + i;
        let head_idx = loop_start as usize + i;
        if tail_idx >= w.preloaded_frames as usize || head_idx >= w.preloaded_frames as usize {
            break;
        }
        let tail = w.frame(tail_idx as u32);
        let head = w.frame(head_idx as u32);
        let t = i as f32 / overlap.max(1) as f32;
        let l = (tail.0 as f32 * (1.0 - t) + head.0 as f32 * t) as i16;
        let r = (tail.1 as f32 * (1.0 - t) + head.1 as f32 * t) as i16;
        out.push((l, r));
    }
    out
}
