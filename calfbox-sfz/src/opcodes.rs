//! Authored SFZ opcode model (§3, §6).
//!
//! Every field is `Option<T>`: `None` means "not set in this layer,
//! inherit from parent" — this is the `Option<T>` encoding of the
//! source's `has_<field>` bitset that §9's design notes recommend.

use hashbrown::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Trigger {
    Attack,
    Release,
    ReleaseKey,
    First,
    Legato,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopMode {
    Unknown,
    NoLoop,
    OneShot,
    OneShotChokeable,
    LoopContinuous,
    LoopSustain,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OffMode {
    Fast,
    Normal,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterType {
    Lpf12,
    Hpf12,
    Bpf12,
    Lpf24,
    Hpf24,
    Lpf24Hybrid,
    Lpf1p,
    Hpf1p,
    Notch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LfoWave {
    Triangle,
    Sine,
    Square,
    Square50,
    Square25,
    Square12,
    SawUp,
    SawDown,
    SampleHold,
}

/// Source feeding a modulation (§3 modulation list, §4.6 step 3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModSrc {
    Cc(u8),
    Velocity,
    Aftertouch,
    ChannelAftertouch,
    PitchBend,
    EnvAmp,
    EnvFilter,
    EnvPitch,
    LfoAmp,
    LfoFilter,
    LfoPitch,
    FlexLfo(u8),
}

/// Destination a modulation accumulates into (§3, §4.6 step 3).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModDest {
    Pitch,
    Cutoff,
    Resonance,
    Cutoff2,
    Resonance2,
    Amplitude,
    Gain,
    Pan,
    ToneCtl,
    EgStageTime { eg: EgKind, stage: u8 },
    LfoFreq { lfo: LfoKind },
    EqFreq(u8),
    EqBw(u8),
    EqGain(u8),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EgKind {
    Amp,
    Filter,
    Pitch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LfoKind {
    Amp,
    Filter,
    Pitch,
    Flex(u8),
}

#[derive(Clone, Copy, Debug)]
pub struct Modulation {
    pub src: ModSrc,
    pub src2: Option<ModSrc>,
    pub dest: ModDest,
    pub amount: f32,
    pub curve_id: Option<u8>,
    /// True when this modulation was copied down from a parent layer
    /// rather than authored locally (§4.3 step 2); inherited entries never
    /// overwrite a locally-authored one with the same `(src, src2, dest)`.
    pub inherited: bool,
}

#[derive(Clone, Copy, Debug)]
pub enum NifKind {
    AmpRandom,
    PitchRandom,
    FilRandom,
    PitchVeltrack,
    DelayCc(u8),
}

#[derive(Clone, Copy, Debug)]
pub struct Nif {
    pub kind: NifKind,
    pub param: f32,
}

/// Authored DAHDSR opcodes for one envelope (`ampeg_*`, `fileg_*`, `pitcheg_*`).
#[derive(Clone, Copy, Debug, Default)]
pub struct EgOpcodes {
    pub delay: Option<f32>,
    pub attack: Option<f32>,
    pub hold: Option<f32>,
    pub decay: Option<f32>,
    pub sustain: Option<f32>,
    pub release: Option<f32>,
    pub depth: Option<f32>,
    pub vel2delay: Option<f32>,
    pub vel2attack: Option<f32>,
    pub vel2release: Option<f32>,
}

/// Authored LFO opcodes (`amplfo_*`, `fillfo_*`, `pitchlfo_*`, `lfoN_*`).
#[derive(Clone, Copy, Debug, Default)]
pub struct LfoOpcodes {
    pub freq: Option<f32>,
    pub delay: Option<f32>,
    pub fade: Option<f32>,
    pub wave: Option<LfoWave>,
    pub phase0: Option<f32>,
    pub depth: Option<f32>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct EqBandOpcodes {
    pub freq: Option<f32>,
    pub bw: Option<f32>,
    pub gain: Option<f32>,
    pub vel2freq: Option<f32>,
    pub vel2gain: Option<f32>,
}

/// The full set of authored opcodes a layer (global/master/group/region)
/// may carry, per §3 and §6's recognized-key list.
#[derive(Clone, Debug, Default)]
pub struct RegionOpcodes {
    pub sample: Option<String>,

    pub lokey: Option<u8>,
    pub hikey: Option<u8>,
    pub key: Option<u8>,
    pub lovel: Option<u8>,
    pub hivel: Option<u8>,
    pub lochan: Option<u8>,
    pub hichan: Option<u8>,
    pub lorand: Option<f32>,
    pub hirand: Option<f32>,

    pub pitch_keycenter: Option<u8>,
    pub pitch_keytrack: Option<f32>,
    pub pitch_veltrack: Option<f32>,
    pub pitch_random: Option<f32>,
    pub transpose: Option<i32>,
    pub tune: Option<i32>,

    pub offset: Option<u32>,
    pub offset_random: Option<u32>,
    pub end: Option<u32>,

    pub loop_mode: Option<LoopMode>,
    pub loop_start: Option<u32>,
    pub loop_end: Option<u32>,
    pub loop_crossfade: Option<f32>,
    pub loop_overlap: Option<u32>,

    pub count: Option<u32>,

    pub group: Option<u32>,
    pub off_by: Option<u32>,
    pub off_mode: Option<OffMode>,

    pub trigger: Option<Trigger>,

    pub sw_lokey: Option<u8>,
    pub sw_hikey: Option<u8>,
    pub sw_last: Option<u8>,
    pub sw_down: Option<u8>,
    pub sw_up: Option<u8>,
    pub sw_previous: Option<u8>,

    pub volume: Option<f32>,
    pub pan: Option<f32>,
    pub width: Option<f32>,
    pub position: Option<f32>,

    pub amp_keycenter: Option<u8>,
    pub amp_keytrack: Option<f32>,
    pub amp_veltrack: Option<f32>,
    pub amp_velcurve: HashMap<u8, f32>,
    pub amp_random: Option<f32>,
    pub rt_decay: Option<f32>,

    pub delay: Option<f32>,
    pub delay_random: Option<f32>,
    pub delay_cc: HashMap<u8, f32>,

    pub output: Option<u32>,
    pub send1bus: Option<u32>,
    pub send1gain: Option<f32>,
    pub send2bus: Option<u32>,
    pub send2gain: Option<f32>,

    pub cutoff: Option<f32>,
    pub resonance: Option<f32>,
    pub fil_type: Option<FilterType>,
    pub fil_keycenter: Option<u8>,
    pub fil_keytrack: Option<f32>,
    pub fil_veltrack: Option<f32>,
    pub fil_random: Option<f32>,
    pub cutoff_cc: HashMap<u8, f32>,
    pub cutoff_chanaft: Option<f32>,

    pub cutoff2: Option<f32>,
    pub resonance2: Option<f32>,
    pub fil2_type: Option<FilterType>,

    pub ampeg: EgOpcodes,
    pub fileg: EgOpcodes,
    pub pitcheg: EgOpcodes,

    pub amplfo: LfoOpcodes,
    pub fillfo: LfoOpcodes,
    pub pitchlfo: LfoOpcodes,
    pub flex_lfo: HashMap<u8, LfoOpcodes>,

    pub eq: [EqBandOpcodes; 3],

    pub xfin_lokey: Option<u8>,
    pub xfin_hikey: Option<u8>,
    pub xfout_lokey: Option<u8>,
    pub xfout_hikey: Option<u8>,
    pub xfin_lovel: Option<u8>,
    pub xfin_hivel: Option<u8>,
    pub xfout_lovel: Option<u8>,
    pub xfout_hivel: Option<u8>,
    pub xf_keycurve: Option<XfCurve>,
    pub xf_velcurve: Option<XfCurve>,

    pub seq_length: Option<u32>,
    pub seq_position: Option<u32>,

    pub bend_up: Option<i32>,
    pub bend_down: Option<i32>,
    pub bend_step: Option<i32>,

    pub on_locc: HashMap<u8, u8>,
    pub on_hicc: HashMap<u8, u8>,

    pub modulations: Vec<Modulation>,
    pub nifs: Vec<Nif>,

    /// Unknown opcodes, preserved verbatim for round trip (§4.10).
    pub unknown: HashMap<String, String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum XfCurve {
    Gain,
    Power,
}

impl RegionOpcodes {
    pub fn merge_from_parent(&mut self, parent: &RegionOpcodes) {
        macro_rules! inherit {
            ($field:ident) => {
                if self.$field.is_none() {
                    self.$field = parent.$field.clone();
                }
            };
        }
        inherit!(sample);
        inherit!(lokey);
        inherit!(hikey);
        inherit!(key);
        inherit!(lovel);
        inherit!(hivel);
        inherit!(lochan);
        inherit!(hichan);
        inherit!(lorand);
        inherit!(hirand);
        inherit!(pitch_keycenter);
        inherit!(pitch_keytrack);
        inherit!(pitch_veltrack);
        inherit!(pitch_random);
        inherit!(transpose);
        inherit!(tune);
        inherit!(offset);
        inherit!(offset_random);
        inherit!(end);
        inherit!(loop_mode);
        inherit!(loop_start);
        inherit!(loop_end);
        inherit!(loop_crossfade);
        inherit!(loop_overlap);
        inherit!(count);
        inherit!(group);
        inherit!(off_by);
        inherit!(off_mode);
        inherit!(trigger);
        inherit!(sw_lokey);
        inherit!(sw_hikey);
        inherit!(sw_last);
        inherit!(sw_down);
        inherit!(sw_up);
        inherit!(sw_previous);
        inherit!(volume);
        inherit!(pan);
        inherit!(width);
        inherit!(position);
        inherit!(amp_keycenter);
        inherit!(amp_keytrack);
        inherit!(amp_veltrack);
        inherit!(amp_random);
        inherit!(rt_decay);
        inherit!(delay);
        inherit!(delay_random);
        inherit!(output);
        inherit!(send1bus);
        inherit!(send1gain);
        inherit!(send2bus);
        inherit!(send2gain);
        inherit!(cutoff);
        inherit!(resonance);
        inherit!(fil_type);
        inherit!(fil_keycenter);
        inherit!(fil_keytrack);
        inherit!(fil_veltrack);
        inherit!(fil_random);
        inherit!(cutoff_chanaft);
        inherit!(cutoff2);
        inherit!(resonance2);
        inherit!(fil2_type);
        inherit!(xfin_lokey);
        inherit!(xfin_hikey);
        inherit!(xfout_lokey);
        inherit!(xfout_hikey);
        inherit!(xfin_lovel);
        inherit!(xfin_hivel);
        inherit!(xfout_lovel);
        inherit!(xfout_hivel);
        inherit!(xf_keycurve);
        inherit!(xf_velcurve);
        inherit!(seq_length);
        inherit!(seq_position);
        inherit!(bend_up);
        inherit!(bend_down);
        inherit!(bend_step);

        for (k, v) in &parent.amp_velcurve {
            self.amp_velcurve.entry(*k).or_insert(*v);
        }
        for (k, v) in &parent.delay_cc {
            self.delay_cc.entry(*k).or_insert(*v);
        }
        for (k, v) in &parent.cutoff_cc {
            self.cutoff_cc.entry(*k).or_insert(*v);
        }
        for (k, v) in &parent.on_locc {
            self.on_locc.entry(*k).or_insert(*v);
        }
        for (k, v) in &parent.on_hicc {
            self.on_hicc.entry(*k).or_insert(*v);
        }
        for (k, v) in &parent.flex_lfo {
            self.flex_lfo.entry(*k).or_insert(*v);
        }
        for (k, v) in &parent.unknown {
            self.unknown.entry(k.clone()).or_insert_with(|| v.clone());
        }

        merge_eg(&mut self.ampeg, &parent.ampeg);
        merge_eg(&mut self.fileg, &parent.fileg);
        merge_eg(&mut self.pitcheg, &parent.pitcheg);
        merge_lfo(&mut self.amplfo, &parent.amplfo);
        merge_lfo(&mut self.fillfo, &parent.fillfo);
        merge_lfo(&mut self.pitchlfo, &parent.pitchlfo);
        for i in 0..3 {
            merge_eq(&mut self.eq[i], &parent.eq[i]);
        }

        // Propagate modulations not already present locally by (src, src2, dest).
        for m in &parent.modulations {
            let exists = self.modulations.iter().any(|l| {
                l.src == m.src
                    && l.src2 == m.src2
                    && std::mem::discriminant(&l.dest) == std::mem::discriminant(&m.dest)
            });
            if !exists {
                let mut copy = *m;
                copy.inherited = true;
                self.modulations.push(copy);
            }
        }
        // Nifs are propagated wholesale; they are one-shot per-voice and
        // idempotent to duplicate only in pathological authoring, so a
        // simple append (skipping exact kind duplicates) matches §4.3 step 2.
        for n in &parent.nifs {
            let exists = self
                .nifs
                .iter()
                .any(|l| std::mem::discriminant(&l.kind) == std::mem::discriminant(&n.kind));
            if !exists {
                self.nifs.push(*n);
            }
        }
    }
}

fn merge_eg(child: &mut EgOpcodes, parent: &EgOpcodes) {
    macro_rules! inherit {
        ($f:ident) => {
            if child.$f.is_none() {
                child.$f = parent.$f;
            }
        };
    }
    inherit!(delay);
    inherit!(attack);
    inherit!(hold);
    inherit!(decay);
    inherit!(sustain);
    inherit!(release);
    inherit!(depth);
    inherit!(vel2delay);
    inherit!(vel2attack);
    inherit!(vel2release);
}

fn merge_lfo(child: &mut LfoOpcodes, parent: &LfoOpcodes) {
    macro_rules! inherit {
        ($f:ident) => {
            if child.$f.is_none() {
                child.$f = parent.$f;
            }
        };
    }
    inherit!(freq);
    inherit!(delay);
    inherit!(fade);
    inherit!(wave);
    inherit!(phase0);
    inherit!(depth);
}

fn merge_eq(child: &mut EqBandOpcodes, parent: &EqBandOpcodes) {
    macro_rules! inherit {
        ($f:ident) => {
            if child.$f.is_none() {
                child.$f = parent.$f;
            }
        };
    }
    inherit!(freq);
    inherit!(bw);
    inherit!(gain);
    inherit!(vel2freq);
    inherit!(vel2gain);
}
