//! Opcode dispatch (§4.10): applies one `key=value` pair to a layer's
//! authored `RegionOpcodes`, and the loader that walks `<header>` events
//! into a `LayerArena`.

use tracing::warn;

use crate::curve::Curve128;
use crate::layer::{LayerArena, LayerKind};
use crate::opcodes::*;
use crate::parser::{ParseEvent, SfzTokenizer};

pub struct ControlSection {
    pub default_path: Option<String>,
    pub set_cc: hashbrown::HashMap<u8, f32>,
    pub label_cc: hashbrown::HashMap<u8, String>,
    pub label_key: hashbrown::HashMap<u8, String>,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            default_path: None,
            set_cc: hashbrown::HashMap::new(),
            label_cc: hashbrown::HashMap::new(),
            label_key: hashbrown::HashMap::new(),
        }
    }
}

pub struct SfzLoader {
    pub arena: LayerArena,
    pub control: ControlSection,
    pub curves: hashbrown::HashMap<u32, Curve128>,
    global: Option<usize>,
    current_master: Option<usize>,
    current_group: Option<usize>,
    current_region: Option<usize>,
    current_header: Option<String>,
    pending_curve_index: Option<u32>,
    pending_curve_points: hashbrown::HashMap<u8, f32>,
}

impl Default for SfzLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl SfzLoader {
    pub fn new() -> Self {
        Self {
            arena: LayerArena::default(),
            control: ControlSection::default(),
            curves: hashbrown::HashMap::new(),
            global: None,
            current_master: None,
            current_group: None,
            current_region: None,
            current_header: None,
            pending_curve_index: None,
            pending_curve_points: hashbrown::HashMap::new(),
        }
    }

    pub fn load_str(&mut self, text: &str) {
        for event in SfzTokenizer::tokenize(text) {
            self.handle_event(event);
        }
        self.flush_curve();
    }

    fn handle_event(&mut self, event: ParseEvent) {
        match event {
            ParseEvent::Header(name) => self.on_header(&name),
            ParseEvent::KeyValue(key, value) => self.on_key_value(&key, &value),
        }
    }

    fn on_header(&mut self, name: &str) {
        self.flush_curve();
        match name {
            "global" => {
                let idx = self.arena.push(LayerKind::Global, None);
                self.global = Some(idx);
                self.current_master = None;
                self.current_group = None;
                self.current_region = None;
            }
            "master" => {
                let idx = self.arena.push(LayerKind::Master, self.global);
                self.current_master = Some(idx);
                self.current_group = None;
                self.current_region = None;
            }
            "group" => {
                let idx = self.arena.push(LayerKind::Group, self.current_master.or(self.global));
                self.current_group = Some(idx);
                self.current_region = None;
            }
            "region" => {
                let parent = self.current_group.or(self.current_master).or(self.global);
                let idx = self.arena.push(LayerKind::Region, parent);
                self.current_region = Some(idx);
            }
            "control" | "curve" | "effect" => {
                if name == "effect" {
                    warn!("<effect> header accepted but ignored (effects are an external collaborator)");
                }
            }
            other => {
                warn!("unrecognized SFZ header <{other}>");
            }
        }
        self.current_header = Some(name.to_string());
    }

    fn on_key_value(&mut self, key: &str, value: &str) {
        match self.current_header.as_deref() {
            Some("control") => self.apply_control(key, value),
            Some("curve") => self.apply_curve(key, value),
            Some("effect") => {}
            _ => {
                if let Some(idx) = self.current_region.or(self.current_group).or(self.current_master).or(self.global) {
                    apply_opcode(&mut self.arena.nodes[idx].opcodes, key, value);
                } else {
                    warn!("key=value pair '{key}={value}' outside any header, ignored");
                }
            }
        }
    }

    fn apply_control(&mut self, key: &str, value: &str) {
        if key == "default_path" {
            self.control.default_path = Some(value.to_string());
        } else if let Some(n) = strip_prefix_index(key, "set_cc") {
            if let Ok(v) = value.parse::<f32>() {
                self.control.set_cc.insert(n, v);
            }
        } else if let Some(n) = strip_prefix_index(key, "label_cc") {
            self.control.label_cc.insert(n, value.to_string());
        } else if let Some(n) = strip_prefix_index(key, "label_key") {
            self.control.label_key.insert(n, value.to_string());
        }
    }

    fn apply_curve(&mut self, key: &str, value: &str) {
        if key == "curve_index" {
            self.flush_curve();
            self.pending_curve_index = value.parse::<u32>().ok();
        } else if let Some(n) = strip_prefix_index(key, "v") {
            if let Ok(v) = value.parse::<f32>() {
                self.pending_curve_points.insert(n, v);
            }
        }
    }

    fn flush_curve(&mut self) {
        if let Some(idx) = self.pending_curve_index.take() {
            let curve = crate::curve::build_dense_128(
                &self.pending_curve_points,
                crate::curve::Interp::Linear,
                0.0,
                1.0,
            );
            self.curves.insert(idx, curve);
        }
        self.pending_curve_points.clear();
    }
}

fn strip_prefix_index(key: &str, prefix: &str) -> Option<u8> {
    key.strip_prefix(prefix)?.parse::<u8>().ok()
}

/// Apply one opcode to a layer's authored fields (§4.10). Unknown opcodes
/// are retained verbatim for round trip rather than dropped.
pub fn apply_opcode(o: &mut RegionOpcodes, key: &str, value: &str) {
    macro_rules! set_f32 {
        ($field:expr) => {
            if let Ok(v) = value.parse::<f32>() {
                $field = Some(v);
                return;
            }
        };
    }
    macro_rules! set_u8 {
        ($field:expr) => {
            if let Ok(v) = value.parse::<u8>() {
                $field = Some(v);
                return;
            }
        };
    }
    macro_rules! set_u32 {
        ($field:expr) => {
            if let Ok(v) = value.parse::<u32>() {
                $field = Some(v);
                return;
            }
        };
    }
    macro_rules! set_i32 {
        ($field:expr) => {
            if let Ok(v) = value.parse::<i32>() {
                $field = Some(v);
                return;
            }
        };
    }

    match key {
        "sample" => {
            o.sample = Some(value.to_string());
            return;
        }
        "lokey" => {
            if let Some(n) = note_name_or_number(value) {
                o.lokey = Some(n);
                return;
            }
        }
        "hikey" => {
            if let Some(n) = note_name_or_number(value) {
                o.hikey = Some(n);
                return;
            }
        }
        "key" => {
            if let Some(n) = note_name_or_number(value) {
                o.lokey = Some(n);
                o.hikey = Some(n);
                o.pitch_keycenter = Some(n);
                return;
            }
        }
        "lovel" => set_u8!(o.lovel),
        "hivel" => set_u8!(o.hivel),
        "lochan" => set_u8!(o.lochan),
        "hichan" => set_u8!(o.hichan),
        "lorand" => set_f32!(o.lorand),
        "hirand" => set_f32!(o.hirand),

        "pitch_keycenter" => {
            if let Some(n) = note_name_or_number(value) {
                o.pitch_keycenter = Some(n);
                return;
            }
        }
        "pitch_keytrack" => set_f32!(o.pitch_keytrack),
        "pitch_veltrack" => {
            set_f32!(o.pitch_veltrack);
        }
        "pitch_random" => {
            set_f32!(o.pitch_random);
        }
        "transpose" => set_i32!(o.transpose),
        "tune" => set_i32!(o.tune),

        "offset" => set_u32!(o.offset),
        "offset_random" => set_u32!(o.offset_random),
        "end" => set_u32!(o.end),

        "loop_mode" => {
            o.loop_mode = Some(match value {
                "no_loop" => LoopMode::NoLoop,
                "one_shot" => LoopMode::OneShot,
                "one_shot_chokeable" => LoopMode::OneShotChokeable,
                "loop_continuous" => LoopMode::LoopContinuous,
                "loop_sustain" => LoopMode::LoopSustain,
                _ => LoopMode::Unknown,
            });
            return;
        }
        "loop_start" => set_u32!(o.loop_start),
        "loop_end" => set_u32!(o.loop_end),
        "loop_crossfade" => set_f32!(o.loop_crossfade),
        "loop_overlap" => set_u32!(o.loop_overlap),

        "count" => set_u32!(o.count),
        "group" => set_u32!(o.group),
        "off_by" => set_u32!(o.off_by),
        "off_mode" => {
            o.off_mode = Some(if value == "fast" { OffMode::Fast } else { OffMode::Normal });
            return;
        }

        "trigger" => {
            o.trigger = Some(match value {
                "release" => Trigger::Release,
                "release_key" => Trigger::ReleaseKey,
                "first" => Trigger::First,
                "legato" => Trigger::Legato,
                _ => Trigger::Attack,
            });
            return;
        }

        "sw_lokey" => set_u8!(o.sw_lokey),
        "sw_hikey" => set_u8!(o.sw_hikey),
        "sw_last" => set_u8!(o.sw_last),
        "sw_down" => set_u8!(o.sw_down),
        "sw_up" => set_u8!(o.sw_up),
        "sw_previous" => set_u8!(o.sw_previous),

        "volume" => set_f32!(o.volume),
        "pan" => set_f32!(o.pan),
        "width" => set_f32!(o.width),
        "position" => set_f32!(o.position),

        "amp_keycenter" => set_u8!(o.amp_keycenter),
        "amp_keytrack" => set_f32!(o.amp_keytrack),
        "amp_veltrack" => set_f32!(o.amp_veltrack),
        "amp_random" => {
            set_f32!(o.amp_random);
        }
        "rt_decay" => set_f32!(o.rt_decay),

        "delay" => set_f32!(o.delay),
        "delay_random" => set_f32!(o.delay_random),

        "output" => set_u32!(o.output),
        "effect1bus" | "send1bus" => set_u32!(o.send1bus),
        "effect1" | "send1gain" => set_f32!(o.send1gain),
        "effect2bus" | "send2bus" => set_u32!(o.send2bus),
        "effect2" | "send2gain" => set_f32!(o.send2gain),

        "cutoff" => set_f32!(o.cutoff),
        "resonance" => set_f32!(o.resonance),
        "fil_type" => {
            o.fil_type = parse_filter_type(value);
            return;
        }
        "fil_keycenter" => set_u8!(o.fil_keycenter),
        "fil_keytrack" => set_f32!(o.fil_keytrack),
        "fil_veltrack" => set_f32!(o.fil_veltrack),
        "fil_random" => {
            set_f32!(o.fil_random);
        }
        "cutoff_chanaft" => set_f32!(o.cutoff_chanaft),
        "cutoff2" => set_f32!(o.cutoff2),
        "resonance2" => set_f32!(o.resonance2),
        "fil2_type" => {
            o.fil2_type = parse_filter_type(value);
            return;
        }

        "xfin_lokey" => set_u8!(o.xfin_lokey),
        "xfin_hikey" => set_u8!(o.xfin_hikey),
        "xfout_lokey" => set_u8!(o.xfout_lokey),
        "xfout_hikey" => set_u8!(o.xfout_hikey),
        "xfin_lovel" => set_u8!(o.xfin_lovel),
        "xfin_hivel" => set_u8!(o.xfin_hivel),
        "xfout_lovel" => set_u8!(o.xfout_lovel),
        "xfout_hivel" => set_u8!(o.xfout_hivel),
        "xf_keycurve" => {
            o.xf_keycurve = Some(if value == "gain" { XfCurve::Gain } else { XfCurve::Power });
            return;
        }
        "xf_velcurve" => {
            o.xf_velcurve = Some(if value == "gain" { XfCurve::Gain } else { XfCurve::Power });
            return;
        }

        "seq_length" => set_u32!(o.seq_length),
        "seq_position" => set_u32!(o.seq_position),

        "bend_up" => set_i32!(o.bend_up),
        "bend_down" => set_i32!(o.bend_down),
        "bend_step" => set_i32!(o.bend_step),

        _ => {}
    }

    if apply_eg_opcode("ampeg", &mut o.ampeg, key, value) {
        return;
    }
    if apply_eg_opcode("fileg", &mut o.fileg, key, value) {
        return;
    }
    if apply_eg_opcode("pitcheg", &mut o.pitcheg, key, value) {
        return;
    }
    if apply_lfo_opcode("amplfo", &mut o.amplfo, key, value) {
        return;
    }
    if apply_lfo_opcode("fillfo", &mut o.fillfo, key, value) {
        return;
    }
    if apply_lfo_opcode("pitchlfo", &mut o.pitchlfo, key, value) {
        return;
    }
    if let Some(rest) = key.strip_prefix("lfo") {
        if let Some((idx_str, field)) = rest.split_once('_') {
            if let Ok(idx) = idx_str.parse::<u8>() {
                let entry = o.flex_lfo.entry(idx).or_default();
                if apply_lfo_field(entry, field, value) {
                    return;
                }
            }
        }
    }
    for n in 1..=3u8 {
        let prefix = format!("eq{n}_");
        if let Some(field) = key.strip_prefix(prefix.as_str()) {
            let band = &mut o.eq[(n - 1) as usize];
            match field {
                "freq" => set_f32!(band.freq),
                "bw" => set_f32!(band.bw),
                "gain" => set_f32!(band.gain),
                "vel2freq" => set_f32!(band.vel2freq),
                "vel2gain" => set_f32!(band.vel2gain),
                _ => {}
            }
            return;
        }
    }
    for (prefix, eg) in [("ampeg_", EgKind::Amp), ("fileg_", EgKind::Filter), ("pitcheg_", EgKind::Pitch)] {
        if let Some(rest) = key.strip_prefix(prefix) {
            // DAHDSR order; sustain is a level, not a time, so it has no
            // `_cc` variant.
            for (stage_name, stage) in [("delay", 0u8), ("attack", 1), ("hold", 2), ("decay", 3), ("release", 5)] {
                if let Some(n) = strip_prefix_index(rest, &format!("{stage_name}_cc")) {
                    if let Ok(v) = value.parse::<f32>() {
                        o.modulations.push(Modulation {
                            src: ModSrc::Cc(n),
                            src2: None,
                            dest: ModDest::EgStageTime { eg, stage },
                            amount: v,
                            curve_id: None,
                            inherited: false,
                        });
                        return;
                    }
                }
            }
        }
    }
    for (prefix, lfo) in [("amplfo_", LfoKind::Amp), ("fillfo_", LfoKind::Filter), ("pitchlfo_", LfoKind::Pitch)] {
        if let Some(n) = key.strip_prefix(prefix).and_then(|rest| strip_prefix_index(rest, "freq_cc")) {
            if let Ok(v) = value.parse::<f32>() {
                o.modulations.push(Modulation {
                    src: ModSrc::Cc(n),
                    src2: None,
                    dest: ModDest::LfoFreq { lfo },
                    amount: v,
                    curve_id: None,
                    inherited: false,
                });
                return;
            }
        }
    }
    if let Some(n) = strip_prefix_index(key, "amp_velcurve_") {
        if let Ok(v) = value.parse::<f32>() {
            o.amp_velcurve.insert(n, v);
            return;
        }
    }
    if let Some(n) = strip_prefix_index(key, "delay_cc") {
        if let Ok(v) = value.parse::<f32>() {
            o.delay_cc.insert(n, v);
            o.nifs.push(Nif {
                kind: NifKind::DelayCc(n),
                param: v,
            });
            return;
        }
    }
    if let Some(n) = strip_prefix_index(key, "cutoff_cc") {
        if let Ok(v) = value.parse::<f32>() {
            o.cutoff_cc.insert(n, v);
            o.modulations.push(Modulation {
                src: ModSrc::Cc(n),
                src2: None,
                dest: ModDest::Cutoff,
                amount: v,
                curve_id: None,
                inherited: false,
            });
            return;
        }
    }
    if let Some(n) = strip_prefix_index(key, "on_locc") {
        if let Ok(v) = value.parse::<u8>() {
            o.on_locc.insert(n, v);
            return;
        }
    }
    if let Some(n) = strip_prefix_index(key, "on_hicc") {
        if let Ok(v) = value.parse::<u8>() {
            o.on_hicc.insert(n, v);
            return;
        }
    }

    // Nothing matched: preserve verbatim for round trip and log once.
    warn!("unknown SFZ opcode '{key}={value}' retained verbatim");
    o.unknown.insert(key.to_string(), value.to_string());
}

fn apply_eg_opcode(prefix: &str, eg: &mut EgOpcodes, key: &str, value: &str) -> bool {
    let Some(field) = key.strip_prefix(prefix).and_then(|r| r.strip_prefix('_')) else {
        return false;
    };
    let Ok(v) = value.parse::<f32>() else {
        return false;
    };
    match field {
        "delay" => eg.delay = Some(v),
        "attack" => eg.attack = Some(v),
        "hold" => eg.hold = Some(v),
        "decay" => eg.decay = Some(v),
        "sustain" => eg.sustain = Some(v),
        "release" => eg.release = Some(v),
        "depth" => eg.depth = Some(v),
        "vel2delay" => eg.vel2delay = Some(v),
        "vel2attack" => eg.vel2attack = Some(v),
        "vel2release" => eg.vel2release = Some(v),
        _ => return false,
    }
    true
}

fn apply_lfo_opcode(prefix: &str, lfo: &mut LfoOpcodes, key: &str, value: &str) -> bool {
    let Some(field) = key.strip_prefix(prefix).and_then(|r| r.strip_prefix('_')) else {
        return false;
    };
    apply_lfo_field(lfo, field, value)
}

fn apply_lfo_field(lfo: &mut LfoOpcodes, field: &str, value: &str) -> bool {
    match field {
        "freq" => lfo.freq = value.parse().ok(),
        "delay" => lfo.delay = value.parse().ok(),
        "fade" => lfo.fade = value.parse().ok(),
        "phase0" | "phase" => lfo.phase0 = value.parse().ok(),
        "depth" => lfo.depth = value.parse().ok(),
        "wave" => lfo.wave = parse_lfo_wave(value),
        _ => return false,
    }
    true
}

fn parse_lfo_wave(value: &str) -> Option<LfoWave> {
    Some(match value {
        "0" | "triangle" => LfoWave::Triangle,
        "1" | "sine" => LfoWave::Sine,
        "2" | "square" => LfoWave::Square,
        "3" | "square50" => LfoWave::Square50,
        "4" | "square25" => LfoWave::Square25,
        "5" | "square12" => LfoWave::Square12,
        "6" | "saw_up" => LfoWave::SawUp,
        "7" | "saw_down" => LfoWave::SawDown,
        "8" | "sample_hold" => LfoWave::SampleHold,
        _ => return None,
    })
}

fn parse_filter_type(value: &str) -> Option<FilterType> {
    Some(match value {
        "lpf_1p" => FilterType::Lpf1p,
        "hpf_1p" => FilterType::Hpf1p,
        "lpf_2p" => FilterType::Lpf12,
        "hpf_2p" => FilterType::Hpf12,
        "bpf_2p" => FilterType::Bpf12,
        "lpf_4p" => FilterType::Lpf24,
        "hpf_4p" => FilterType::Hpf24,
        "lpf_4p_hybrid" => FilterType::Lpf24Hybrid,
        "notch_2p" => FilterType::Notch,
        _ => return None,
    })
}

/// Accept either a bare MIDI note number or an SFZ note name (`c4`, `cs3`, ...).
fn note_name_or_number(value: &str) -> Option<u8> {
    if let Ok(n) = value.parse::<u8>() {
        return Some(n);
    }
    let lower = value.to_ascii_lowercase();
    let mut chars = lower.chars();
    let letter = chars.next()?;
    let base = match letter {
        'c' => 0,
        'd' => 2,
        'e' => 4,
        'f' => 5,
        'g' => 7,
        'a' => 9,
        'b' => 11,
        _ => return None,
    };
    let mut rest: String = chars.collect();
    let sharp = rest.starts_with('s') || rest.starts_with('#');
    if sharp {
        rest.remove(0);
    }
    let octave: i32 = rest.parse().ok()?;
    let note = base + if sharp { 1 } else { 0 } + (octave + 1) * 12;
    if (0..=127).contains(&note) { Some(note as u8) } else { None }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_region_under_group() {
        let mut loader = SfzLoader::new();
        loader.load_str(
            "<group> amp_veltrack=80\n<region> sample=one.wav lokey=60 hikey=60\n",
        );
        let regions = loader.arena.region_indices();
        assert_eq!(regions.len(), 1);
        let merged = loader.arena.merged_opcodes(regions[0]);
        assert_eq!(merged.sample.as_deref(), Some("one.wav"));
        assert_eq!(merged.lokey, Some(60));
        assert_eq!(merged.amp_veltrack, Some(80.0));
    }

    #[test]
    fn note_names_resolve() {
        assert_eq!(note_name_or_number("c4"), Some(60));
        assert_eq!(note_name_or_number("cs4"), Some(61));
    }

    #[test]
    fn unknown_opcode_preserved() {
        let mut o = RegionOpcodes::default();
        apply_opcode(&mut o, "totally_made_up", "7");
        assert_eq!(o.unknown.get("totally_made_up"), Some(&"7".to_string()));
    }
}
