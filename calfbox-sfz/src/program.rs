//! A loaded program: the finalized region set, its region lookup, CC
//! labels/initial values, and curve tables.
//!
//! §3 describes programs as holding a reference count so a swap waits
//! until no voice still references the outgoing program. A channel and
//! every voice playing under it hold `Arc<Program>` clones instead of a raw
//! pointer plus a manual counter (§9's own pointer-swap write-up already
//! recommends `Arc` for exactly this); the old program frees itself the
//! moment its last `Arc` clone drops, with no polling required.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use calfbox_core::wavebank::{SampleSearchPath, WaveBank};

use crate::curve::Curve128;
use crate::layer::FinalizedLayer;
use crate::loader::SfzLoader;
use crate::lookup::RegionLookup;

pub struct Program {
    pub name: String,
    pub regions: Vec<FinalizedLayer>,
    pub lookup: RegionLookup,
    /// Per-region round-robin position, 1-based, wrapping at `seq_length`
    /// (§4.4). Channels hold this program behind a shared `Arc`, so the
    /// counters need interior mutability; an `AtomicU32` per region is the
    /// simplest way to let `advance_round_robin` take `&self`.
    seq_counters: Vec<AtomicU32>,
    pub cc_labels: hashbrown::HashMap<u8, String>,
    pub key_labels: hashbrown::HashMap<u8, String>,
    pub cc_initial: hashbrown::HashMap<u8, f32>,
    pub curves: hashbrown::HashMap<u32, Curve128>,
    pub sample_dir: PathBuf,
}

impl Program {
    pub fn load_from_sfz(
        name: impl Into<String>,
        text: &str,
        sample_dir: PathBuf,
        wavebank: &mut WaveBank,
        sample_rate: u32,
    ) -> Self {
        let mut loader = SfzLoader::new();
        loader.load_str(text);

        let search = SampleSearchPath {
            default_path: loader.control.default_path.as_ref().map(PathBuf::from),
            sample_dir: sample_dir.clone(),
            tar_ref: None,
        };

        let mut regions = Vec::new();
        for idx in loader.arena.region_indices() {
            let merged = loader.arena.merged_opcodes(idx);
            let waveform = merged
                .sample
                .as_ref()
                .and_then(|s| wavebank.load(s, &search).ok());
            if merged.sample.is_some() && waveform.is_none() {
                tracing::warn!(
                    "region sample '{}' failed to load, keeping region as silent placeholder",
                    merged.sample.as_deref().unwrap_or("")
                );
            }
            regions.push(FinalizedLayer::finalize(&merged, sample_rate, waveform));
        }

        let lookup = RegionLookup::build(&regions);
        let seq_counters = (0..regions.len()).map(|_| AtomicU32::new(1)).collect();

        Self {
            name: name.into(),
            regions,
            lookup,
            seq_counters,
            cc_labels: loader.control.label_cc,
            key_labels: loader.control.label_key,
            cc_initial: loader.control.set_cc,
            curves: loader.curves,
            sample_dir,
        }
    }

    pub fn region(&self, id: u32) -> &FinalizedLayer {
        &self.regions[id as usize]
    }

    /// Advance this region's round-robin counter and report whether *this*
    /// event is the one that should fire it (§4.4 round robin). Takes
    /// `&self`: the counter is an atomic precisely so voices sharing this
    /// program through an `Arc` don't need exclusive access to fire it.
    pub fn advance_round_robin(&self, id: u32) -> bool {
        let region = &self.regions[id as usize];
        let length = region.seq_length.max(1);
        let position = region.seq_position.max(1);
        let counter = &self.seq_counters[id as usize];
        let cur = counter.load(Ordering::Relaxed);
        let fires = cur == position;
        let next = if cur >= length { 1 } else { cur + 1 };
        counter.store(next, Ordering::Relaxed);
        fires
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_cycles_through_all_positions() {
        let mut wavebank = WaveBank::new();
        let sfz = "\
            <group> seq_length=2\n\
            <region> seq_position=1 sample=a.wav lokey=60 hikey=60\n\
            <region> seq_position=2 sample=b.wav lokey=60 hikey=60\n";
        let program =
            Program::load_from_sfz("test", sfz, PathBuf::from("."), &mut wavebank, 44100);
        assert_eq!(program.regions.len(), 2);

        let mut fires = Vec::new();
        for _ in 0..4 {
            let f0 = program.advance_round_robin(0);
            let f1 = program.advance_round_robin(1);
            fires.push((f0, f1));
        }
        assert_eq!(fires, vec![(true, false), (false, true), (true, false), (false, true)]);
    }
}
