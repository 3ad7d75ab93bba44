//! Waveform storage: an owned, reference-counted PCM buffer plus loop
//! metadata and optional band-limited level variants (§3).

use std::sync::Arc;

/// Loop metadata declared by the sample file itself (a WAV `smpl` chunk,
/// when present) as opposed to the SFZ-authored loop opcodes.
#[derive(Clone, Copy, Debug)]
pub struct LoopMeta {
    pub start: u32,
    pub end: u32,
}

/// One band-limited resampling of the source PCM, valid up to `max_rate`
/// (a 32.32 fixed-point delta). The generator selects the coarsest variant
/// whose `max_rate` still covers the voice's current delta (§4.6 step 4).
#[derive(Debug)]
pub struct LevelVariant {
    pub max_delta: u64,
    pub data: Vec<i16>,
}

/// An owned, ref-counted sample. Multiple layers and voices may share one
/// via `Arc<Waveform>`; it is dropped when the last referencing region and
/// voice release it.
#[derive(Debug)]
pub struct Waveform {
    /// Interleaved 16-bit PCM, `channels` samples per frame.
    pub data: Vec<i16>,
    pub channels: u8,
    pub sample_rate: u32,
    pub total_frames: u32,
    /// Frames resident in `data`; for streamed waveforms this is less than
    /// `total_frames` and the prefetch pipe serves the remainder.
    pub preloaded_frames: u32,
    pub loop_meta: Option<LoopMeta>,
    pub levels: Vec<LevelVariant>,
    /// Path this waveform was loaded from, kept for wavebank keying and
    /// streaming re-opens.
    pub source_path: std::path::PathBuf,
}

impl Waveform {
    pub fn is_streamed(&self) -> bool {
        self.preloaded_frames < self.total_frames
    }

    /// Read one frame (1 or 2 i16 samples) at `frame_index` from the
    /// preloaded buffer. Panics if `frame_index >= preloaded_frames`; callers
    /// must route streamed reads through the prefetch pipe instead.
    #[inline]
    pub fn frame(&self, frame_index: u32) -> (i16, i16) {
        let ch = self.channels as usize;
        let base = frame_index as usize * ch;
        let l = self.data[base];
        let r = if ch > 1 { self.data[base + 1] } else { l };
        (l, r)
    }

    /// Select the coarsest band-limited level variant whose `max_delta`
    /// still covers `delta`, falling back to the full-rate source.
    pub fn select_level(&self, delta: u64) -> Option<&LevelVariant> {
        self.levels
            .iter()
            .filter(|lv| lv.max_delta >= delta)
            .min_by_key(|lv| lv.max_delta)
    }
}

pub type SharedWaveform = Arc<Waveform>;
