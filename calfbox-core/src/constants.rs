//! Engine-wide constants.

/// Canonical processing block size in frames. `process()` always receives
/// a frame count that is a multiple of this.
pub const BLOCK_SIZE: usize = 16;

/// Number of MIDI channels the engine tracks.
pub const NUM_CHANNELS: usize = 16;

/// Number of MIDI CC numbers per channel.
pub const NUM_CCS: usize = 128;

/// Default polyphony cap; adjustable at runtime via `/polyphony`.
pub const DEFAULT_MAX_VOICES: usize = 256;

/// Absolute ceiling on runtime-adjustable polyphony.
pub const MAX_VOICES_CEILING: usize = 4096;

/// Sentinel for "this voice does not loop".
pub const LOOP_SENTINEL: u32 = u32::MAX;

/// Release-time attenuation (dB) beyond which a release-trigger region
/// is considered inaudible and skipped (§4.4).
pub const RELEASE_TRIGGER_SILENCE_DB: f32 = 84.0;

/// Absolute linear gain ceiling applied after all modulation (§4.6).
pub const GAIN_CEILING: f32 = 2.0;

/// Fast-release envelope stage id, used by voice steal and `off_mode=fast` (§4.7).
pub const FAST_RELEASE_STAGE: usize = 15;

/// Number of blocks the fast-release ramp takes to reach zero.
pub const FAST_RELEASE_BLOCKS: u32 = 8;

/// Frames a prefetch pipe's streaming buffer holds before the reader thread refills.
pub const PREFETCH_BUFFER_FRAMES: usize = 16384;

/// Number of prefetch pipes kept in the pool.
pub const PREFETCH_POOL_SIZE: usize = 32;

/// Samples above which a waveform is streamed rather than fully preloaded.
pub const PRELOAD_THRESHOLD_FRAMES: u32 = 262_144;
