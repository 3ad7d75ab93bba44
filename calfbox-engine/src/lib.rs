//! The audio/MIDI rendering engine: per-channel MIDI state, the voice
//! pool, envelope/LFO/filter runtimes, and the `Sampler` façade that ties
//! them together behind a single `process()` call (§2, §4).

pub mod channel;
pub mod envelope;
pub mod filter;
pub mod lfo;
pub mod sampler;
pub mod voice;

pub use channel::Channel;
pub use sampler::Sampler;
pub use voice::{Voice, VoiceArena};
