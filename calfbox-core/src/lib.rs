//! Primitives shared across the Calf Box sampler: block-processing
//! constants, fixed-point pitch math, waveform storage and the
//! wavebank loader, and the error types every other crate propagates.

pub mod constants;
pub mod error;
pub mod pitch;
pub mod waveform;
pub mod wavebank;

pub use constants::*;
pub use error::{CalfError, CalfResult};
pub use pitch::{FixedPos, cents_to_ratio};
pub use waveform::{LoopMeta, Waveform};
pub use wavebank::WaveBank;
