//! `/status`'s snapshot (§6): written by the audio callback once per
//! block, read by the control thread without ever touching the `Sampler`
//! itself.

use std::sync::{Arc, Mutex};

use calfbox_core::constants::NUM_CHANNELS;

#[derive(Clone)]
pub struct StatusSnapshot {
    pub active_voices: usize,
    pub polyphony: usize,
    pub channel_patches: [Option<String>; NUM_CHANNELS],
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            active_voices: 0,
            polyphony: 0,
            channel_patches: std::array::from_fn(|_| None),
        }
    }
}

pub type SharedStatus = Arc<Mutex<StatusSnapshot>>;
