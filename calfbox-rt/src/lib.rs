//! The real-time scheduling glue between the non-RT control thread and the
//! RT audio thread (§4.11, §4.12, §5): the execute/cleanup command bridge,
//! MIDI event types and merger, and the prefetch pipe pool.

pub mod command;
pub mod merger;
pub mod midi;
pub mod prefetch;

pub use command::{command_bridge, ControlSide, RtCommand, RtSide};
pub use merger::MidiMerger;
pub use midi::{MidiEvent, TimedMidiEvent, SYSEX_CAP};
pub use prefetch::{PrefetchHandle, PrefetchPool};
