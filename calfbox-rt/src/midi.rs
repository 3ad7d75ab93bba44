//! MIDI event types (§6): standard 3-byte messages, 14-bit CC composition
//! from MSB/LSB pairs, and SysEx up to a fixed buffer cap.

use smallvec::SmallVec;

/// SysEx payloads beyond this size are truncated with a warning; real-world
/// sampler control SysEx (e.g. bulk dumps) is out of scope (§1).
pub const SYSEX_CAP: usize = 256;

#[derive(Clone, Debug, PartialEq)]
pub enum MidiEvent {
    NoteOff { channel: u8, note: u8, velocity: u8 },
    NoteOn { channel: u8, note: u8, velocity: u8 },
    PolyAftertouch { channel: u8, note: u8, pressure: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelAftertouch { channel: u8, pressure: u8 },
    /// 14-bit signed bend, -8192..=8191, 0 at center.
    PitchBend { channel: u8, value: i16 },
    SysEx(SmallVec<[u8; 32]>),
}

impl MidiEvent {
    pub fn channel(&self) -> Option<u8> {
        match self {
            MidiEvent::NoteOff { channel, .. }
            | MidiEvent::NoteOn { channel, .. }
            | MidiEvent::PolyAftertouch { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::ChannelAftertouch { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => Some(*channel),
            MidiEvent::SysEx(_) => None,
        }
    }

    /// Parse one standard 3-byte (or shorter) message. Returns `None` for
    /// realtime/system bytes this sampler does not act on.
    pub fn from_bytes(status: u8, data1: u8, data2: u8) -> Option<Self> {
        let channel = status & 0x0f;
        match status & 0xf0 {
            0x80 => Some(MidiEvent::NoteOff { channel, note: data1, velocity: data2 }),
            0x90 => {
                if data2 == 0 {
                    Some(MidiEvent::NoteOff { channel, note: data1, velocity: 0 })
                } else {
                    Some(MidiEvent::NoteOn { channel, note: data1, velocity: data2 })
                }
            }
            0xa0 => Some(MidiEvent::PolyAftertouch { channel, note: data1, pressure: data2 }),
            0xb0 => Some(MidiEvent::ControlChange { channel, controller: data1, value: data2 }),
            0xc0 => Some(MidiEvent::ProgramChange { channel, program: data1 }),
            0xd0 => Some(MidiEvent::ChannelAftertouch { channel, pressure: data1 }),
            0xe0 => {
                let raw = (data1 as i32) | ((data2 as i32) << 7);
                Some(MidiEvent::PitchBend { channel, value: (raw - 8192) as i16 })
            }
            _ => None,
        }
    }

    pub fn sysex(data: &[u8]) -> Self {
        if data.len() > SYSEX_CAP {
            tracing::warn!("SysEx message of {} bytes truncated to {SYSEX_CAP}", data.len());
        }
        MidiEvent::SysEx(SmallVec::from_slice(&data[..data.len().min(SYSEX_CAP)]))
    }
}

/// Compose a 14-bit CC value from an MSB/LSB pair (e.g. CC0/CC32).
pub fn compose_14bit(msb: u8, lsb: u8) -> u16 {
    ((msb as u16) << 7) | lsb as u16
}

/// One MIDI event timestamped by frame offset within the current block
/// (§4.9: "MIDI buffer entries are timestamped by frame-offset within a
/// block but this sampler processes them at block granularity").
#[derive(Clone, Debug, PartialEq)]
pub struct TimedMidiEvent {
    pub frame_offset: u32,
    pub event: MidiEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_with_zero_velocity_is_note_off() {
        let ev = MidiEvent::from_bytes(0x90, 60, 0).unwrap();
        assert_eq!(ev, MidiEvent::NoteOff { channel: 0, note: 60, velocity: 0 });
    }

    #[test]
    fn pitch_bend_centers_at_zero() {
        let ev = MidiEvent::from_bytes(0xe0, 0, 64).unwrap();
        assert_eq!(ev, MidiEvent::PitchBend { channel: 0, value: 0 });
    }

    #[test]
    fn composes_14_bit_cc() {
        assert_eq!(compose_14bit(0x7f, 0x7f), 0x3fff);
        assert_eq!(compose_14bit(0, 0), 0);
    }

    #[test]
    fn sysex_truncates_past_cap() {
        let data = vec![0xf0u8; SYSEX_CAP + 10];
        let ev = MidiEvent::sysex(&data);
        match ev {
            MidiEvent::SysEx(bytes) => assert_eq!(bytes.len(), SYSEX_CAP),
            _ => panic!("expected sysex"),
        }
    }
}
