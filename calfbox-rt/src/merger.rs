//! MIDI merger (§4.12): combine N input buffers, each already in
//! timestamp order, into one output buffer in time order.

use crate::midi::TimedMidiEvent;

pub struct MidiMerger {
    positions: Vec<usize>,
}

impl MidiMerger {
    pub fn new() -> Self {
        Self { positions: Vec::new() }
    }

    /// Merge `inputs` (each already sorted by `frame_offset`) into one
    /// timestamp-ordered sequence. Repeatedly picks the smallest current
    /// timestamp across all inputs and advances that input's read position,
    /// matching the source's "scan everyone, copy, advance" loop exactly.
    pub fn merge<'a>(&mut self, inputs: &[&'a [TimedMidiEvent]]) -> Vec<TimedMidiEvent> {
        self.positions.clear();
        self.positions.resize(inputs.len(), 0);

        let total: usize = inputs.iter().map(|i| i.len()).sum();
        let mut out = Vec::with_capacity(total);

        loop {
            let mut best: Option<(usize, u32)> = None;
            for (i, input) in inputs.iter().enumerate() {
                if let Some(ev) = input.get(self.positions[i]) {
                    if best.is_none_or(|(_, ts)| ev.frame_offset < ts) {
                        best = Some((i, ev.frame_offset));
                    }
                }
            }
            let Some((winner, _)) = best else { break };
            out.push(inputs[winner][self.positions[winner]].clone());
            self.positions[winner] += 1;
        }

        out
    }
}

impl Default for MidiMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::MidiEvent;

    fn ev(frame_offset: u32, note: u8) -> TimedMidiEvent {
        TimedMidiEvent {
            frame_offset,
            event: MidiEvent::NoteOn { channel: 0, note, velocity: 100 },
        }
    }

    #[test]
    fn merges_two_inputs_in_time_order() {
        let a = vec![ev(0, 1), ev(5, 2), ev(10, 3)];
        let b = vec![ev(2, 4), ev(6, 5)];
        let mut merger = MidiMerger::new();
        let merged = merger.merge(&[&a, &b]);
        let notes: Vec<u8> = merged
            .iter()
            .map(|e| match e.event {
                MidiEvent::NoteOn { note, .. } => note,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(notes, vec![1, 4, 2, 5, 3]);
    }

    #[test]
    fn empty_inputs_merge_to_empty() {
        let mut merger = MidiMerger::new();
        let merged: Vec<TimedMidiEvent> = merger.merge(&[]);
        assert!(merged.is_empty());
    }
}
