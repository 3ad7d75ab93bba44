//! The engine façade (§2, §4.1): owns the channel array, the voice pool,
//! and the RT command bridge, and exposes the single `process()` entry
//! point the host's audio callback drives.

use std::sync::Arc;

use calfbox_core::constants::{BLOCK_SIZE, MAX_VOICES_CEILING, NUM_CHANNELS};
use calfbox_rt::command::{command_bridge, ControlSide, RtCommand, RtSide};
use calfbox_rt::midi::{MidiEvent, TimedMidiEvent};
use calfbox_rt::prefetch::PrefetchPool;
use calfbox_sfz::opcodes::{LoopMode, OffMode, Trigger};
use calfbox_sfz::program::Program;

use crate::channel::Channel;
use crate::filter::SincosTable;
use crate::voice::{ModContext, VoiceArena};

pub struct Sampler {
    sample_rate: u32,
    channels: [Channel; NUM_CHANNELS],
    voices: VoiceArena,
    sincos: SincosTable,
    rng_state: u64,
    event_clock: u64,
    polyphony_cap: usize,
    prefetch_pool: PrefetchPool,
    rt: RtSide,
    control: ControlSide,
}

impl Sampler {
    pub fn new(sample_rate: u32, max_voices: usize) -> Self {
        let max_voices = max_voices.clamp(1, MAX_VOICES_CEILING);
        let (control, rt) = command_bridge(64);
        Self {
            sample_rate,
            channels: std::array::from_fn(|_| Channel::new()),
            voices: VoiceArena::with_capacity(max_voices),
            sincos: SincosTable::default(),
            rng_state: 0x9E37_79B9_7F4A_7C15,
            event_clock: 0,
            polyphony_cap: max_voices,
            prefetch_pool: PrefetchPool::new(),
            rt,
            control,
        }
    }

    pub fn control(&mut self) -> &mut ControlSide {
        &mut self.control
    }

    pub fn active_voice_count(&self) -> usize {
        self.voices.active_count()
    }

    pub fn max_voices(&self) -> usize {
        self.voices.len()
    }

    /// `/polyphony` (§6): lower the number of voices that may sound at once
    /// without reallocating the arena. The ceiling is the arena's fixed
    /// capacity, the hard slot count picked at construction.
    pub fn polyphony(&self) -> usize {
        self.polyphony_cap
    }

    pub fn set_polyphony(&mut self, voices: usize) {
        self.polyphony_cap = voices.clamp(1, self.voices.len());
    }

    pub fn channel(&self, index: u8) -> &Channel {
        &self.channels[index as usize % NUM_CHANNELS]
    }

    /// Queue a program swap for `channel` (§9's pointer-swap design): the
    /// command runs the next time `process()` drains the RT queue,
    /// installing the new `Arc` into the channel's mutex-guarded slot. The
    /// outgoing program is carried as the command's cleanup payload, so it
    /// only actually drops once the control thread calls `drain_cleanup`
    /// after the swap has been observed.
    pub fn submit_program_change(&mut self, channel: u8, new_program: Arc<Program>) {
        let slot = self.channels[channel as usize % NUM_CHANNELS].program.clone();
        let old = slot.lock().unwrap().clone();
        let mut incoming = Some(new_program);
        self.control.submit(RtCommand::pointer_swap(
            move || {
                *slot.lock().unwrap() = incoming.take();
            },
            old,
        ));
    }

    fn drain_commands(&mut self) {
        self.rt.drain_execute();
    }

    pub fn note_on(&mut self, channel: u8, note: u8, velocity: u8) {
        if velocity == 0 {
            self.note_off(channel, note, 0);
            return;
        }
        let idx = channel as usize % NUM_CHANNELS;
        self.event_clock += 1;
        self.channels[idx].key_held[note as usize] = true;
        self.channels[idx].last_on[note as usize] = (velocity, self.event_clock);
        self.trigger(idx, note, velocity, false);
        self.channels[idx].previous_note = Some(note);
    }

    pub fn note_off(&mut self, channel: u8, note: u8, _velocity: u8) {
        let idx = channel as usize % NUM_CHANNELS;
        self.channels[idx].key_held[note as usize] = false;
        if self.channels[idx].sostenuto_captured[note as usize] {
            return;
        }
        if self.channels[idx].sustain {
            return;
        }
        self.release_note(idx, note);
    }

    /// Release a held note and, if a region is registered for
    /// `trigger=release`, fire it using the velocity of the note-on that is
    /// releasing (§4.4: release layers respond to how the note was struck,
    /// not to the note-off).
    fn release_note(&mut self, idx: usize, note: u8) {
        let running = self.channels[idx].running.clone();
        for id in running {
            let voice = self.voices.get_mut(id);
            if voice.note == note && !voice.released {
                voice.release();
            }
        }
        let (on_velocity, _) = self.channels[idx].last_on[note as usize];
        self.trigger(idx, note, on_velocity, true);
    }

    pub fn control_change(&mut self, channel: u8, controller: u8, value: u8) {
        let idx = channel as usize % NUM_CHANNELS;
        self.channels[idx].cc[controller as usize] = value as f32 / 127.0;
        match controller {
            64 => self.set_sustain(idx, value >= 64),
            66 => self.set_sostenuto(idx, value >= 64),
            120 => self.all_sound_off(idx),
            121 => self.channels[idx].reset_all_controllers(),
            123 => self.all_notes_off(idx),
            _ => {}
        }
    }

    fn set_sustain(&mut self, idx: usize, held: bool) {
        let was_held = self.channels[idx].sustain;
        self.channels[idx].sustain = held;
        if was_held && !held {
            let keys: Vec<u8> = (0u8..128)
                .filter(|&k| !self.channels[idx].key_held[k as usize])
                .collect();
            for k in keys {
                self.release_note(idx, k);
            }
        }
    }

    fn set_sostenuto(&mut self, idx: usize, held: bool) {
        let was_held = self.channels[idx].sostenuto;
        self.channels[idx].sostenuto = held;
        if !was_held && held {
            for k in 0u8..128 {
                self.channels[idx].sostenuto_captured[k as usize] = self.channels[idx].key_held[k as usize];
            }
        } else if was_held && !held {
            let keys: Vec<u8> = (0u8..128)
                .filter(|&k| {
                    let captured = self.channels[idx].sostenuto_captured[k as usize];
                    captured && !self.channels[idx].key_held[k as usize]
                })
                .collect();
            for k in keys {
                self.release_note(idx, k);
            }
            self.channels[idx].sostenuto_captured = [false; 128];
        }
    }

    fn all_notes_off(&mut self, idx: usize) {
        for k in 0u8..128 {
            self.channels[idx].key_held[k as usize] = false;
        }
        let running = self.channels[idx].running.clone();
        for id in running {
            self.voices.get_mut(id).release();
        }
    }

    fn all_sound_off(&mut self, idx: usize) {
        let running = self.channels[idx].running.clone();
        for id in running {
            self.voices.get_mut(id).force_fast_release();
        }
    }

    pub fn pitch_bend(&mut self, channel: u8, value: i16) {
        self.channels[channel as usize % NUM_CHANNELS].pitch_bend = value;
    }

    pub fn poly_aftertouch(&mut self, channel: u8, note: u8, pressure: u8) {
        self.channels[channel as usize % NUM_CHANNELS].poly_aftertouch[note as usize] = pressure;
    }

    pub fn channel_aftertouch(&mut self, channel: u8, pressure: u8) {
        self.channels[channel as usize % NUM_CHANNELS].channel_aftertouch = pressure;
    }

    fn next_rng(&mut self) -> u64 {
        self.rng_state = self.rng_state.wrapping_mul(6364136223846793005).wrapping_add(1);
        self.rng_state
    }

    /// Select and start regions matching `note`/`velocity` on `channel`
    /// (§4.4, §4.5): keyswitch gating, range/cc admission, round robin,
    /// exclusive-group choke, and polyphony stealing.
    fn trigger(&mut self, idx: usize, note: u8, velocity: u8, release: bool) {
        let Some(program) = self.channels[idx].current_program() else {
            return;
        };

        let candidates = program.lookup.candidates(note, release).to_vec();
        if candidates.is_empty() {
            return;
        }

        // A note that only falls within some region's key-switch range acts
        // as a switch, not a playable trigger (§4.4's `sw_lokey`/`sw_hikey`).
        let is_keyswitch = program
            .regions
            .iter()
            .any(|r| matches!((r.sw_lokey, r.sw_hikey), (Some(lo), Some(hi)) if note >= lo && note <= hi));
        if is_keyswitch {
            return;
        }

        let rand_draw = (self.next_rng() >> 40) as f32 / (1u64 << 24) as f32;

        for region_id in candidates {
            let region = program.region(region_id);
            if velocity < region.lovel || velocity > region.hivel {
                continue;
            }
            if idx < region.lochan as usize || idx > region.hichan as usize {
                continue;
            }
            if rand_draw < region.lorand || rand_draw >= region.hirand {
                continue;
            }
            if release != (region.trigger == Trigger::Release) {
                continue;
            }
            let cc_admits = region.on_locc.iter().all(|(&cc, &lo)| {
                let value127 = (self.channels[idx].cc[cc as usize] * 127.0).round() as u8;
                let hi = region.on_hicc.get(&cc).copied().unwrap_or(127);
                value127 >= lo && value127 <= hi
            });
            if !cc_admits {
                continue;
            }
            if release {
                let db_from_peak = -(velocity as f32 / 127.0).max(1e-4).log10() * 20.0;
                if db_from_peak > calfbox_core::constants::RELEASE_TRIGGER_SILENCE_DB {
                    continue;
                }
            }

            // Every candidate advances its own round-robin counter whether
            // or not it ends up firing, so the cycle keeps moving even when
            // earlier admission checks reject this particular event.
            if !program.advance_round_robin(region_id) {
                continue;
            }

            self.start_voice(idx, note, velocity, program.clone(), region_id);
        }
    }

    fn start_voice(&mut self, idx: usize, note: u8, velocity: u8, program: Arc<Program>, region_id: u32) {
        let region = program.region(region_id);
        if let Some(group) = region.group {
            self.choke_group(group);
        }

        let under_cap = self.voices.active_count() < self.polyphony_cap;
        let voice_id = match under_cap.then(|| self.voices.alloc()).flatten() {
            Some(id) => id,
            None => {
                let Some(victim) = self.voices.find_steal_victim() else {
                    return;
                };
                let victim_channel = self.voices.get(victim).channel as usize;
                self.channels[victim_channel].remove_running(victim);
                victim
            }
        };

        let serial = self.voices.next_serial();
        let seed = self.next_rng();
        // Streamed samples (§4.2) need a background reader feeding frames
        // past the preloaded prefix; short one-shots never cross the
        // preload threshold so most notes skip this entirely.
        let prefetch = region.waveform.as_ref().filter(|w| w.is_streamed()).and_then(|w| {
            let looping = matches!(region.eff_loop_mode, LoopMode::LoopContinuous | LoopMode::LoopSustain);
            self.prefetch_pool.acquire(w.clone(), w.preloaded_frames, region.loop_start, region.loop_end, looping)
        });
        self.voices.get_mut(voice_id).start(
            idx as u8,
            note,
            velocity,
            program,
            region_id,
            self.sample_rate,
            serial,
            seed,
            prefetch,
        );
        self.channels[idx].add_running(voice_id);
    }

    /// Force-release every running voice whose region is choked by `group`
    /// (§4.4 exclusive groups), using each one's own authored `off_mode`.
    fn choke_group(&mut self, group: u32) {
        let to_choke: Vec<u32> = self
            .voices
            .iter_active()
            .filter(|(_, v)| v.layer().off_by == Some(group))
            .map(|(id, _)| id)
            .collect();
        for id in to_choke {
            let voice = self.voices.get_mut(id);
            match voice.layer().off_mode {
                OffMode::Fast => voice.force_fast_release(),
                OffMode::Normal => voice.release(),
            }
        }
    }

    /// Process `n_frames` (a multiple of `BLOCK_SIZE`) into a stereo output
    /// buffer, dispatching every MIDI event whose `frame_offset` falls
    /// within the block about to render (§4.1, §4.9).
    pub fn process(&mut self, midi_in: &[TimedMidiEvent], out: &mut [(f32, f32)]) {
        assert_eq!(out.len() % BLOCK_SIZE, 0);
        self.drain_commands();

        let mut midi_pos = 0;
        for block_start in (0..out.len()).step_by(BLOCK_SIZE) {
            while midi_pos < midi_in.len() && (midi_in[midi_pos].frame_offset as usize) < block_start + BLOCK_SIZE {
                self.dispatch_midi(&midi_in[midi_pos].event);
                midi_pos += 1;
            }
            self.process_block(&mut out[block_start..block_start + BLOCK_SIZE]);
        }
    }

    fn dispatch_midi(&mut self, event: &MidiEvent) {
        match *event {
            MidiEvent::NoteOn { channel, note, velocity } => self.note_on(channel, note, velocity),
            MidiEvent::NoteOff { channel, note, velocity } => self.note_off(channel, note, velocity),
            MidiEvent::ControlChange { channel, controller, value } => {
                self.control_change(channel, controller, value)
            }
            MidiEvent::PitchBend { channel, value } => self.pitch_bend(channel, value),
            MidiEvent::PolyAftertouch { channel, note, pressure } => self.poly_aftertouch(channel, note, pressure),
            MidiEvent::ChannelAftertouch { channel, pressure } => self.channel_aftertouch(channel, pressure),
            MidiEvent::ProgramChange { channel, program } => {
                tracing::debug!(channel, program, "MIDI program change ignored; use submit_program_change");
            }
            MidiEvent::SysEx(_) => {}
        }
    }

    fn process_block(&mut self, out: &mut [(f32, f32)]) {
        for slot in out.iter_mut() {
            *slot = (0.0, 0.0);
        }

        let active: Vec<u32> = self.voices.iter_active().map(|(id, _)| id).collect();
        let mut scratch = [(0.0f32, 0.0f32); BLOCK_SIZE];
        for id in active {
            let channel_idx = self.voices.get(id).channel as usize;
            let cc = self.channels[channel_idx].cc;
            let pitch_bend_norm = self.channels[channel_idx].pitch_bend_norm();
            let channel_aftertouch = self.channels[channel_idx].channel_aftertouch as f32 / 127.0;
            let note = self.voices.get(id).note;
            let poly_aftertouch = self.channels[channel_idx].poly_aftertouch_norm(note);
            let (bend_up, bend_down) = {
                let layer = self.voices.get(id).layer();
                (layer.bend_up, layer.bend_down)
            };
            let pitch_bend_cents = self.channels[channel_idx].pitch_bend_cents(bend_up, bend_down);

            let ctx = ModContext { cc: &cc, pitch_bend_norm, channel_aftertouch, poly_aftertouch };
            let voice = self.voices.get_mut(id);
            let still_active =
                voice.render_block(self.sample_rate, BLOCK_SIZE as u32, &ctx, pitch_bend_cents, &self.sincos, &mut scratch);

            for (dst, src) in out.iter_mut().zip(scratch.iter()) {
                dst.0 += src.0;
                dst.1 += src.1;
            }

            if !still_active {
                self.channels[channel_idx].remove_running(id);
                self.voices.free_voice(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calfbox_core::wavebank::WaveBank;
    use std::path::Path;

    fn write_test_wav(path: &Path, frames: &[i16]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in frames {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn program_with_one_region(dir: &Path) -> Arc<Program> {
        write_test_wav(&dir.join("tone.wav"), &[0, 4000, 8000, 4000, 0, -4000, -8000, -4000]);
        let mut wavebank = WaveBank::new();
        let sfz = "<region> sample=tone.wav lokey=0 hikey=127 ampeg_attack=0 ampeg_release=0.01\n";
        Arc::new(Program::load_from_sfz("t", sfz, dir.to_path_buf(), &mut wavebank, 44100))
    }

    #[test]
    fn note_on_without_a_loaded_program_is_silent_and_does_not_panic() {
        let mut sampler = Sampler::new(44100, 16);
        sampler.note_on(0, 60, 100);
        let mut out = vec![(0.0f32, 0.0f32); BLOCK_SIZE * 2];
        sampler.process(&[], &mut out);
        assert_eq!(sampler.active_voice_count(), 0);
    }

    #[test]
    fn note_on_allocates_a_voice_once_a_program_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = Sampler::new(44100, 16);
        sampler.submit_program_change(0, program_with_one_region(dir.path()));
        sampler.process(&[], &mut vec![(0.0f32, 0.0f32); BLOCK_SIZE]);
        sampler.note_on(0, 60, 100);
        assert_eq!(sampler.active_voice_count(), 1);
    }

    #[test]
    fn polyphony_cap_steals_rather_than_panicking() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = Sampler::new(44100, 2);
        sampler.submit_program_change(0, program_with_one_region(dir.path()));
        sampler.process(&[], &mut vec![(0.0f32, 0.0f32); BLOCK_SIZE]);
        for note in 60..65u8 {
            sampler.note_on(0, note, 100);
        }
        assert!(sampler.active_voice_count() <= 2);
    }

    #[test]
    fn sustain_defers_release_until_pedal_lifts() {
        let dir = tempfile::tempdir().unwrap();
        let mut sampler = Sampler::new(44100, 8);
        sampler.submit_program_change(0, program_with_one_region(dir.path()));
        sampler.process(&[], &mut vec![(0.0f32, 0.0f32); BLOCK_SIZE]);
        sampler.control_change(0, 64, 127);
        sampler.note_on(0, 60, 100);
        let running = sampler.channels[0].running.clone();
        sampler.note_off(0, 60, 0);
        assert_eq!(sampler.channels[0].running, running);
        sampler.control_change(0, 64, 0);
        for v in sampler.channels[0].running.clone() {
            assert!(sampler.voices.get(v).released);
        }
    }
}
