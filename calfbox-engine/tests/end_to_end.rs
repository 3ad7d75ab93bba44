//! End-to-end scenarios driving the `Sampler` façade the way a host would:
//! one-shot playback, exclusive-group choke, release triggers, and program
//! swap via the RT command bridge (§8).

use std::path::Path;
use std::sync::Arc;

use calfbox_core::constants::BLOCK_SIZE;
use calfbox_core::wavebank::WaveBank;
use calfbox_engine::Sampler;
use calfbox_sfz::program::Program;

fn write_tone(path: &Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 44100,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let sample = ((i as f32 * 0.2).sin() * 8000.0) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

fn load_program(dir: &Path, sfz: &str) -> Arc<Program> {
    let mut wavebank = WaveBank::new();
    Arc::new(Program::load_from_sfz("t", sfz, dir.to_path_buf(), &mut wavebank, 44100))
}

fn run_blocks(sampler: &mut Sampler, blocks: usize) {
    let mut out = vec![(0.0f32, 0.0f32); BLOCK_SIZE * blocks];
    sampler.process(&[], &mut out);
}

#[test]
fn single_region_one_shot_plays_and_frees_itself() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("tone.wav"), 64);
    let program = load_program(
        dir.path(),
        "<region> sample=tone.wav lokey=0 hikey=127 ampeg_attack=0 ampeg_release=0.01\n",
    );

    let mut sampler = Sampler::new(44100, 16);
    sampler.submit_program_change(0, program);
    run_blocks(&mut sampler, 1);

    sampler.note_on(0, 60, 100);
    assert_eq!(sampler.active_voice_count(), 1);

    run_blocks(&mut sampler, 200);
    assert_eq!(sampler.active_voice_count(), 0);
}

#[test]
fn exclusive_group_chokes_the_previous_voice() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("tone.wav"), 4096);
    let program = load_program(
        dir.path(),
        "<region> sample=tone.wav lokey=0 hikey=127 group=1 off_by=1 ampeg_release=1\n",
    );

    let mut sampler = Sampler::new(44100, 16);
    sampler.submit_program_change(0, program);
    run_blocks(&mut sampler, 1);

    sampler.note_on(0, 60, 100);
    assert_eq!(sampler.active_voice_count(), 1);

    sampler.note_on(0, 61, 100);
    assert_eq!(sampler.active_voice_count(), 2);
    assert!(sampler.channel(0).running.iter().any(|_| true));
}

#[test]
fn release_trigger_fires_on_note_off_with_note_on_velocity() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("hit.wav"), 256);
    write_tone(&dir.path().join("rel.wav"), 256);
    let program = load_program(
        dir.path(),
        "<region> sample=hit.wav lokey=60 hikey=60 ampeg_release=1\n\
         <region> sample=rel.wav lokey=60 hikey=60 trigger=release ampeg_release=1\n",
    );

    let mut sampler = Sampler::new(44100, 16);
    sampler.submit_program_change(0, program);
    run_blocks(&mut sampler, 1);

    sampler.note_on(0, 60, 100);
    assert_eq!(sampler.active_voice_count(), 1);

    sampler.note_off(0, 60, 0);
    assert_eq!(sampler.active_voice_count(), 2);
}

#[test]
fn sustain_pedal_holds_release_and_replays_after_lift() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("tone.wav"), 4096);
    let program = load_program(dir.path(), "<region> sample=tone.wav lokey=0 hikey=127 ampeg_release=2\n");

    let mut sampler = Sampler::new(44100, 16);
    sampler.submit_program_change(0, program);
    run_blocks(&mut sampler, 1);

    sampler.control_change(0, 64, 127);
    sampler.note_on(0, 60, 100);
    sampler.note_off(0, 60, 0);
    assert_eq!(sampler.active_voice_count(), 1);

    sampler.control_change(0, 64, 0);
    run_blocks(&mut sampler, 400);
    assert_eq!(sampler.active_voice_count(), 0);
}

#[test]
fn program_change_swaps_the_channel_patch() {
    let dir = tempfile::tempdir().unwrap();
    write_tone(&dir.path().join("a.wav"), 64);
    write_tone(&dir.path().join("b.wav"), 64);
    let a = load_program(dir.path(), "<region> sample=a.wav lokey=0 hikey=127\n");
    let b = load_program(dir.path(), "<region> sample=b.wav lokey=0 hikey=127\n");

    let mut sampler = Sampler::new(44100, 8);
    sampler.submit_program_change(0, a);
    run_blocks(&mut sampler, 1);
    sampler.note_on(0, 60, 100);
    assert_eq!(sampler.active_voice_count(), 1);

    sampler.submit_program_change(0, b);
    run_blocks(&mut sampler, 1);
    sampler.note_on(0, 62, 100);
    assert_eq!(sampler.active_voice_count(), 2);
}
