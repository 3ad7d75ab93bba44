//! cpal output stream wiring (§4.1, §5): the RT thread in this host is
//! simply whatever thread cpal calls back on. It drains host commands,
//! calls `Sampler::process`, and republishes a status snapshot for the
//! control thread to read, all directly in the callback the way the
//! teacher's own non-threaded output path does.

use std::sync::mpsc::Receiver;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{debug, error};

use calfbox_core::constants::{BLOCK_SIZE, NUM_CHANNELS};
use calfbox_engine::Sampler;

use crate::control::HostCommand;
use crate::status::SharedStatus;

pub struct AudioOutput {
    _stream: cpal::Stream,
    sample_rate: u32,
}

/// Drain pending host commands, render one cpal-sized callback's worth of
/// frames, and refresh the status snapshot. Returns the rendered stereo
/// scratch buffer, at least `frames` long.
fn render<'a>(
    sampler: &mut Sampler,
    command_rx: &Receiver<HostCommand>,
    status: &SharedStatus,
    scratch: &'a mut Vec<(f32, f32)>,
    frames: usize,
) -> &'a [(f32, f32)] {
    while let Ok(cmd) = command_rx.try_recv() {
        apply_command(sampler, cmd);
    }
    // Patches swap rarely enough that draining cleanup here, on the same
    // thread that renders, is cheaper than standing up a separate control
    // thread just to own this FIFO.
    sampler.control().drain_cleanup();

    let rounded = frames.div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    scratch.clear();
    scratch.resize(rounded, (0.0, 0.0));
    sampler.process(&[], scratch);

    let mut patches: [Option<String>; NUM_CHANNELS] = std::array::from_fn(|_| None);
    for (i, slot) in patches.iter_mut().enumerate() {
        *slot = sampler.channel(i as u8).current_program().map(|p| p.name.clone());
    }
    if let Ok(mut snap) = status.lock() {
        snap.active_voices = sampler.active_voice_count();
        snap.polyphony = sampler.polyphony();
        snap.channel_patches = patches;
    }

    &scratch[..frames]
}

fn apply_command(sampler: &mut Sampler, cmd: HostCommand) {
    match cmd {
        HostCommand::NoteOn(ch, note, vel) => sampler.note_on(ch, note, vel),
        HostCommand::NoteOff(ch, note, vel) => sampler.note_off(ch, note, vel),
        HostCommand::ControlChange(ch, controller, value) => sampler.control_change(ch, controller, value),
        HostCommand::InstallProgram(ch, program) => sampler.submit_program_change(ch, program),
        HostCommand::Polyphony(voices) => sampler.set_polyphony(voices),
    }
}

impl AudioOutput {
    pub fn new(
        mut sampler: Sampler,
        command_rx: Receiver<HostCommand>,
        status: SharedStatus,
        device_name: Option<&str>,
    ) -> anyhow::Result<Self> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| anyhow::anyhow!("no such output device: {name}"))?,
            None => host
                .default_output_device()
                .ok_or_else(|| anyhow::anyhow!("no audio output device available"))?,
        };

        let supported = device.default_output_config()?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels() as usize;
        let config = supported.config();

        let mut scratch_f32: Vec<(f32, f32)> = Vec::new();
        let mut scratch_i16: Vec<(f32, f32)> = Vec::new();
        let mut scratch_u16: Vec<(f32, f32)> = Vec::new();

        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    let block = render(&mut sampler, &command_rx, &status, &mut scratch_f32, frames);
                    for (frame, &(l, r)) in data.chunks_mut(channels).zip(block.iter()) {
                        frame[0] = l;
                        if channels > 1 {
                            frame[1] = r;
                        }
                        for s in frame.iter_mut().skip(2) {
                            *s = 0.0;
                        }
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )?,
            cpal::SampleFormat::I16 => device.build_output_stream(
                &config,
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    let block = render(&mut sampler, &command_rx, &status, &mut scratch_i16, frames);
                    for (frame, &(l, r)) in data.chunks_mut(channels).zip(block.iter()) {
                        frame[0] = (l * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        if channels > 1 {
                            frame[1] = (r * 32767.0).clamp(-32768.0, 32767.0) as i16;
                        }
                        for s in frame.iter_mut().skip(2) {
                            *s = 0;
                        }
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )?,
            cpal::SampleFormat::U16 => device.build_output_stream(
                &config,
                move |data: &mut [u16], _: &cpal::OutputCallbackInfo| {
                    let frames = data.len() / channels;
                    let block = render(&mut sampler, &command_rx, &status, &mut scratch_u16, frames);
                    for (frame, &(l, r)) in data.chunks_mut(channels).zip(block.iter()) {
                        frame[0] = ((l * 32767.0 + 32768.0).clamp(0.0, 65535.0)) as u16;
                        if channels > 1 {
                            frame[1] = ((r * 32767.0 + 32768.0).clamp(0.0, 65535.0)) as u16;
                        }
                        for s in frame.iter_mut().skip(2) {
                            *s = 32768;
                        }
                    }
                },
                |err| error!("audio stream error: {err}"),
                None,
            )?,
            other => anyhow::bail!("unsupported sample format: {other:?}"),
        };

        stream.play()?;
        debug!(sample_rate, channels, "calfbox audio stream started");

        Ok(Self { _stream: stream, sample_rate })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
