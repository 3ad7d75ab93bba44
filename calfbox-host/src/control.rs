//! The runtime control surface (§6). A real OSC transport is outside the
//! sampler's scope; this stands in for it with one command per line read
//! from stdin, addressed by the same paths the spec lists. Everything
//! that mutates the `Sampler` is marshalled onto the audio thread through
//! `commands`, mirroring the way the teacher's main thread hands
//! state to its audio-generation thread instead of locking it directly.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::SyncSender;
use std::sync::Arc;

use calfbox_sfz::program::Program;

use crate::patches::PatchRegistry;
use crate::status::SharedStatus;

pub enum HostCommand {
    NoteOn(u8, u8, u8),
    NoteOff(u8, u8, u8),
    ControlChange(u8, u8, u8),
    InstallProgram(u8, Arc<Program>),
    Polyphony(usize),
}

/// Read one control line, mutate `registry` for anything that loads or
/// enumerates patches, and forward the rest to the audio thread. Returns
/// `false` on `/quit` or end of input.
fn handle_line(
    line: &str,
    registry: &mut PatchRegistry,
    status: &SharedStatus,
    commands: &SyncSender<HostCommand>,
    out: &mut impl Write,
) -> bool {
    let mut parts = line.split_whitespace();
    let Some(path) = parts.next() else { return true };

    match path {
        "/quit" => return false,

        "/status" => {
            let snap = status.lock().unwrap().clone();
            let _ = writeln!(out, "active_voices={} polyphony={}", snap.active_voices, snap.polyphony);
            for (i, patch) in snap.channel_patches.iter().enumerate() {
                if let Some(name) = patch {
                    let _ = writeln!(out, "  channel {i}: {name}");
                }
            }
        }

        "/set_patch" => {
            let (Some(channel), Some(program_no)) = (
                parts.next().and_then(|s| s.parse::<u8>().ok()),
                parts.next().and_then(|s| s.parse::<u32>().ok()),
            ) else {
                let _ = writeln!(out, "usage: /set_patch <channel> <program_no>");
                return true;
            };
            match registry.get(program_no) {
                Some(program) => {
                    let _ = commands.send(HostCommand::InstallProgram(channel, program));
                }
                None => {
                    let _ = writeln!(out, "no such patch: {program_no}");
                }
            }
        }

        "/load_patch" => {
            let (Some(program_no), Some(sample_dir), Some(sfz_path)) = (
                parts.next().and_then(|s| s.parse::<u32>().ok()),
                parts.next().map(PathBuf::from),
                parts.next().map(PathBuf::from),
            ) else {
                let _ = writeln!(out, "usage: /load_patch <program_no> <sample_dir> <sfz_path>");
                return true;
            };
            match registry.load_from_file(program_no, sample_dir, &sfz_path) {
                Ok(_) => {
                    let _ = writeln!(out, "loaded patch {program_no}");
                }
                Err(err) => {
                    let _ = writeln!(out, "failed to load patch {program_no}: {err}");
                }
            }
        }

        "/load_patch_from_string" => {
            let Some(program_no) = parts.next().and_then(|s| s.parse::<u32>().ok()) else {
                let _ = writeln!(out, "usage: /load_patch_from_string <program_no> <sample_dir> <name> <sfz_text...>");
                return true;
            };
            let Some(sample_dir) = parts.next().map(PathBuf::from) else {
                let _ = writeln!(out, "missing sample_dir");
                return true;
            };
            let Some(name) = parts.next() else {
                let _ = writeln!(out, "missing name");
                return true;
            };
            let sfz_text = parts.collect::<Vec<_>>().join(" ");
            registry.load_from_string(program_no, sample_dir, &sfz_text, name);
            let _ = writeln!(out, "loaded patch {program_no}");
        }

        "/polyphony" => {
            let Some(voices) = parts.next().and_then(|s| s.parse::<usize>().ok()) else {
                let _ = writeln!(out, "usage: /polyphony <voices>");
                return true;
            };
            let _ = commands.send(HostCommand::Polyphony(voices));
        }

        "/patches" => {
            for (no, name) in registry.list() {
                let _ = writeln!(out, "{no}: {name}");
            }
        }

        "/noteon" => {
            if let (Some(ch), Some(note), Some(vel)) = (
                parts.next().and_then(|s| s.parse::<u8>().ok()),
                parts.next().and_then(|s| s.parse::<u8>().ok()),
                parts.next().and_then(|s| s.parse::<u8>().ok()),
            ) {
                let _ = commands.send(HostCommand::NoteOn(ch, note, vel));
            }
        }

        "/noteoff" => {
            if let (Some(ch), Some(note)) = (
                parts.next().and_then(|s| s.parse::<u8>().ok()),
                parts.next().and_then(|s| s.parse::<u8>().ok()),
            ) {
                let _ = commands.send(HostCommand::NoteOff(ch, note, 0));
            }
        }

        "/cc" => {
            if let (Some(ch), Some(controller), Some(value)) = (
                parts.next().and_then(|s| s.parse::<u8>().ok()),
                parts.next().and_then(|s| s.parse::<u8>().ok()),
                parts.next().and_then(|s| s.parse::<u8>().ok()),
            ) {
                let _ = commands.send(HostCommand::ControlChange(ch, controller, value));
            }
        }

        other => {
            let _ = writeln!(out, "unknown command: {other}");
        }
    }
    true
}

/// Run the control loop on the current thread until `/quit` or EOF.
pub fn run(mut registry: PatchRegistry, status: SharedStatus, commands: SyncSender<HostCommand>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        if !handle_line(&line, &mut registry, &status, &commands, &mut stdout) {
            break;
        }
    }
}
