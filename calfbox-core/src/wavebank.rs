//! The wavebank: loads each sample path once and shares the result.
//!
//! Resolution order matches §6: `default_path` (from `<control>`), then the
//! program's `sample_dir`, then a tar-backed bank (kept as an external
//! collaborator — see `CalfError::Resource` when no tar support is wired).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use hashbrown::HashMap;

use crate::constants::PRELOAD_THRESHOLD_FRAMES;
use crate::error::{CalfError, CalfResult};
use crate::waveform::{LoopMeta, Waveform};

/// Where a region's `sample=` path should be resolved against.
#[derive(Clone, Debug, Default)]
pub struct SampleSearchPath {
    pub default_path: Option<PathBuf>,
    pub sample_dir: PathBuf,
    /// Set when a tar-backed bank was configured; this spec does not
    /// implement reading from it (§1 Non-goals / external collaborators),
    /// but the lookup order still checks it last so callers get a precise
    /// "no tar support" error rather than a silent miss.
    pub tar_ref: Option<PathBuf>,
}

pub struct WaveBank {
    cache: HashMap<PathBuf, Arc<Waveform>>,
}

impl WaveBank {
    pub fn new() -> Self {
        Self {
            cache: HashMap::new(),
        }
    }

    /// Resolve and load `sample` relative to `search`, returning the shared
    /// waveform. Called only from the control thread (§5).
    pub fn load(&mut self, sample: &str, search: &SampleSearchPath) -> CalfResult<Arc<Waveform>> {
        let resolved = self.resolve_path(sample, search)?;
        if let Some(w) = self.cache.get(&resolved) {
            return Ok(w.clone());
        }
        let waveform = Arc::new(load_wav(&resolved)?);
        self.cache.insert(resolved, waveform.clone());
        Ok(waveform)
    }

    fn resolve_path(&self, sample: &str, search: &SampleSearchPath) -> CalfResult<PathBuf> {
        let rel = Path::new(sample);
        if let Some(default_path) = &search.default_path {
            let candidate = default_path.join(rel);
            if candidate.is_file() {
                return Ok(candidate);
            }
        }
        let candidate = search.sample_dir.join(rel);
        if candidate.is_file() {
            return Ok(candidate);
        }
        if search.tar_ref.is_some() {
            return Err(CalfError::Resource {
                path: sample.to_string(),
                message: "tar-backed sample banks are not implemented by this engine".into(),
            });
        }
        Err(CalfError::Resource {
            path: sample.to_string(),
            message: "sample not found in default_path or sample_dir".into(),
        })
    }

    pub fn loaded_count(&self) -> usize {
        self.cache.len()
    }
}

impl Default for WaveBank {
    fn default() -> Self {
        Self::new()
    }
}

fn load_wav(path: &Path) -> CalfResult<Waveform> {
    let mut reader = hound::WavReader::open(path).map_err(|e| CalfError::Resource {
        path: path.display().to_string(),
        message: format!("{e}"),
    })?;
    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(CalfError::Resource {
            path: path.display().to_string(),
            message: "only 16-bit PCM WAV is supported in this cut".into(),
        });
    }
    let channels = spec.channels as u8;
    let samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| CalfError::Resource {
            path: path.display().to_string(),
            message: format!("{e}"),
        })?;
    let total_frames = (samples.len() / channels as usize) as u32;
    let preloaded_frames = total_frames.min(PRELOAD_THRESHOLD_FRAMES);

    Ok(Waveform {
        data: samples,
        channels,
        sample_rate: spec.sample_rate,
        total_frames,
        preloaded_frames,
        loop_meta: read_smpl_loop(path),
        levels: Vec::new(),
        source_path: path.to_path_buf(),
    })
}

/// hound does not expose the `smpl` chunk; real loop points come from SFZ
/// opcodes in this engine (§3), so native WAV loop metadata is best-effort
/// and absent unless a future decoder surfaces it.
fn read_smpl_loop(_path: &Path) -> Option<LoopMeta> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_wav(path: &Path, frames: &[i16], channels: u16, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for s in frames {
            writer.write_sample(*s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn loads_and_caches_by_resolved_path() {
        let dir = tempfile::tempdir().unwrap();
        let wav_path = dir.path().join("one.wav");
        write_test_wav(&wav_path, &[0, 1000, -1000, 500], 1, 44100);

        let mut bank = WaveBank::new();
        let search = SampleSearchPath {
            default_path: None,
            sample_dir: dir.path().to_path_buf(),
            tar_ref: None,
        };
        let w1 = bank.load("one.wav", &search).unwrap();
        assert_eq!(w1.total_frames, 4);
        assert_eq!(w1.channels, 1);
        assert_eq!(bank.loaded_count(), 1);

        let w2 = bank.load("one.wav", &search).unwrap();
        assert!(Arc::ptr_eq(&w1, &w2));
    }

    #[test]
    fn missing_sample_is_resource_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut bank = WaveBank::new();
        let search = SampleSearchPath {
            default_path: None,
            sample_dir: dir.path().to_path_buf(),
            tar_ref: None,
        };
        let err = bank.load("missing.wav", &search).unwrap_err();
        assert!(matches!(err, CalfError::Resource { .. }));
    }
}
