//! The program registry behind `/load_patch`, `/load_patch_from_string`,
//! and `/patches` (§6). Loading is control-thread work: it allocates
//! freely and only ever hands the RT side a finished `Arc<Program>` to
//! install (§5, §9).

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use calfbox_core::wavebank::WaveBank;
use calfbox_sfz::program::Program;
use hashbrown::HashMap;

pub struct PatchRegistry {
    wavebank: WaveBank,
    patches: HashMap<u32, Arc<Program>>,
    sample_rate: u32,
}

impl PatchRegistry {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            wavebank: WaveBank::new(),
            patches: HashMap::new(),
            sample_rate,
        }
    }

    pub fn load_from_file(
        &mut self,
        program_no: u32,
        sample_dir: PathBuf,
        sfz_path: &Path,
    ) -> anyhow::Result<Arc<Program>> {
        let text = fs::read_to_string(sfz_path)?;
        let name = sfz_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("patch")
            .to_string();
        Ok(self.load_from_string(program_no, sample_dir, &text, &name))
    }

    pub fn load_from_string(
        &mut self,
        program_no: u32,
        sample_dir: PathBuf,
        sfz_text: &str,
        name: &str,
    ) -> Arc<Program> {
        let program = Arc::new(Program::load_from_sfz(
            name,
            sfz_text,
            sample_dir,
            &mut self.wavebank,
            self.sample_rate,
        ));
        self.patches.insert(program_no, program.clone());
        program
    }

    pub fn get(&self, program_no: u32) -> Option<Arc<Program>> {
        self.patches.get(&program_no).cloned()
    }

    pub fn list(&self) -> Vec<(u32, String)> {
        let mut entries: Vec<(u32, String)> = self
            .patches
            .iter()
            .map(|(&no, program)| (no, program.name.clone()))
            .collect();
        entries.sort_by_key(|(no, _)| *no);
        entries
    }
}
