//! Key/velocity/CC region lookup (§4.4).
//!
//! Partitions `0..128` into per-key candidate lists so a note-on or
//! note-off resolves its candidate regions in O(1) before the remaining
//! admission predicates (velocity, random, CC window, key-switch, round
//! robin) are evaluated linearly by the engine, which alone holds the
//! live channel state those predicates need.

use crate::layer::FinalizedLayer;
use crate::opcodes::Trigger;

pub struct RegionLookup {
    /// Candidate region ids per MIDI key, for non-release triggers.
    pub attack_zones: Vec<Vec<u32>>,
    /// Candidate region ids per MIDI key, for `trigger=release` regions.
    pub release_zones: Vec<Vec<u32>>,
    /// Regions with a nonempty `on_locc`/`on_hicc` window.
    pub cc_triggered: Vec<u32>,
    /// Regions that declare `sw_lokey`/`sw_hikey` and therefore participate
    /// in key-switch `last_key` tracking regardless of whether they are
    /// the one triggered.
    pub keyswitch_regions: Vec<u32>,
}

impl RegionLookup {
    pub fn build(regions: &[FinalizedLayer]) -> Self {
        let mut attack_zones = vec![Vec::new(); 128];
        let mut release_zones = vec![Vec::new(); 128];
        let mut cc_triggered = Vec::new();
        let mut keyswitch_regions = Vec::new();

        for (id, region) in regions.iter().enumerate() {
            let id = id as u32;
            let zones = if region.trigger == Trigger::Release {
                &mut release_zones
            } else {
                &mut attack_zones
            };
            for key in region.lokey..=region.hikey {
                zones[key as usize].push(id);
            }
            if !region.on_locc.is_empty() || !region.on_hicc.is_empty() {
                cc_triggered.push(id);
            }
            if region.sw_lokey.is_some() || region.sw_hikey.is_some() {
                keyswitch_regions.push(id);
            }
        }

        Self {
            attack_zones,
            release_zones,
            cc_triggered,
            keyswitch_regions,
        }
    }

    pub fn candidates(&self, key: u8, release: bool) -> &[u32] {
        let zones = if release { &self.release_zones } else { &self.attack_zones };
        zones.get(key as usize).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::FinalizedLayer;
    use crate::opcodes::RegionOpcodes;

    fn region(lokey: u8, hikey: u8, trigger: Trigger) -> FinalizedLayer {
        let mut o = RegionOpcodes {
            lokey: Some(lokey),
            hikey: Some(hikey),
            trigger: Some(trigger),
            ..Default::default()
        };
        o.trigger = Some(trigger);
        FinalizedLayer::finalize(&o, 44100, None)
    }

    #[test]
    fn partitions_by_trigger() {
        let regions = vec![
            region(60, 60, Trigger::Attack),
            region(60, 60, Trigger::Release),
        ];
        let lookup = RegionLookup::build(&regions);
        assert_eq!(lookup.candidates(60, false), &[0]);
        assert_eq!(lookup.candidates(60, true), &[1]);
        assert!(lookup.candidates(61, false).is_empty());
    }
}
