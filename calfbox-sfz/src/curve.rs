//! 128-point lookup curves: MIDI-curve tables selectable by modulation
//! `curve_id` (§3, §4.10 `<curve>` header), and the velocity-curve
//! expansion used during finalization (§4.3 step 3).

use hashbrown::HashMap;

#[derive(Clone, Debug)]
pub struct Curve128 {
    pub points: [f32; 128],
}

impl Default for Curve128 {
    fn default() -> Self {
        // Identity curve: value i/127 at index i, matching the MIDI
        // CC default mapping when no `<curve>` is selected.
        let mut points = [0.0; 128];
        for (i, p) in points.iter_mut().enumerate() {
            *p = i as f32 / 127.0;
        }
        Self { points }
    }
}

impl Curve128 {
    pub fn from_sparse(entries: &HashMap<u8, f32>) -> Self {
        build_dense_128(entries, Interp::Linear, 0.0, 1.0)
    }

    pub fn get(&self, index: u8) -> f32 {
        self.points[index as usize]
    }
}

#[derive(Clone, Copy)]
pub enum Interp {
    Linear,
    Quadratic,
}

/// Expand sparse `{index: value}` points into a dense 128-point curve
/// (§4.3 step 3). Index 0 defaults to `default_lo` and index 127 to
/// `default_hi` unless explicitly overridden.
pub fn build_dense_128(
    entries: &HashMap<u8, f32>,
    interp: Interp,
    default_lo: f32,
    default_hi: f32,
) -> Curve128 {
    let mut points = [f32::NAN; 128];
    for (&idx, &val) in entries {
        if (idx as usize) < 128 {
            points[idx as usize] = val;
        }
    }
    if points[0].is_nan() {
        points[0] = default_lo;
    }
    if points[127].is_nan() {
        points[127] = default_hi;
    }

    // Fill gaps by interpolating between the nearest declared neighbors.
    let mut i = 0usize;
    while i < 128 {
        if !points[i].is_nan() {
            i += 1;
            continue;
        }
        let lo = i - 1; // always valid: index 0 was seeded above
        let mut hi = i + 1;
        while hi < 128 && points[hi].is_nan() {
            hi += 1;
        }
        let hi = hi.min(127);
        let lo_v = points[lo];
        let hi_v = points[hi];
        for j in i..=hi {
            if j == hi && !points[hi].is_nan() {
                continue;
            }
            let t = (j - lo) as f32 / (hi - lo).max(1) as f32;
            let t = match interp {
                Interp::Linear => t,
                Interp::Quadratic => t * t,
            };
            points[j] = lo_v + (hi_v - lo_v) * t;
        }
        i = hi + 1;
    }
    Curve128 { points }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_curve_endpoints() {
        let c = Curve128::from_sparse(&HashMap::new());
        assert_eq!(c.get(0), 0.0);
        assert!((c.get(127) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn interpolates_between_declared_points() {
        let mut entries = HashMap::new();
        entries.insert(0u8, 0.0);
        entries.insert(64u8, 0.5);
        entries.insert(127u8, 1.0);
        let c = Curve128::from_sparse(&entries);
        assert!((c.get(32) - 0.25).abs() < 0.02);
    }
}
