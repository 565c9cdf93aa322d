//! Cross-replicate distribution statistics over metric maps.

use std::collections::BTreeMap;

use serde::Serialize;

/// Distribution of one metric across N replicate runs.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistStats {
    pub n: usize,
    pub min: f64,
    pub p5: f64,
    pub p50: f64,
    pub p95: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// Linear-interpolated percentiles plus sample mean and standard deviation.
pub fn percentile_stats(values: &mut [f64]) -> Option<DistStats> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let n = values.len();

    let interp = |p: f64| -> f64 {
        let h = p * (n - 1) as f64;
        let lo = h.floor() as usize;
        let hi = (lo + 1).min(n - 1);
        let frac = h - lo as f64;
        values[lo] * (1.0 - frac) + values[hi] * frac
    };

    let mean = values.iter().sum::<f64>() / n as f64;
    let variance = if n > 1 {
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
    } else {
        0.0
    };

    Some(DistStats {
        n,
        min: values[0],
        p5: interp(0.05),
        p50: interp(0.50),
        p95: interp(0.95),
        max: values[n - 1],
        mean,
        std_dev: variance.sqrt(),
    })
}

/// Summarize every metric present in all runs. Keys missing from any run are
/// dropped rather than summarized over a partial sample.
pub fn summarize(runs: &[BTreeMap<String, f64>]) -> BTreeMap<String, DistStats> {
    let Some(first) = runs.first() else {
        return BTreeMap::new();
    };
    let mut out = BTreeMap::new();
    for key in first.keys() {
        let mut values: Vec<f64> = runs.iter().filter_map(|r| r.get(key).copied()).collect();
        if values.len() != runs.len() {
            log::debug!("metric {key} missing from {} runs; skipped", runs.len() - values.len());
            continue;
        }
        if let Some(stats) = percentile_stats(&mut values) {
            out.insert(key.clone(), stats);
        }
    }
    out
}
