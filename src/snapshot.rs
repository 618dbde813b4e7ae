//! Frame-series pool and YAML snapshot output.
//!
//! The DSP graph taps per-frame values (instrument energies, gate
//! outputs) into a pool; at shutdown the pool is aggregated and written
//! as YAML for offline inspection.

use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

use serde::Serialize;

/// Accumulates named per-frame series during a run.
#[derive(Debug, Default, Clone)]
pub struct FramePool {
    series: BTreeMap<String, Vec<f32>>,
}

impl FramePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: &str, value: f32) {
        self.series.entry(key.to_string()).or_default().push(value);
    }

    pub fn get(&self, key: &str) -> Option<&[f32]> {
        self.series.get(key).map(|v| v.as_slice())
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.series.keys()
    }
}

#[derive(Debug, Serialize)]
struct SeriesSummary {
    mean: f32,
    var: f32,
    min: f32,
    max: f32,
    frames: Vec<f32>,
}

fn summarize(frames: &[f32]) -> SeriesSummary {
    let n = frames.len().max(1) as f32;
    let mean = frames.iter().sum::<f32>() / n;
    let var = frames.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / n;
    let min = frames.iter().copied().fold(f32::INFINITY, f32::min);
    let max = frames.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    SeriesSummary {
        mean,
        var,
        min: if frames.is_empty() { 0.0 } else { min },
        max: if frames.is_empty() { 0.0 } else { max },
        frames: frames.to_vec(),
    }
}

/// Write the pooled series with per-series aggregates as YAML.
pub fn write_snapshot<P: AsRef<Path>>(path: P, pool: &FramePool) -> io::Result<()> {
    let summary: BTreeMap<&String, SeriesSummary> = pool
        .series
        .iter()
        .map(|(key, frames)| (key, summarize(frames)))
        .collect();

    let file = File::create(path)?;
    serde_yaml::to_writer(file, &summary).map_err(io::Error::other)
}
