//! JSON-lines hit/prediction log sink for offline analysis.
//!
//! One logger instance is built by the composition root and handed to the
//! sinks that need it; there is no process-wide registry. Writers share an
//! internal mutex around a buffered file handle, and every record is
//! flushed so a crash loses nothing.
//!
//! If the log file cannot be opened the sink disables itself and the
//! pipeline continues.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::instrument::Instrument;
use crate::predict::PredictionHit;

#[derive(Serialize)]
struct HitRecord<'a> {
    frame: u64,
    audio_time: f32,
    wall_time_ms: i64,
    wall_time_rel: f64,
    #[serde(rename = "type")]
    kind: &'static str,
    instrument: &'a str,
    value: f32,
}

#[derive(Serialize)]
struct PredictionRecord<'a> {
    frame: u64,
    audio_time: f32,
    wall_time_ms: i64,
    wall_time_rel: f64,
    #[serde(rename = "type")]
    kind: &'static str,
    instrument: &'a str,
    predicted_time: f32,
    confidence: f32,
    ci_low: f32,
    ci_high: f32,
    hit_index: u32,
}

pub struct HitLogger {
    file: Option<Mutex<BufWriter<File>>>,
    path: PathBuf,
    sample_rate: f32,
    hop_size: usize,
    start: Instant,
}

impl HitLogger {
    /// Open a timestamped log file under `dir` (created if missing).
    pub fn new(sample_rate: f32, hop_size: usize, dir: &str) -> Self {
        let path = Self::timestamped_path(dir);
        let file = match Self::open(dir, &path, sample_rate, hop_size) {
            Ok(writer) => {
                log::info!("[HitLogger] writing to {:?}", path);
                Some(Mutex::new(writer))
            }
            Err(err) => {
                log::warn!(
                    "[HitLogger] failed to open {:?} ({}); logging disabled",
                    path,
                    err
                );
                None
            }
        };
        Self {
            file,
            path,
            sample_rate,
            hop_size,
            start: Instant::now(),
        }
    }

    /// A logger that writes nowhere (logging disabled by configuration).
    pub fn disabled() -> Self {
        Self {
            file: None,
            path: PathBuf::new(),
            sample_rate: 0.0,
            hop_size: 0,
            start: Instant::now(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    fn open(
        dir: &str,
        path: &PathBuf,
        sample_rate: f32,
        hop_size: usize,
    ) -> std::io::Result<BufWriter<File>> {
        fs::create_dir_all(dir)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(writer, "# Hit and Prediction Log")?;
        writeln!(writer, "# Sample Rate: {} Hz", sample_rate as u32)?;
        writeln!(writer, "# Hop Size: {} samples", hop_size)?;
        writeln!(writer, "# Format: JSON Lines (one object per line)")?;
        writer.flush()?;
        Ok(writer)
    }

    fn timestamped_path(dir: &str) -> PathBuf {
        // hits_predictions_<YYYYMMDD>_<HHMMSS>.log, derived from the Unix
        // clock without a timezone database (civil date from days since
        // epoch, UTC).
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let (date, time) = format_utc(now);
        PathBuf::from(dir).join(format!("hits_predictions_{}_{}.log", date, time))
    }

    fn audio_time(&self, frame: u64) -> f32 {
        frame as f32 * self.hop_size as f32 / self.sample_rate
    }

    fn wall_times(&self) -> (i64, f64) {
        let wall_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);
        (wall_ms, self.start.elapsed().as_secs_f64())
    }

    /// Log a gate firing. Values below 0.5 are ignored.
    pub fn log_gate_value(&self, instrument: Instrument, value: f32, frame: u64) {
        if value < 0.5 {
            return;
        }
        let Some(file) = &self.file else { return };

        let (wall_time_ms, wall_time_rel) = self.wall_times();
        let record = HitRecord {
            frame,
            audio_time: self.audio_time(frame),
            wall_time_ms,
            wall_time_rel,
            kind: "hit",
            instrument: instrument.name(),
            value,
        };
        self.write_record(file, &record);
    }

    /// Log every projected hit of a snapshot, one record each.
    pub fn log_predictions(
        &self,
        frame: u64,
        current_time: f32,
        per_channel: &[(Instrument, &[PredictionHit])],
    ) {
        let Some(file) = &self.file else { return };
        let (wall_time_ms, wall_time_rel) = self.wall_times();

        for (instrument, hits) in per_channel {
            for hit in hits.iter() {
                let record = PredictionRecord {
                    frame,
                    audio_time: current_time,
                    wall_time_ms,
                    wall_time_rel,
                    kind: "prediction",
                    instrument: instrument.name(),
                    predicted_time: hit.t_pred_sec,
                    confidence: hit.confidence,
                    ci_low: hit.ci_low_sec,
                    ci_high: hit.ci_high_sec,
                    hit_index: hit.hit_index,
                };
                self.write_record(file, &record);
            }
        }
    }

    fn write_record<T: Serialize>(&self, file: &Mutex<BufWriter<File>>, record: &T) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(err) => {
                log::error!("[HitLogger] serialize failed: {}", err);
                return;
            }
        };
        if let Ok(mut writer) = file.lock() {
            let _ = writeln!(writer, "{}", json);
            let _ = writer.flush();
        }
    }
}

/// (YYYYMMDD, HHMMSS) for a Unix timestamp, UTC.
fn format_utc(unix_secs: u64) -> (String, String) {
    let days = unix_secs / 86_400;
    let secs_of_day = unix_secs % 86_400;

    // Civil-from-days (Howard Hinnant's algorithm), valid for the Unix era.
    let z = days as i64 + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let year = if m <= 2 { y + 1 } else { y };

    let date = format!("{:04}{:02}{:02}", year, m, d);
    let time = format!(
        "{:02}{:02}{:02}",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    );
    (date, time)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_dir(tag: &str) -> String {
        let dir = std::env::temp_dir().join(format!("hitlight_logger_{}_{}", tag, std::process::id()));
        dir.to_string_lossy().into_owned()
    }

    #[test]
    fn writes_hit_records_as_json_lines() {
        let dir = temp_dir("hits");
        let logger = HitLogger::new(44100.0, 256, &dir);
        assert!(logger.is_enabled());

        logger.log_gate_value(Instrument::Kick, 1.0, 86);
        logger.log_gate_value(Instrument::Snare, 0.0, 87); // below 0.5, skipped

        let contents = fs::read_to_string(logger.path()).unwrap();
        let data_lines: Vec<&str> = contents
            .lines()
            .filter(|l| !l.starts_with('#'))
            .collect();
        assert_eq!(data_lines.len(), 1);

        let record: serde_json::Value = serde_json::from_str(data_lines[0]).unwrap();
        assert_eq!(record["type"], "hit");
        assert_eq!(record["instrument"], "kick");
        assert_eq!(record["frame"], 86);
        let audio_time = record["audio_time"].as_f64().unwrap();
        assert!((audio_time - 86.0 * 256.0 / 44100.0).abs() < 1e-4);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn writes_prediction_records() {
        let dir = temp_dir("preds");
        let logger = HitLogger::new(44100.0, 256, &dir);

        let hits = [PredictionHit {
            t_pred_sec: 2.5,
            ci_low_sec: 2.45,
            ci_high_sec: 2.55,
            confidence: 0.8,
            hit_index: 1,
        }];
        logger.log_predictions(100, 2.0, &[(Instrument::Kick, &hits)]);

        let contents = fs::read_to_string(logger.path()).unwrap();
        let line = contents.lines().find(|l| !l.starts_with('#')).unwrap();
        let record: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(record["type"], "prediction");
        assert_eq!(record["hit_index"], 1);
        assert!((record["predicted_time"].as_f64().unwrap() - 2.5).abs() < 1e-6);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn disabled_logger_is_silent() {
        let logger = HitLogger::disabled();
        assert!(!logger.is_enabled());
        // Must not panic.
        logger.log_gate_value(Instrument::Kick, 1.0, 0);
        logger.log_predictions(0, 0.0, &[]);
    }

    #[test]
    fn header_carries_rates() {
        let dir = temp_dir("header");
        let logger = HitLogger::new(44100.0, 256, &dir);
        let contents = fs::read_to_string(logger.path()).unwrap();
        assert!(contents.contains("# Sample Rate: 44100 Hz"));
        assert!(contents.contains("# Hop Size: 256 samples"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn utc_formatting_known_value() {
        // 2023-11-14 22:13:20 UTC
        let (date, time) = format_utc(1_700_000_000);
        assert_eq!(date, "20231114");
        assert_eq!(time, "221320");
    }
}
