use crate::errors::ControllerError;
use bridge::FrameTimings;
use chrono::Local;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HEADER: &str = "record_time_s,tap_number,frame_age_ms,t_read_total_ms,t_frameacq_ms,t_getts_ms,t_frameconv_ms,detect_time_ms,frames_folder";
pub const FIXED_FILE_NAME: &str = "tableB.csv";

/// One row per emitted trigger.
#[derive(Debug, Clone, PartialEq)]
pub struct TapRecord {
    /// Monotonic clock reading, seconds.
    pub record_time_s: f64,
    pub tap_number: u64,
    pub frame_age: Duration,
    pub timings: FrameTimings,
    pub detection: Duration,
    pub frames_folder: Option<PathBuf>,
}

impl TapRecord {
    fn to_csv_line(&self) -> String {
        let folder = self
            .frames_folder
            .as_deref()
            .map(|p| quote(&p.display().to_string()))
            .unwrap_or_default();
        format!(
            "{:.6},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{}",
            self.record_time_s,
            self.tap_number,
            ms(self.frame_age),
            ms(self.timings.read_total),
            ms(self.timings.acquisition.acquisition),
            ms(self.timings.acquisition.timestamp),
            ms(self.timings.acquisition.conversion),
            ms(self.detection),
            folder
        )
    }
}

fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

fn quote(field: &str) -> String {
    if field.contains([',', '"', '\n']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Tap CSV written twice: a timestamped archive and `tableB.csv`, both in the run folder.
///
/// Every row is flushed before `record` returns.
pub struct TapLog {
    archive: BufWriter<File>,
    fixed: BufWriter<File>,
    archive_path: PathBuf,
    fixed_path: PathBuf,
    rows: u64,
}

impl TapLog {
    pub fn create(run_dir: impl AsRef<Path>) -> Result<Self, ControllerError> {
        let run_dir = run_dir.as_ref();
        std::fs::create_dir_all(run_dir)?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let archive_path = run_dir.join(format!("tableB_{}.csv", stamp));
        let fixed_path = run_dir.join(FIXED_FILE_NAME);

        let mut archive = BufWriter::new(File::create(&archive_path)?);
        let mut fixed = BufWriter::new(File::create(&fixed_path)?);
        for out in [&mut archive, &mut fixed] {
            writeln!(out, "{}", HEADER)?;
            out.flush()?;
        }

        tracing::info!(
            archive = %archive_path.display(),
            fixed = %fixed_path.display(),
            "Tap log created"
        );

        Ok(Self {
            archive,
            fixed,
            archive_path,
            fixed_path,
            rows: 0,
        })
    }

    pub fn record(&mut self, record: &TapRecord) -> Result<(), ControllerError> {
        let line = record.to_csv_line();
        for out in [&mut self.archive, &mut self.fixed] {
            writeln!(out, "{}", line)?;
            out.flush()?;
        }
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ControllerError> {
        self.archive.flush()?;
        self.fixed.flush()?;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn fixed_path(&self) -> &Path {
        &self.fixed_path
    }
}

impl Drop for TapLog {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "Failed to flush tap log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge::AcquisitionTimings;
    use std::fs;
    use tempfile::tempdir;

    fn record(tap: u64, folder: Option<PathBuf>) -> TapRecord {
        TapRecord {
            record_time_s: 12.5,
            tap_number: tap,
            frame_age: Duration::from_micros(1500),
            timings: FrameTimings {
                read_total: Duration::from_millis(16),
                acquisition: AcquisitionTimings {
                    acquisition: Duration::from_millis(15),
                    timestamp: Duration::from_micros(10),
                    conversion: Duration::from_micros(990),
                },
            },
            detection: Duration::from_millis(4),
            frames_folder: folder,
        }
    }

    #[test]
    fn test_header_in_both_files() {
        let dir = tempdir().unwrap();
        let log = TapLog::create(dir.path()).unwrap();

        assert_eq!(log.fixed_path(), dir.path().join("tableB.csv"));
        let archive_name = log.archive_path().file_name().unwrap().to_string_lossy();
        assert!(archive_name.starts_with("tableB_") && archive_name.ends_with(".csv"));

        for path in [log.archive_path(), log.fixed_path()] {
            let content = fs::read_to_string(path).unwrap();
            assert_eq!(content, format!("{}\n", HEADER));
        }
    }

    #[test]
    fn test_rows_are_visible_immediately() {
        let dir = tempdir().unwrap();
        let mut log = TapLog::create(dir.path()).unwrap();
        log.record(&record(1, None)).unwrap();
        log.record(&record(2, Some(PathBuf::from("/runs/trial_0002")))).unwrap();
        assert_eq!(log.rows(), 2);

        let content = fs::read_to_string(log.fixed_path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[1],
            "12.500000,1,1.500000,16.000000,15.000000,0.010000,0.990000,4.000000,"
        );
        assert!(lines[2].ends_with(",/runs/trial_0002"));

        let archive = fs::read_to_string(log.archive_path()).unwrap();
        assert_eq!(archive, content);
    }

    #[test]
    fn test_folder_with_comma_is_quoted() {
        let line = record(1, Some(PathBuf::from("a,b"))).to_csv_line();
        assert!(line.ends_with(",\"a,b\""));
    }

    #[test]
    fn test_recreate_truncates_fixed_file() {
        let dir = tempdir().unwrap();
        {
            let mut log = TapLog::create(dir.path()).unwrap();
            log.record(&record(1, None)).unwrap();
        }
        let log = TapLog::create(dir.path()).unwrap();
        let content = fs::read_to_string(log.fixed_path()).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
}
