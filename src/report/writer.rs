//! JSON report writer with a daily-rotating JSONL history.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{NaiveDate, Utc};
use tempfile::NamedTempFile;
use tracing::{info, warn};

use super::{ReportSink, TestReport};
use crate::{AppError, Result};

struct HistoryState {
    current_date: NaiveDate,
    writer: BufWriter<fs::File>,
}

/// Writes `report.json` into each pass's artifact directory.
///
/// With a history directory configured, every report is also appended as
/// one JSON line to `<history_dir>/history-YYYY-MM-DD.jsonl`, opening a new
/// file when the calendar date changes between writes.
pub struct JsonReportWriter {
    file_name: String,
    history_dir: Option<PathBuf>,
    history: Mutex<Option<HistoryState>>,
}

impl JsonReportWriter {
    /// Writer producing `file_name` in each pass directory.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the history directory cannot be created.
    pub fn new(file_name: impl Into<String>, history_dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &history_dir {
            fs::create_dir_all(dir).map_err(|err| {
                AppError::Config(format!(
                    "failed to create report history directory {}: {err}",
                    dir.display()
                ))
            })?;
        }
        Ok(Self {
            file_name: file_name.into(),
            history_dir,
            history: Mutex::new(None),
        })
    }

    /// Path the report of `report` is written to.
    #[must_use]
    pub fn report_path(&self, report: &TestReport) -> PathBuf {
        report.artifact_dir.join(&self.file_name)
    }

    fn open_for_date(dir: &Path, date: NaiveDate) -> Result<BufWriter<fs::File>> {
        let path = dir.join(format!("history-{date}.jsonl"));
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| {
                AppError::Report(format!("failed to open history {}: {err}", path.display()))
            })?;
        Ok(BufWriter::new(file))
    }

    fn write_report_file(&self, report: &TestReport) -> Result<PathBuf> {
        let path = self.report_path(report);
        let parent = path
            .parent()
            .ok_or_else(|| AppError::Report("report path has no parent directory".into()))?;
        fs::create_dir_all(parent).map_err(|err| {
            AppError::Report(format!("failed to create {}: {err}", parent.display()))
        })?;

        let body = serde_json::to_string_pretty(report)?;
        let mut tmp = NamedTempFile::new_in(parent)
            .map_err(|err| AppError::Report(format!("failed to create temporary file: {err}")))?;
        tmp.write_all(body.as_bytes())
            .map_err(|err| AppError::Report(format!("failed to write temporary file: {err}")))?;
        tmp.persist(&path).map_err(|err| {
            AppError::Report(format!("failed to persist {}: {err}", path.display()))
        })?;
        Ok(path)
    }

    fn append_history(&self, dir: &Path, report: &TestReport) -> Result<()> {
        let today = Utc::now().date_naive();
        let mut guard = self.history.lock().unwrap_or_else(PoisonError::into_inner);

        if guard.as_ref().is_none_or(|s| s.current_date != today) {
            *guard = Some(HistoryState {
                current_date: today,
                writer: Self::open_for_date(dir, today)?,
            });
        }

        if let Some(state) = guard.as_mut() {
            let line = serde_json::to_string(report)?;
            if let Err(err) = writeln!(state.writer, "{line}") {
                warn!(%err, "failed to write report history");
                return Err(AppError::Report(format!("history write failed: {err}")));
            }
            if let Err(err) = state.writer.flush() {
                warn!(%err, "failed to flush report history");
                return Err(AppError::Report(format!("history flush failed: {err}")));
            }
        }
        Ok(())
    }
}

impl ReportSink for JsonReportWriter {
    fn submit(&self, report: &TestReport) -> Result<()> {
        let path = self.write_report_file(report)?;
        if let Some(dir) = &self.history_dir {
            self.append_history(dir, report)?;
        }
        info!(
            test = report.test_name,
            pass = report.pass,
            result = %report.result,
            path = %path.display(),
            "test report written"
        );
        Ok(())
    }
}
