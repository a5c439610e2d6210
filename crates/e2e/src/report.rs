//! Per-worker report accumulation and the suite-level report
//!
//! Each worker owns at most one open [`ReportRecord`]. Narration calls made
//! while no record is open are ignored, so reporting can never fail a test.
//! [`ReportingSink::end_suite`] writes `report.html` and `report.json` exactly
//! once.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::capture::{EmbeddedScreenshot, Screenshot};
use crate::error::{HarnessError, HarnessResult};
use crate::lifecycle::TestOutcome;
use crate::mode::ExecutionMode;
use crate::session::WorkerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Step,
    Info,
    Warn,
    Pass,
    Fail,
    Skip,
}

impl EntryKind {
    fn label(self) -> &'static str {
        match self {
            EntryKind::Step => "STEP",
            EntryKind::Info => "INFO",
            EntryKind::Warn => "WARN",
            EntryKind::Pass => "PASS",
            EntryKind::Fail => "FAIL",
            EntryKind::Skip => "SKIP",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub kind: EntryKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<EmbeddedScreenshot>,
    pub at: DateTime<Utc>,
}

impl ReportEntry {
    fn new(kind: EntryKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            screenshot: None,
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Passed,
    Failed,
    Skipped,
}

/// Narration for one attempt of one test method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub title: String,
    pub worker: WorkerId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub entries: Vec<ReportEntry>,
    pub status: Option<RecordStatus>,
}

impl ReportRecord {
    pub fn last_entry(&self) -> Option<&ReportEntry> {
        self.entries.last()
    }
}

struct OpenRecord {
    record: ReportRecord,
    steps: u32,
}

/// Static facts about the run, recorded once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteMetadata {
    pub environment: String,
    pub mode: ExecutionMode,
    pub operator: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportTotals {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// The flushed suite report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteReport {
    pub metadata: SuiteMetadata,
    pub finished_at: DateTime<Utc>,
    pub totals: ReportTotals,
    pub records: Vec<ReportRecord>,
}

pub struct ReportingSink {
    report_dir: PathBuf,
    suite: OnceCell<SuiteMetadata>,
    open: DashMap<WorkerId, OpenRecord>,
    finished: Mutex<Vec<ReportRecord>>,
    flushed: AtomicBool,
}

impl ReportingSink {
    pub fn new(report_dir: impl Into<PathBuf>) -> Self {
        Self {
            report_dir: report_dir.into(),
            suite: OnceCell::new(),
            open: DashMap::new(),
            finished: Mutex::new(Vec::new()),
            flushed: AtomicBool::new(false),
        }
    }

    pub fn html_path(&self) -> PathBuf {
        self.report_dir.join("report.html")
    }

    pub fn json_path(&self) -> PathBuf {
        self.report_dir.join("report.json")
    }

    pub fn metadata(&self) -> Option<&SuiteMetadata> {
        self.suite.get()
    }

    /// Prepare the report target and record run metadata. Later calls keep the
    /// first metadata.
    pub fn begin_suite(&self, metadata: SuiteMetadata) {
        self.suite.get_or_init(|| {
            if let Err(e) = std::fs::create_dir_all(&self.report_dir) {
                warn!(dir = %self.report_dir.display(), "Cannot create report directory: {}", e);
            }
            info!(
                environment = %metadata.environment,
                mode = %metadata.mode,
                operator = %metadata.operator,
                "Report started"
            );
            metadata
        });
    }

    /// Open a record for `worker`. An already open record is a lifecycle bug.
    pub fn begin_test(&self, worker: WorkerId, title: &str) -> HarnessResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.open.entry(worker) {
            Entry::Occupied(existing) => Err(HarnessError::ReportAlreadyOpen {
                worker,
                title: existing.get().record.title.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(OpenRecord {
                    record: ReportRecord {
                        title: title.to_string(),
                        worker,
                        started_at: Utc::now(),
                        finished_at: None,
                        entries: Vec::new(),
                        status: None,
                    },
                    steps: 0,
                });
                Ok(())
            }
        }
    }

    pub fn has_open_record(&self, worker: WorkerId) -> bool {
        self.open.contains_key(&worker)
    }

    fn append(&self, worker: WorkerId, kind: EntryKind, message: &str) {
        match self.open.get_mut(&worker) {
            Some(mut open) => {
                let message = if kind == EntryKind::Step {
                    open.steps += 1;
                    format!("Step {}: {}", open.steps, message)
                } else {
                    message.to_string()
                };
                open.record.entries.push(ReportEntry::new(kind, message));
            }
            None => debug!(%worker, "No open report record, dropping {:?}", kind),
        }
    }

    /// Numbered step
    pub fn step(&self, worker: WorkerId, message: &str) {
        self.append(worker, EntryKind::Step, message);
    }

    pub fn info(&self, worker: WorkerId, message: &str) {
        self.append(worker, EntryKind::Info, message);
    }

    pub fn warn(&self, worker: WorkerId, message: &str) {
        self.append(worker, EntryKind::Warn, message);
    }

    pub fn pass_note(&self, worker: WorkerId, message: &str) {
        self.append(worker, EntryKind::Pass, message);
    }

    /// Close the worker's record with the final entry for `outcome` and move
    /// it to the suite collection. The screenshot is only kept for failures.
    pub fn end_test(
        &self,
        worker: WorkerId,
        outcome: &TestOutcome,
        screenshot: Option<Screenshot>,
    ) {
        let Some((_, open)) = self.open.remove(&worker) else {
            debug!(%worker, "end_test without open record");
            return;
        };
        let mut record = open.record;

        let (kind, status, message) = match outcome {
            TestOutcome::Passed => (
                EntryKind::Pass,
                RecordStatus::Passed,
                "Test passed".to_string(),
            ),
            TestOutcome::Failed(cause) => (
                EntryKind::Fail,
                RecordStatus::Failed,
                format!("Test failed: {}", cause),
            ),
            TestOutcome::Skipped(reason) => (
                EntryKind::Skip,
                RecordStatus::Skipped,
                match reason {
                    Some(reason) => format!("Test skipped: {}", reason),
                    None => "Test skipped".to_string(),
                },
            ),
        };

        let mut entry = ReportEntry::new(kind, message);
        if status == RecordStatus::Failed {
            entry.screenshot = screenshot.as_ref().map(Screenshot::to_embedded);
        }
        record.entries.push(entry);
        record.status = Some(status);
        record.finished_at = Some(Utc::now());

        self.finished.lock().push(record);
    }

    /// Records promoted so far
    pub fn records(&self) -> Vec<ReportRecord> {
        self.finished.lock().clone()
    }

    /// Write the durable report. Only the first call writes; records still
    /// open at this point are dropped.
    pub fn end_suite(&self) -> HarnessResult<Option<SuiteReport>> {
        let Some(metadata) = self.suite.get() else {
            warn!("end_suite called before begin_suite, nothing to flush");
            return Ok(None);
        };
        if self.flushed.swap(true, Ordering::AcqRel) {
            debug!("Report already flushed");
            return Ok(None);
        }

        if !self.open.is_empty() {
            warn!(
                open = self.open.len(),
                "Dropping report records that were never finished"
            );
        }

        let records = self.records();
        let mut totals = ReportTotals::default();
        for record in &records {
            match record.status {
                Some(RecordStatus::Passed) => totals.passed += 1,
                Some(RecordStatus::Failed) => totals.failed += 1,
                Some(RecordStatus::Skipped) => totals.skipped += 1,
                None => {}
            }
        }

        let report = SuiteReport {
            metadata: metadata.clone(),
            finished_at: Utc::now(),
            totals,
            records,
        };

        std::fs::create_dir_all(&self.report_dir)?;
        write_file(&self.json_path(), &serde_json::to_string_pretty(&report)?)?;
        write_file(&self.html_path(), &render_html(&report))?;

        info!(
            path = %self.html_path().display(),
            passed = report.totals.passed,
            failed = report.totals.failed,
            skipped = report.totals.skipped,
            "Report written"
        );
        Ok(Some(report))
    }
}

fn write_file(path: &Path, content: &str) -> HarnessResult<()> {
    std::fs::write(path, content)?;
    Ok(())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Self-contained HTML rendering of the suite report.
pub fn render_html(report: &SuiteReport) -> String {
    let meta = &report.metadata;
    let mut html = String::new();

    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>Test Report - {env}</title>
<style>
body {{ font-family: sans-serif; margin: 2em; }}
.passed {{ color: #2e7d32; }} .failed {{ color: #c62828; }} .skipped {{ color: #f9a825; }}
.test {{ border: 1px solid #ddd; margin: 1em 0; padding: 0.5em 1em; }}
.entry {{ font-family: monospace; margin: 0.2em 0; }}
img {{ max-width: 100%; border: 1px solid #999; }}
</style>
</head>
<body>
<h1>Test Report</h1>
<table>
<tr><th>Environment</th><td>{env}</td></tr>
<tr><th>Mode</th><td>{mode}</td></tr>
<tr><th>Operator</th><td>{operator}</td></tr>
<tr><th>Started</th><td>{started}</td></tr>
<tr><th>Finished</th><td>{finished}</td></tr>
</table>
<p><span class="passed">{passed} passed</span>, <span class="failed">{failed} failed</span>, <span class="skipped">{skipped} skipped</span></p>
"#,
        env = escape(&meta.environment),
        mode = meta.mode,
        operator = escape(&meta.operator),
        started = meta.started_at.to_rfc3339(),
        finished = report.finished_at.to_rfc3339(),
        passed = report.totals.passed,
        failed = report.totals.failed,
        skipped = report.totals.skipped,
    );

    for record in &report.records {
        let class = match record.status {
            Some(RecordStatus::Passed) => "passed",
            Some(RecordStatus::Failed) => "failed",
            Some(RecordStatus::Skipped) => "skipped",
            None => "",
        };
        let _ = writeln!(
            html,
            r#"<div class="test"><h2 class="{}">{}</h2><p>worker {}</p>"#,
            class,
            escape(&record.title),
            record.worker
        );
        for entry in &record.entries {
            let _ = writeln!(
                html,
                r#"<div class="entry">[{}] {}</div>"#,
                entry.kind.label(),
                escape(&entry.message)
            );
            if let Some(shot) = &entry.screenshot {
                let _ = writeln!(
                    html,
                    r#"<img alt="failure screenshot" src="data:image/png;base64,{}">"#,
                    shot.base64_png
                );
            }
        }
        html.push_str("</div>\n");
    }

    html.push_str("</body>\n</html>\n");
    html
}
