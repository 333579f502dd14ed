//
// report.rs
// dcmsort
//
// Run summary: counters, per-file failures, text and JSON rendering, and the exit-code mapping.
//

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use serde::Serialize;

/// How many failures the text summary lists before referring to the log file.
const MAX_LISTED_FAILURES: usize = 25;

/// One file that could not be processed, with a human-readable reason.
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// Counters accumulated over a whole run plus the per-file failures.
/// Per-file problems land here; only setup problems abort the run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub files_seen: usize,
    pub dicom_files: usize,
    pub non_dicom_skipped: usize,
    pub archives_found: usize,
    pub archives_unpacked: usize,
    pub copied: usize,
    pub skipped_existing: usize,
    pub skipped_missing_identity: usize,
    pub sent: usize,
    pub compressed: usize,
    pub decompressed: usize,
    pub already_in_target_syntax: usize,
    pub without_pixel_data: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dicom_bytes: Option<u64>,
    pub failures: Vec<FileFailure>,
}

impl RunSummary {
    pub fn record_failure(&mut self, path: &Path, reason: impl fmt::Display) {
        self.failures.push(FileFailure {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        });
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// 0 for a clean run, 2 when the run finished but some files failed.
    /// Fatal setup errors exit with 1 before a summary exists.
    pub fn exit_code(&self) -> ExitCode {
        if self.is_clean() {
            ExitCode::SUCCESS
        } else {
            ExitCode::from(2)
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Render a byte count the way a person reads it.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "Run summary")?;
        writeln!(f, "{}", "=".repeat(60))?;
        writeln!(f, "  Files seen:               {}", self.files_seen)?;
        writeln!(f, "  DICOM files:              {}", self.dicom_files)?;
        writeln!(f, "  Non-DICOM skipped:        {}", self.non_dicom_skipped)?;
        writeln!(f, "  Archives found:           {}", self.archives_found)?;
        writeln!(f, "  Archives unpacked:        {}", self.archives_unpacked)?;
        if let Some(total) = self.total_bytes {
            let dicom = self.dicom_bytes.unwrap_or(0);
            writeln!(
                f,
                "  Source size:              {} ({} in DICOM files)",
                human_bytes(total),
                human_bytes(dicom)
            )?;
        }
        writeln!(f, "  Copied:                   {}", self.copied)?;
        writeln!(f, "  Already sorted:           {}", self.skipped_existing)?;
        writeln!(f, "  Missing identity tags:    {}", self.skipped_missing_identity)?;
        writeln!(f, "  Sent:                     {}", self.sent)?;
        writeln!(f, "  Compressed:               {}", self.compressed)?;
        writeln!(f, "  Decompressed:             {}", self.decompressed)?;
        writeln!(f, "  Already in target syntax: {}", self.already_in_target_syntax)?;
        writeln!(f, "  Without pixel data:       {}", self.without_pixel_data)?;
        if self.failures.is_empty() {
            writeln!(f, "  Failures:                 none")?;
        } else {
            writeln!(f, "  Failures:                 {}", self.failures.len())?;
            for failure in self.failures.iter().take(MAX_LISTED_FAILURES) {
                writeln!(f, "    {} -> {}", failure.path.display(), failure.reason)?;
            }
            if self.failures.len() > MAX_LISTED_FAILURES {
                writeln!(
                    f,
                    "    ... {} more, see dcmsort.log",
                    self.failures.len() - MAX_LISTED_FAILURES
                )?;
            }
        }
        Ok(())
    }
}
