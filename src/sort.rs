//
// sort.rs
// dcmsort
//
// Copies classified DICOM files into the patient/study/series layout.
//

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::progress;
use crate::record::{self, RecordError};
use crate::report::RunSummary;
use crate::scan::SourceEntry;

/// Copy every entry into its sorted place under `destination`. Problems with
/// individual files are recorded and the loop keeps going.
pub fn copy_sorted(entries: &[&SourceEntry], destination: &Path, summary: &mut RunSummary) {
    let bar = progress::file_bar(entries.len() as u64, "Copying");
    for entry in entries {
        if let Err(err) = copy_entry(entry, destination, summary) {
            warn!("Failed to sort {:?}: {:#}", entry.path, err);
            summary.record_failure(&entry.path, format!("{:#}", err));
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
}

fn copy_entry(entry: &SourceEntry, destination: &Path, summary: &mut RunSummary) -> Result<()> {
    let record = match record::read_record(&entry.path) {
        Ok(record) => record,
        Err(RecordError::MissingIdentity) => {
            debug!("Skipping {:?}: no PatientName or Modality", entry.path);
            summary.skipped_missing_identity += 1;
            return Ok(());
        }
        Err(err) => return Err(err).context("Failed to read identity attributes"),
    };

    let unique = record::unique_component(&entry.path, &record)
        .context("Failed to derive a unique filename")?;
    let target = destination.join(record::sorted_relative_path(&record, &unique));

    if target.exists() {
        debug!("Already sorted: {:?}", target);
        summary.skipped_existing += 1;
        return Ok(());
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }
    fs::copy(&entry.path, &target).with_context(|| format!("Failed to copy to {:?}", target))?;

    // The copy inherits the source's read-only bit, which would block any
    // later rewrite of the sorted file.
    clear_readonly(&target).with_context(|| format!("Failed to fix permissions on {:?}", target))?;

    debug!("Copied {:?} -> {:?}", entry.path, target);
    summary.copied += 1;
    Ok(())
}

fn clear_readonly(path: &Path) -> io::Result<()> {
    let mut permissions = fs::metadata(path)?.permissions();
    if permissions.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        permissions.set_readonly(false);
        fs::set_permissions(path, permissions)?;
    }
    Ok(())
}
