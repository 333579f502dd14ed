//
// archive.rs
// dcmsort
//
// Expands archives into a temporary working set and classifies their members
// exactly like loose source files.
//

use std::fs::{self, File};
use std::path::Path;

use anyhow::{bail, Context, Result};
use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::record::sanitize;
use crate::report::RunSummary;
use crate::scan::{self, ArchiveFormat, EntryKind, SourceEntry};

/// Archives nested deeper than this are reported instead of expanded.
pub const MAX_NESTING_DEPTH: usize = 8;

/// Extracted archive contents. Dropping the workspace deletes the files, so
/// it must outlive every pipeline step that reads from it.
pub struct Workspace {
    root: TempDir,
    pub entries: Vec<SourceEntry>,
}

impl Workspace {
    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

/// Expand every archive entry into a fresh working set. Failures are recorded
/// per archive; only the inability to create the workspace itself is fatal.
pub fn unpack_all(archives: &[SourceEntry], summary: &mut RunSummary) -> Result<Workspace> {
    let root = TempDir::new().context("Failed to create temporary working set")?;
    let mut entries = Vec::new();
    let mut dir_id = 0;

    for entry in archives {
        let EntryKind::Archive(format) = entry.kind else {
            continue;
        };
        unpack_entry(
            &entry.path,
            format,
            root.path(),
            &mut dir_id,
            0,
            &mut entries,
            summary,
        );
    }

    Ok(Workspace { root, entries })
}

fn unpack_entry(
    archive: &Path,
    format: ArchiveFormat,
    workspace: &Path,
    dir_id: &mut usize,
    depth: usize,
    entries: &mut Vec<SourceEntry>,
    summary: &mut RunSummary,
) {
    if depth > MAX_NESTING_DEPTH {
        warn!(
            "Archive nesting deeper than {} levels at {:?}",
            MAX_NESTING_DEPTH, archive
        );
        summary.record_failure(
            archive,
            format!("archive nesting exceeds {} levels", MAX_NESTING_DEPTH),
        );
        return;
    }

    let name = archive
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("archive");
    let dir = workspace.join(format!(
        "{}-{:03}",
        sanitize(&format.strip_suffix_from(name)),
        *dir_id
    ));
    *dir_id += 1;

    info!("Unpacking {:?}", archive);
    if let Err(err) = extract(archive, format, &dir) {
        warn!("Failed to unpack {:?}: {:#}", archive, err);
        summary.record_failure(archive, format!("{:#}", err));
        return;
    }
    summary.archives_unpacked += 1;

    let members = scan::scan_tree(&dir, Some(archive), false, None, summary);
    if members.iter().all(|m| m.kind != EntryKind::Dicom) {
        debug!("No DICOM files inside {:?}", archive);
    }
    for member in members {
        match member.kind {
            EntryKind::Archive(nested_format) => {
                unpack_entry(
                    &member.path,
                    nested_format,
                    workspace,
                    dir_id,
                    depth + 1,
                    entries,
                    summary,
                );
            }
            _ => entries.push(member),
        }
    }
}

fn extract(archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("Failed to create {:?}", dest))?;
    let file = File::open(archive).with_context(|| format!("Failed to open {:?}", archive))?;
    match format {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(file).context("Failed to read zip archive")?;
            if zip.len() == 0 {
                debug!("{:?} is empty", archive);
            }
            zip.extract(dest).context("Failed to extract zip archive")?;
        }
        ArchiveFormat::Tar => {
            tar::Archive::new(file)
                .unpack(dest)
                .context("Failed to extract tar archive")?;
        }
        ArchiveFormat::TarGz => {
            tar::Archive::new(flate2::read::GzDecoder::new(file))
                .unpack(dest)
                .context("Failed to extract tar.gz archive")?;
        }
        ArchiveFormat::TarBz2 => {
            tar::Archive::new(bzip2::read::BzDecoder::new(file))
                .unpack(dest)
                .context("Failed to extract tar.bz2 archive")?;
        }
        ArchiveFormat::Rar => bail!("rar archives are not supported"),
    }
    Ok(())
}
