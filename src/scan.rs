//
// scan.rs
// dcmsort
//
// Walks a directory tree and classifies every file as DICOM, archive, or other.
//

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::progress;
use crate::report::RunSummary;

/// Archive formats recognized during classification. Recognition is by file
/// name only; whether the format can actually be expanded is decided later.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    Rar,
}

impl ArchiveFormat {
    /// Recognize a format from the file name, case-insensitive, double
    /// extensions included.
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz") {
            Some(ArchiveFormat::TarBz2)
        } else if lower.ends_with(".tar") {
            Some(ArchiveFormat::Tar)
        } else if lower.ends_with(".rar") {
            Some(ArchiveFormat::Rar)
        } else {
            None
        }
    }

    /// The file name without the suffix that made it match, for naming the
    /// extraction directory.
    pub fn strip_suffix_from(self, name: &str) -> String {
        let suffixes: &[&str] = match self {
            ArchiveFormat::Zip => &[".zip"],
            ArchiveFormat::Tar => &[".tar"],
            ArchiveFormat::TarGz => &[".tar.gz", ".tgz"],
            ArchiveFormat::TarBz2 => &[".tar.bz2", ".tbz"],
            ArchiveFormat::Rar => &[".rar"],
        };
        let lower = name.to_ascii_lowercase();
        for suffix in suffixes {
            if lower.ends_with(suffix) {
                return name[..name.len() - suffix.len()].to_string();
            }
        }
        name.to_string()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EntryKind {
    Dicom,
    Archive(ArchiveFormat),
    Other,
}

/// A classified file found during a walk. `origin` names the archive a member
/// was extracted from, so failures can be reported against something the user
/// recognizes.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub origin: Option<PathBuf>,
}

/// True when the file carries a DICOM preamble: 128 filler bytes followed by
/// the `DICM` marker.
pub fn has_dicm_marker(path: &Path) -> bool {
    let mut header = [0u8; 132];
    match File::open(path) {
        Ok(mut file) => file.read_exact(&mut header).is_ok() && &header[128..132] == b"DICM",
        Err(_) => false,
    }
}

/// Classify a single path. Archive extensions win, then DICOM extensions,
/// then the marker sniff for extensionless exports. The same rule applies to
/// loose files and extracted members.
pub fn classify(path: &Path) -> EntryKind {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    if let Some(format) = ArchiveFormat::from_name(name) {
        return EntryKind::Archive(format);
    }
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension.as_deref() {
        Some("dcm") | Some("dicom") => EntryKind::Dicom,
        _ if has_dicm_marker(path) => EntryKind::Dicom,
        _ => EntryKind::Other,
    }
}

/// Walk `root` and classify every file. DICOM and archive entries are
/// returned; other files are only counted. Unreadable directory entries are
/// per-file failures, never fatal. `exclude` prunes one subtree, used when
/// the destination lives inside the source.
pub fn scan_tree(
    root: &Path,
    origin: Option<&Path>,
    collect_sizes: bool,
    exclude: Option<&Path>,
    summary: &mut RunSummary,
) -> Vec<SourceEntry> {
    if collect_sizes {
        summary.total_bytes.get_or_insert(0);
        summary.dicom_bytes.get_or_insert(0);
    }

    let spinner = progress::scan_spinner();
    let mut entries = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(move |e| Some(e.path()) != exclude);

    for item in walker {
        let item = match item {
            Ok(item) => item,
            Err(err) => {
                let path = err
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| root.to_path_buf());
                warn!("Cannot read {:?}: {}", path, err);
                summary.record_failure(&path, err);
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }

        let path = item.path();
        summary.files_seen += 1;
        spinner.inc(1);

        let kind = classify(path);
        match kind {
            EntryKind::Dicom => summary.dicom_files += 1,
            EntryKind::Archive(format) => {
                debug!("Found {:?} archive at {:?}", format, path);
                summary.archives_found += 1;
            }
            EntryKind::Other => {
                debug!("Not a DICOM file or archive, skipping {:?}", path);
                summary.non_dicom_skipped += 1;
                continue;
            }
        }

        if collect_sizes {
            if let Ok(metadata) = item.metadata() {
                *summary.total_bytes.get_or_insert(0) += metadata.len();
                if kind == EntryKind::Dicom {
                    *summary.dicom_bytes.get_or_insert(0) += metadata.len();
                }
            }
        }

        entries.push(SourceEntry {
            path: path.to_path_buf(),
            kind,
            origin: origin.map(Path::to_path_buf),
        });
    }
    spinner.finish_and_clear();

    entries
}
