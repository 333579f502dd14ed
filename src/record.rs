//
// record.rs
// dcmsort
//
// Reads the identity attributes behind the sorted layout and derives destination paths from them.
//

use std::fs;
use std::path::{Path, PathBuf};

use dicom::core::Tag;
use dicom::object::{open_file, DefaultDicomObject};
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("failed to read DICOM file: {0}")]
    Unreadable(#[from] dicom::object::ReadError),
    /// PatientName or Modality is absent; the file is skipped, not failed.
    #[error("missing PatientName or Modality")]
    MissingIdentity,
}

/// Identity attributes backing one file's place in the sorted tree.
#[derive(Debug, Clone)]
pub struct DicomRecord {
    pub patient_name: String,
    pub modality: String,
    pub study_description: Option<String>,
    pub study_date: Option<String>,
    pub series_number: Option<String>,
    pub instance_number: Option<String>,
    pub sop_instance_uid: Option<String>,
}

fn text_for_tag(obj: &DefaultDicomObject, tag: Tag) -> Option<String> {
    let value = obj.element(tag).ok()?.to_str().ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Read the attributes used for sorting. PatientName and Modality are
/// required; everything else falls back to placeholders later.
pub fn read_record(path: &Path) -> Result<DicomRecord, RecordError> {
    let obj = open_file(path)?;

    let patient_name = text_for_tag(&obj, Tag(0x0010, 0x0010));
    let modality = text_for_tag(&obj, Tag(0x0008, 0x0060));
    let (Some(patient_name), Some(modality)) = (patient_name, modality) else {
        return Err(RecordError::MissingIdentity);
    };

    Ok(DicomRecord {
        patient_name,
        modality,
        study_description: text_for_tag(&obj, Tag(0x0008, 0x1030)),
        study_date: text_for_tag(&obj, Tag(0x0008, 0x0020)),
        series_number: text_for_tag(&obj, Tag(0x0020, 0x0011)),
        instance_number: text_for_tag(&obj, Tag(0x0020, 0x0013)),
        sop_instance_uid: text_for_tag(&obj, Tag(0x0008, 0x0018)),
    })
}

/// Replace everything outside ASCII letters and digits so the components stay
/// portable across filesystems.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Stable unique filename component: the SOP Instance UID when present,
/// otherwise a truncated digest of the file contents. Deterministic either
/// way, which is what makes re-runs idempotent.
pub fn unique_component(path: &Path, record: &DicomRecord) -> std::io::Result<String> {
    if let Some(uid) = &record.sop_instance_uid {
        return Ok(sanitize(uid));
    }
    let contents = fs::read(path)?;
    let digest = Sha256::digest(&contents);
    Ok(hex::encode(digest)[..16].to_string())
}

/// Relative path of a file inside the destination tree:
/// `<patient>/<modality>_<study>_<date>/<series>/<instance>_<unique>.dcm`.
pub fn sorted_relative_path(record: &DicomRecord, unique: &str) -> PathBuf {
    let patient = sanitize(&record.patient_name);
    let study = format!(
        "{}_{}_{}",
        sanitize(&record.modality),
        sanitize(record.study_description.as_deref().unwrap_or("Unknown")),
        sanitize(record.study_date.as_deref().unwrap_or("Unknown")),
    );
    let series = sanitize(record.series_number.as_deref().unwrap_or("0"));
    let instance = sanitize(record.instance_number.as_deref().unwrap_or("0"));
    PathBuf::from(patient)
        .join(study)
        .join(series)
        .join(format!("{}_{}.dcm", instance, unique))
}
