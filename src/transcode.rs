//
// transcode.rs
// dcmsort
//
// Rewrites DICOM files between transfer syntaxes in place: decompression to
// Explicit VR Little Endian and compression to RLE Lossless.
//

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use dicom::core::value::{PixelFragmentSequence, Value};
use dicom::core::{DataElement, Length, PrimitiveValue, Tag, VR};
use dicom::object::{open_file, FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::{EXPLICIT_VR_LITTLE_ENDIAN, RLE_LOSSLESS};
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::progress;
use crate::report::RunSummary;
use crate::rle;
use crate::scan::{classify, EntryKind};

const UNCOMPRESSED_TS: [&str; 3] = [
    "1.2.840.10008.1.2",   // Implicit VR Little Endian
    "1.2.840.10008.1.2.1", // Explicit VR Little Endian
    "1.2.840.10008.1.2.2", // Explicit VR Big Endian
];

/// True for the transfer syntaxes that need no pixel decoding.
pub(crate) fn is_uncompressed_ts(uid: &str) -> bool {
    UNCOMPRESSED_TS.contains(&uid.trim_end_matches('\0'))
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Outcome {
    Rewritten,
    AlreadyInTarget,
    NoPixelData,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Direction {
    Compress,
    Decompress,
}

/// Rewrite every DICOM file under `root` to RLE Lossless.
pub fn compress_tree(root: &Path, summary: &mut RunSummary) {
    rewrite_tree(root, Direction::Compress, summary)
}

/// Rewrite every compressed DICOM file under `root` to Explicit VR Little Endian.
pub fn decompress_tree(root: &Path, summary: &mut RunSummary) {
    rewrite_tree(root, Direction::Decompress, summary)
}

fn rewrite_tree(root: &Path, direction: Direction, summary: &mut RunSummary) {
    let files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| classify(p) == EntryKind::Dicom)
        .collect();

    let label = match direction {
        Direction::Compress => "Compressing",
        Direction::Decompress => "Decompressing",
    };
    info!("{} {} DICOM files under {:?}", label, files.len(), root);

    let bar = progress::file_bar(files.len() as u64, label);
    for path in &files {
        let outcome = match direction {
            Direction::Compress => compress_file(path),
            Direction::Decompress => decompress_file(path),
        };
        match outcome {
            Ok(Outcome::Rewritten) => match direction {
                Direction::Compress => summary.compressed += 1,
                Direction::Decompress => summary.decompressed += 1,
            },
            Ok(Outcome::AlreadyInTarget) => summary.already_in_target_syntax += 1,
            Ok(Outcome::NoPixelData) => summary.without_pixel_data += 1,
            Err(err) => {
                warn!("Failed to rewrite {:?}: {:#}", path, err);
                summary.record_failure(path, format!("{:#}", err));
            }
        }
        bar.inc(1);
    }
    bar.finish_and_clear();
}

fn decompress_file(path: &Path) -> Result<Outcome> {
    let obj = open_file(path).context("Failed to open DICOM file")?;
    let current_ts = obj.meta().transfer_syntax().trim_end_matches('\0').to_string();
    if is_uncompressed_ts(&current_ts) {
        debug!("{:?} is already uncompressed ({})", path, current_ts);
        return Ok(Outcome::AlreadyInTarget);
    }
    if obj.element(Tag(0x7FE0, 0x0010)).is_err() {
        debug!("{:?} has no pixel data", path);
        return Ok(Outcome::NoPixelData);
    }

    // Decode without applying LUTs so pixel meaning is untouched.
    let decoded = obj
        .decode_pixel_data()
        .context("Failed to decode pixel data")?;
    let convert_options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::None)
        .with_voi_lut(VoiLutOption::Identity);
    let bits_allocated = decoded.bits_allocated();
    let pixel_bytes = if bits_allocated > 8 {
        decoded
            .to_vec_with_options::<u16>(&convert_options)
            .context("Failed to convert decoded pixels")?
            .into_iter()
            .flat_map(|v| v.to_le_bytes())
            .collect::<Vec<u8>>()
    } else {
        decoded
            .to_vec_with_options::<u8>(&convert_options)
            .context("Failed to convert decoded pixels")?
    };
    drop(decoded);

    let mut dataset = obj.into_inner();
    let vr = if bits_allocated > 8 { VR::OW } else { VR::OB };
    dataset.put(DataElement::new(
        Tag(0x7FE0, 0x0010),
        vr,
        PrimitiveValue::from(pixel_bytes),
    ));

    write_in_place(path, dataset, EXPLICIT_VR_LITTLE_ENDIAN.uid())?;
    debug!("Decompressed {:?}", path);
    Ok(Outcome::Rewritten)
}

fn compress_file(path: &Path) -> Result<Outcome> {
    let obj = open_file(path).context("Failed to open DICOM file")?;
    let current_ts = obj.meta().transfer_syntax().trim_end_matches('\0').to_string();
    if current_ts == RLE_LOSSLESS.uid() {
        debug!("{:?} is already RLE Lossless", path);
        return Ok(Outcome::AlreadyInTarget);
    }
    if obj.element(Tag(0x7FE0, 0x0010)).is_err() {
        debug!("{:?} has no pixel data", path);
        return Ok(Outcome::NoPixelData);
    }

    let decoded = obj
        .decode_pixel_data()
        .context("Failed to decode pixel data")?;
    let convert_options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::None)
        .with_voi_lut(VoiLutOption::Identity);
    let rows = decoded.rows() as usize;
    let columns = decoded.columns() as usize;
    let samples = decoded.samples_per_pixel() as usize;
    let frames = decoded.number_of_frames() as usize;
    let bits_allocated = decoded.bits_allocated();
    let frame_len = rows * columns * samples;
    if frame_len == 0 || frames == 0 {
        bail!("Pixel data has no addressable frames");
    }

    // One fragment per frame; each frame splits into one segment per sample
    // byte plane.
    let mut fragments: Vec<Vec<u8>> = Vec::with_capacity(frames);
    match bits_allocated {
        8 => {
            let data = decoded
                .to_vec_with_options::<u8>(&convert_options)
                .context("Failed to convert decoded pixels")?;
            if data.len() != frame_len * frames {
                bail!(
                    "Pixel buffer of {} samples does not match {}x{}x{}x{}",
                    data.len(),
                    rows,
                    columns,
                    samples,
                    frames
                );
            }
            for frame in data.chunks_exact(frame_len) {
                fragments.push(rle::encode_frame_u8(frame, samples)?);
            }
        }
        16 => {
            let data = decoded
                .to_vec_with_options::<u16>(&convert_options)
                .context("Failed to convert decoded pixels")?;
            if data.len() != frame_len * frames {
                bail!(
                    "Pixel buffer of {} samples does not match {}x{}x{}x{}",
                    data.len(),
                    rows,
                    columns,
                    samples,
                    frames
                );
            }
            for frame in data.chunks_exact(frame_len) {
                fragments.push(rle::encode_frame_u16(frame, samples)?);
            }
        }
        other => bail!("Unsupported bits allocated for RLE compression: {}", other),
    }
    drop(decoded);

    let mut dataset = obj.into_inner();
    if samples > 1 {
        // Decoded RLE output is interleaved; the attribute must say so.
        dataset.put(DataElement::new(
            Tag(0x0028, 0x0006),
            VR::US,
            PrimitiveValue::from(0_u16),
        ));
    }
    dataset.put(DataElement::new_with_len(
        Tag(0x7FE0, 0x0010),
        VR::OB,
        Length::UNDEFINED,
        Value::PixelSequence(PixelFragmentSequence::new(Vec::<u32>::new(), fragments)),
    ));

    write_in_place(path, dataset, RLE_LOSSLESS.uid())?;
    debug!("Compressed {:?}", path);
    Ok(Outcome::Rewritten)
}

/// Rebuild the file object around the dataset and replace the file through a
/// staging copy, so a failure mid-write cannot destroy the original.
fn write_in_place(path: &Path, dataset: InMemDicomObject, ts_uid: &str) -> Result<()> {
    let sop_class_uid = dataset
        .element(Tag(0x0008, 0x0016))
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
        .context("Missing SOP Class UID")?;
    let sop_instance_uid = dataset
        .element(Tag(0x0008, 0x0018))
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
        .context("Missing SOP Instance UID")?;

    let file_meta = FileMetaTableBuilder::new()
        .transfer_syntax(ts_uid)
        .media_storage_sop_class_uid(sop_class_uid)
        .media_storage_sop_instance_uid(sop_instance_uid)
        .build()
        .context("Failed to build file meta table")?;

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(
        dicom::dictionary_std::StandardDataDictionary,
        file_meta,
    );
    for elem in dataset {
        file_obj.put(elem);
    }

    let parent = path.parent().context("File has no parent directory")?;
    let staged = NamedTempFile::new_in(parent).context("Failed to create staging file")?;
    file_obj
        .write_to_file(staged.path())
        .context("Failed to write rewritten file")?;
    staged
        .persist(path)
        .with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}
