//
// sort_workflows.rs
// dcmsort
//
// Integration tests covering scanning, sorting, archive expansion, send preflight, and RLE transcoding.
//

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use dcmsort::report::RunSummary;
use dcmsort::{run, transcode, Cli};
use dicom::core::{DataElement, PrimitiveValue, Tag, VR};
use dicom::dictionary_std::StandardDataDictionary;
use dicom::object::{open_file, FileDicomObject, FileMetaTableBuilder, InMemDicomObject};
use dicom::transfer_syntax::entries::{EXPLICIT_VR_LITTLE_ENDIAN, RLE_LOSSLESS};
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, VoiLutOption};
use tempfile::tempdir;

/// Write a tiny Secondary Capture instance with predictable identity tags and
/// a 2x2 8-bit frame. `patient` is optional so tests can produce files the
/// sorter must skip.
fn write_sample(path: &Path, patient: Option<&str>, sop_uid: &str, series: &str, instance: &str) {
    let mut obj = InMemDicomObject::new_empty_with_dict(StandardDataDictionary);
    if let Some(name) = patient {
        obj.put(DataElement::new(
            Tag(0x0010, 0x0010),
            VR::PN,
            PrimitiveValue::from(name),
        ));
    }
    obj.put(DataElement::new(
        Tag(0x0010, 0x0020),
        VR::LO,
        PrimitiveValue::from("PAT123"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0060),
        VR::CS,
        PrimitiveValue::from("CT"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x1030),
        VR::LO,
        PrimitiveValue::from("Chest PA"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0020),
        VR::DA,
        PrimitiveValue::from("20240101"),
    ));
    obj.put(DataElement::new(
        Tag(0x0020, 0x0011),
        VR::IS,
        PrimitiveValue::from(series),
    ));
    obj.put(DataElement::new(
        Tag(0x0020, 0x0013),
        VR::IS,
        PrimitiveValue::from(instance),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0016),
        VR::UI,
        PrimitiveValue::from("1.2.840.10008.5.1.4.1.1.7"),
    ));
    obj.put(DataElement::new(
        Tag(0x0008, 0x0018),
        VR::UI,
        PrimitiveValue::from(sop_uid),
    ));

    obj.put(DataElement::new(
        Tag(0x0028, 0x0010),
        VR::US,
        PrimitiveValue::from(2_u16),
    )); // Rows
    obj.put(DataElement::new(
        Tag(0x0028, 0x0011),
        VR::US,
        PrimitiveValue::from(2_u16),
    )); // Columns
    obj.put(DataElement::new(
        Tag(0x0028, 0x0002),
        VR::US,
        PrimitiveValue::from(1_u16),
    )); // Samples per pixel
    obj.put(DataElement::new(
        Tag(0x0028, 0x0100),
        VR::US,
        PrimitiveValue::from(8_u16),
    )); // Bits Allocated
    obj.put(DataElement::new(
        Tag(0x0028, 0x0101),
        VR::US,
        PrimitiveValue::from(8_u16),
    )); // Bits Stored
    obj.put(DataElement::new(
        Tag(0x0028, 0x0102),
        VR::US,
        PrimitiveValue::from(7_u16),
    )); // High Bit
    obj.put(DataElement::new(
        Tag(0x0028, 0x0103),
        VR::US,
        PrimitiveValue::from(0_u16),
    )); // Pixel Representation
    obj.put(DataElement::new(
        Tag(0x0028, 0x0004),
        VR::CS,
        PrimitiveValue::from("MONOCHROME2"),
    ));
    obj.put(DataElement::new(
        Tag(0x0028, 0x0008),
        VR::IS,
        PrimitiveValue::from("1"),
    )); // Number of Frames

    obj.put(DataElement::new(
        Tag(0x7fe0, 0x0010),
        VR::OB,
        PrimitiveValue::from(vec![0, 64, 128, 255]),
    ));

    let meta = FileMetaTableBuilder::new()
        .transfer_syntax(EXPLICIT_VR_LITTLE_ENDIAN.uid())
        .media_storage_sop_class_uid("1.2.840.10008.5.1.4.1.1.7")
        .media_storage_sop_instance_uid(sop_uid)
        .build()
        .expect("meta");

    let mut file_obj = FileDicomObject::new_empty_with_dict_and_meta(StandardDataDictionary, meta);
    for elem in obj {
        file_obj.put(elem);
    }
    file_obj.write_to_file(path).expect("write test dicom");
}

fn base_cli(source: &Path) -> Cli {
    Cli {
        source: source.to_path_buf(),
        destination: None,
        send: None,
        unzip: false,
        compress: false,
        decompress: false,
        config: PathBuf::from("dcmsort.toml"),
        yes: true,
        replace: false,
        no_size: false,
        json: false,
        verbose: false,
    }
}

#[test]
fn sorting_builds_the_patient_study_series_layout() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");
    fs::create_dir(source.path().join("nested")).expect("mkdir");
    write_sample(&source.path().join("a.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");
    write_sample(
        &source.path().join("nested").join("b.dcm"),
        Some("Doe^John"),
        "1.2.3.9",
        "4",
        "1",
    );
    fs::write(source.path().join("notes.txt"), b"not dicom").expect("write txt");

    let mut cli = base_cli(source.path());
    cli.destination = Some(dest.path().to_path_buf());
    let summary = run(&cli).expect("run");

    assert_eq!(summary.files_seen, 3);
    assert_eq!(summary.dicom_files, 2);
    assert_eq!(summary.non_dicom_skipped, 1);
    assert_eq!(summary.copied, 2);
    assert!(summary.is_clean());

    assert!(dest
        .path()
        .join("Doe_John/CT_Chest_PA_20240101/3/7_1_2_3_4.dcm")
        .is_file());
    assert!(dest
        .path()
        .join("Doe_John/CT_Chest_PA_20240101/4/1_1_2_3_9.dcm")
        .is_file());
    assert!(!dest.path().join("notes.txt").exists());
}

#[test]
fn second_run_skips_files_already_sorted() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");
    write_sample(&source.path().join("a.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");
    write_sample(&source.path().join("b.dcm"), Some("Doe^John"), "1.2.3.5", "3", "8");

    let mut cli = base_cli(source.path());
    cli.destination = Some(dest.path().to_path_buf());
    let first = run(&cli).expect("first run");
    assert_eq!(first.copied, 2);

    let second = run(&cli).expect("second run");
    assert_eq!(second.copied, 0);
    assert_eq!(second.skipped_existing, 2);
    assert!(second.is_clean());
}

#[test]
fn files_without_identity_tags_are_skipped_not_failed() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");
    write_sample(&source.path().join("named.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");
    write_sample(&source.path().join("nameless.dcm"), None, "1.2.3.5", "3", "8");

    let mut cli = base_cli(source.path());
    cli.destination = Some(dest.path().to_path_buf());
    let summary = run(&cli).expect("run");

    assert_eq!(summary.copied, 1);
    assert_eq!(summary.skipped_missing_identity, 1);
    assert!(summary.is_clean());
}

#[test]
fn corrupt_files_are_recorded_and_the_run_continues() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");
    write_sample(&source.path().join("good.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");
    fs::write(source.path().join("bad.dcm"), b"garbage").expect("write bad");

    let mut cli = base_cli(source.path());
    cli.destination = Some(dest.path().to_path_buf());
    let summary = run(&cli).expect("run");

    assert_eq!(summary.copied, 1);
    assert_eq!(summary.failures.len(), 1);
    assert!(summary.failures[0].path.ends_with("bad.dcm"));
    assert!(!summary.is_clean());
}

#[test]
fn archive_members_sort_into_the_same_layout_as_loose_files() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");
    write_sample(&source.path().join("loose.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");

    let staging = tempdir().expect("staging");
    let member = staging.path().join("member.dcm");
    write_sample(&member, Some("Doe^John"), "1.2.3.5", "3", "8");
    let bytes = fs::read(&member).expect("read member");

    let file = File::create(source.path().join("study.zip")).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("inner/member.dcm", options).expect("start member");
    zip.write_all(&bytes).expect("write member");
    zip.finish().expect("finish zip");

    let mut cli = base_cli(source.path());
    cli.destination = Some(dest.path().to_path_buf());
    cli.unzip = true;
    let summary = run(&cli).expect("run");

    assert_eq!(summary.archives_found, 1);
    assert_eq!(summary.archives_unpacked, 1);
    assert_eq!(summary.copied, 2);
    assert!(summary.is_clean());

    // Both land under the same naming rule; the archive itself is not copied.
    assert!(dest
        .path()
        .join("Doe_John/CT_Chest_PA_20240101/3/7_1_2_3_4.dcm")
        .is_file());
    assert!(dest
        .path()
        .join("Doe_John/CT_Chest_PA_20240101/3/8_1_2_3_5.dcm")
        .is_file());
    assert!(!dest.path().join("study.zip").exists());
}

#[test]
fn archives_stay_untouched_without_the_unzip_flag() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");

    let staging = tempdir().expect("staging");
    let member = staging.path().join("member.dcm");
    write_sample(&member, Some("Doe^John"), "1.2.3.5", "3", "8");
    let bytes = fs::read(&member).expect("read member");

    let file = File::create(source.path().join("study.zip")).expect("create zip");
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    zip.start_file("member.dcm", options).expect("start member");
    zip.write_all(&bytes).expect("write member");
    zip.finish().expect("finish zip");

    let mut cli = base_cli(source.path());
    cli.destination = Some(dest.path().to_path_buf());
    let summary = run(&cli).expect("run");

    assert_eq!(summary.archives_found, 1);
    assert_eq!(summary.archives_unpacked, 0);
    assert_eq!(summary.copied, 0);
}

#[test]
fn missing_source_is_a_fatal_error() {
    let dest = tempdir().expect("dest");
    let mut cli = base_cli(Path::new("/definitely/not/here"));
    cli.destination = Some(dest.path().to_path_buf());
    assert!(run(&cli).is_err());
}

#[test]
fn nested_destination_directories_are_created() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");
    write_sample(&source.path().join("a.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");

    let deep = dest.path().join("sorted").join("2024").join("batch-1");
    let mut cli = base_cli(source.path());
    cli.destination = Some(deep.clone());
    let summary = run(&cli).expect("run");

    assert_eq!(summary.copied, 1);
    assert!(deep.join("Doe_John/CT_Chest_PA_20240101/3/7_1_2_3_4.dcm").is_file());
}

#[test]
fn destination_inside_the_source_is_not_rescanned() {
    let source = tempdir().expect("source");
    write_sample(&source.path().join("a.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");

    let mut cli = base_cli(source.path());
    cli.destination = Some(source.path().join("sorted"));
    let first = run(&cli).expect("first run");
    assert_eq!(first.copied, 1);

    // The sorted tree now lives inside the source; a re-run must not pick it
    // up as new input.
    let second = run(&cli).expect("second run");
    assert_eq!(second.files_seen, 1);
    assert_eq!(second.copied, 0);
    assert_eq!(second.skipped_existing, 1);
}

#[test]
fn replace_clears_stale_destination_content() {
    let source = tempdir().expect("source");
    let dest = tempdir().expect("dest");
    write_sample(&source.path().join("a.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");
    let stale = dest.path().join("stale.txt");
    fs::write(&stale, b"old run").expect("write stale");

    let mut cli = base_cli(source.path());
    cli.destination = Some(dest.path().to_path_buf());
    cli.replace = true;
    let summary = run(&cli).expect("run");

    assert_eq!(summary.copied, 1);
    assert!(!stale.exists());
    assert!(dest
        .path()
        .join("Doe_John/CT_Chest_PA_20240101/3/7_1_2_3_4.dcm")
        .is_file());
}

#[test]
fn send_mode_fails_fast_when_the_transport_is_missing() {
    let source = tempdir().expect("source");
    write_sample(&source.path().join("a.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");

    let config_path = source.path().join("dcmsort.toml");
    fs::write(
        &config_path,
        r#"
[toolkit]
bin_dir = "/nonexistent/dcmtk/bin"

[local]
ae_title = "TESTSCU"

[nodes.main-pacs]
ae_title = "ORTHANC"
host = "127.0.0.1"
port = 4242
"#,
    )
    .expect("write config");

    let mut cli = base_cli(source.path());
    cli.send = Some("main-pacs".into());
    cli.config = config_path;
    let err = run(&cli).expect_err("transport check must fail");
    assert!(format!("{:#}", err).contains("dcmsend"));
}

#[test]
fn send_mode_rejects_unknown_node_aliases() {
    let source = tempdir().expect("source");
    write_sample(&source.path().join("a.dcm"), Some("Doe^John"), "1.2.3.4", "3", "7");

    let config_path = source.path().join("dcmsort.toml");
    fs::write(
        &config_path,
        r#"
[nodes.main-pacs]
ae_title = "ORTHANC"
host = "127.0.0.1"
port = 4242
"#,
    )
    .expect("write config");

    let mut cli = base_cli(source.path());
    cli.send = Some("wrong-alias".into());
    cli.config = config_path;
    let err = run(&cli).expect_err("unknown alias must fail");
    assert!(format!("{:#}", err).contains("wrong-alias"));
}

#[test]
fn rle_compression_round_trips_pixel_data() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("sample.dcm");
    write_sample(&path, Some("Doe^John"), "1.2.3.4", "3", "7");

    let mut summary = RunSummary::default();
    transcode::compress_tree(dir.path(), &mut summary);
    assert_eq!(summary.compressed, 1);
    assert!(summary.is_clean());

    let compressed = open_file(&path).expect("open compressed");
    assert_eq!(compressed.meta().transfer_syntax(), RLE_LOSSLESS.uid());

    let options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::None)
        .with_voi_lut(VoiLutOption::Identity);
    let decoded = compressed.decode_pixel_data().expect("decode rle");
    let pixels = decoded.to_vec_with_options::<u8>(&options).expect("pixels");
    assert_eq!(pixels, vec![0, 64, 128, 255]);

    let mut summary = RunSummary::default();
    transcode::decompress_tree(dir.path(), &mut summary);
    assert_eq!(summary.decompressed, 1);
    assert!(summary.is_clean());

    let restored = open_file(&path).expect("open restored");
    assert_eq!(
        restored.meta().transfer_syntax(),
        EXPLICIT_VR_LITTLE_ENDIAN.uid()
    );
    let bytes = restored
        .element(Tag(0x7FE0, 0x0010))
        .expect("pixels")
        .to_bytes()
        .expect("bytes")
        .into_owned();
    assert_eq!(bytes, vec![0, 64, 128, 255]);
}

#[test]
fn compressing_twice_counts_the_second_pass_as_already_done() {
    let dir = tempdir().expect("dir");
    let path = dir.path().join("sample.dcm");
    write_sample(&path, Some("Doe^John"), "1.2.3.4", "3", "7");

    let mut summary = RunSummary::default();
    transcode::compress_tree(dir.path(), &mut summary);
    assert_eq!(summary.compressed, 1);

    let mut summary = RunSummary::default();
    transcode::compress_tree(dir.path(), &mut summary);
    assert_eq!(summary.compressed, 0);
    assert_eq!(summary.already_in_target_syntax, 1);
    assert!(summary.is_clean());
}
