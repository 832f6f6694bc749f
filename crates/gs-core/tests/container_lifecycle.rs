//! File-backed lifecycle: finalize, compaction, reload, and format checks.

use gs_array::store::{LOCK_SUFFIX, STAGING_SUFFIX};
use gs_common::FormatVersion;
use gs_core::samples::SampleDataFormat;
use gs_core::{
    AncestorData, DataContainer, Error, Format, SampleData, SiteFilter, StoreOptions,
};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

fn lock_file(path: &Path) -> PathBuf {
    sibling(path, LOCK_SUFFIX)
}

fn build(path: Option<&Path>, threads: usize) -> SampleData {
    let options = StoreOptions::default()
        .with_chunk_size(4)
        .with_flush_threads(threads);
    let mut data = SampleData::initialise(path, 1000.0, options).unwrap();
    data.add_population(Some(json!({"name": "CEU"}))).unwrap();
    data.add_population(Some(json!({"name": "YRI"}))).unwrap();
    for i in 0..6 {
        data.add_sample(i % 2, Some(json!({"sample": i}))).unwrap();
    }
    for site in 0..37usize {
        let genotypes: Vec<u8> = (0..6).map(|s| u8::from((site + s) % 3 == 0)).collect();
        data.add_site(site as f64 * 10.0, &["A", "G"], &genotypes, None)
            .unwrap();
    }
    data.finalise().unwrap();
    data
}

#[test]
fn finalize_compacts_and_reload_is_equal() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.gs");
    let data = build(Some(&path), 2);

    assert!(!lock_file(&path).exists());
    assert!(!sibling(&path, STAGING_SUFFIX).exists());
    let report = data.container().compaction_report().unwrap();
    assert!(report.live_bytes > 0);
    assert!(report.index_bytes > 0);
    assert_eq!(fs::metadata(&path).unwrap().len(), report.final_bytes);

    let loaded = SampleData::load(&path).unwrap();
    assert!(loaded.data_equal(&data).unwrap());
    assert!(loaded == data);
    assert_eq!(loaded.uuid(), data.uuid());
    assert_eq!(loaded.num_sites(), 37);
    assert_eq!(loaded.num_inference_sites().unwrap(), data.num_inference_sites().unwrap());
}

#[test]
fn memory_and_file_builds_hold_the_same_data() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.gs");
    let on_disk = build(Some(&path), 4);
    let in_memory = build(None, 0);
    assert!(on_disk.data_equal(&in_memory).unwrap());
    assert!(on_disk != in_memory);
}

#[test]
fn finalized_data_is_immutable() {
    let mut data = build(None, 1);
    assert!(matches!(data.add_population(None), Err(Error::Schema(_))));
    assert!(matches!(data.add_sample(-1, None), Err(Error::Schema(_))));
    assert!(matches!(
        data.add_site(1.0, &["A", "T"], &[0; 6], None),
        Err(Error::Schema(_))
    ));
    assert!(matches!(data.finalise(), Err(Error::Schema(_))));
    assert_eq!(data.genotypes(SiteFilter::All).unwrap().count(), 37);
}

#[test]
fn open_lock_blocks_second_writer() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.gs");
    let first = SampleData::initialise(Some(&path), 0.0, StoreOptions::default()).unwrap();
    assert!(lock_file(&path).exists());
    assert!(matches!(
        SampleData::initialise(Some(&path), 0.0, StoreOptions::default()),
        Err(Error::Storage(_))
    ));
    drop(first);
}

#[test]
fn load_rejects_foreign_format() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.gs");
    build(Some(&path), 0);
    assert!(matches!(AncestorData::load(&path), Err(Error::Format { .. })));
}

struct SkewedSampleData<const MAJOR: u32, const MINOR: u32>;

impl<const MAJOR: u32, const MINOR: u32> Format for SkewedSampleData<MAJOR, MINOR> {
    const NAME: &'static str = SampleDataFormat::NAME;
    const VERSION: FormatVersion = FormatVersion::new(MAJOR, MINOR);
}

fn write_skewed<F: Format>(dir: &TempDir, name: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut container = DataContainer::<F>::create(Some(&path), StoreOptions::default()).unwrap();
    container.finalise().unwrap();
    path
}

#[test]
fn major_version_skew_is_rejected() {
    let dir = TempDir::new().unwrap();
    let newer = write_skewed::<SkewedSampleData<2, 0>>(&dir, "newer.gs");
    let older = write_skewed::<SkewedSampleData<0, 3>>(&dir, "older.gs");

    match DataContainer::<SampleDataFormat>::load(&newer) {
        Err(Error::Version { skew, .. }) => assert_eq!(skew, "new"),
        other => panic!("expected version error, got {other:?}"),
    }
    match DataContainer::<SampleDataFormat>::load(&older) {
        Err(Error::Version { skew, .. }) => assert_eq!(skew, "old"),
        other => panic!("expected version error, got {other:?}"),
    }
}

#[test]
fn minor_version_skew_loads() {
    let dir = TempDir::new().unwrap();
    let path = write_skewed::<SkewedSampleData<1, 9>>(&dir, "minor.gs");
    let container = DataContainer::<SampleDataFormat>::load(&path).unwrap();
    assert_eq!(container.format_version().unwrap(), FormatVersion::new(1, 9));
}

#[test]
fn corrupted_blob_is_detected_on_read() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.gs");
    build(Some(&path), 0);

    // The root group metadata sorts last, just before the index.
    let mut bytes = fs::read(&path).unwrap();
    let trailer = bytes.len() - 24;
    let index_offset = u64::from_le_bytes(bytes[trailer..trailer + 8].try_into().unwrap()) as usize;
    bytes[index_offset - 2] ^= 0x5a;
    fs::write(&path, &bytes).unwrap();

    let err = SampleData::load(&path).unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "{err}");
    assert!(err.to_string().contains("checksum mismatch"));
}

#[test]
fn corrupted_trailer_is_rejected_on_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.gs");
    build(Some(&path), 0);

    let mut bytes = fs::read(&path).unwrap();
    let trailer = bytes.len() - 24;
    bytes[trailer..trailer + 8].copy_from_slice(&u64::MAX.to_le_bytes());
    fs::write(&path, &bytes).unwrap();

    let err = SampleData::load(&path).unwrap_err();
    assert!(matches!(err, Error::Storage(_)), "{err}");
    assert!(err.to_string().contains("corrupted trailer"));
}

#[test]
fn unfinalized_file_cannot_be_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("samples.gs");
    let open = SampleData::initialise(Some(&path), 10.0, StoreOptions::default()).unwrap();
    assert!(sibling(&path, STAGING_SUFFIX).is_dir());
    assert!(matches!(SampleData::load(&path), Err(Error::Storage(_))));
    drop(open);
    assert!(!sibling(&path, STAGING_SUFFIX).exists());
    assert!(!lock_file(&path).exists());
}
