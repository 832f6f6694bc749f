//! Property tests for the buffered item writer: row order, chunk-size
//! agreement, and back-pressure.

use gs_array::{ArraySpec, ChunkedArray, Column, DType, Store, Value};
use gs_config::CodecConfig;
use gs_core::{BufferedItemWriter, Error, Record};
use proptest::prelude::*;

struct Row {
    id: i32,
    tag: Vec<u8>,
}

impl Record for Row {
    const COLUMNS: &'static [&'static str] = &["id", "tag"];

    fn into_values(self) -> Vec<Value> {
        vec![Value::Int32(self.id), Value::UInt8s(self.tag)]
    }
}

fn columns(chunk_id: usize, chunk_tag: usize, codec: CodecConfig) -> (ChunkedArray, ChunkedArray) {
    let store = Store::memory();
    let id = ChunkedArray::create(&store, "id", ArraySpec::new(DType::Int32, chunk_id, codec)).unwrap();
    let tag = ChunkedArray::create(&store, "tag", ArraySpec::new(DType::RaggedUInt8, chunk_tag, codec)).unwrap();
    (id, tag)
}

fn tag_for(i: usize) -> Vec<u8> {
    vec![(i % 251) as u8; i % 4]
}

fn write_rows(num_threads: usize, chunk_size: usize, n: usize) -> (ChunkedArray, ChunkedArray, usize) {
    let (id, tag) = columns(chunk_size, chunk_size, CodecConfig::Zstd { level: 1 });
    let mut writer = BufferedItemWriter::<Row>::new(vec![("id", id.clone()), ("tag", tag.clone())], num_threads).unwrap();
    for i in 0..n {
        writer.add(Row { id: i as i32, tag: tag_for(i) }).unwrap();
    }
    writer.flush().unwrap();
    let max_in_flight = writer.stats().max_in_flight;
    (id, tag, max_in_flight)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Row `i` of every array holds the `i`-th added item, for any thread count.
    #[test]
    fn rows_land_in_add_order(
        num_threads in prop::sample::select(vec![0usize, 1, 2, 4]),
        chunk_size in 1usize..9,
        n in 0usize..120,
    ) {
        let (id, tag, max_in_flight) = write_rows(num_threads, chunk_size, n);
        prop_assert_eq!(id.len(), n);
        prop_assert_eq!(tag.len(), n);
        prop_assert_eq!(id.read_all().unwrap(), Column::Int32((0..n as i32).collect()));
        prop_assert_eq!(tag.read_all().unwrap(), Column::RaggedUInt8((0..n).map(tag_for).collect()));
        prop_assert!(max_in_flight <= num_threads);
    }
}

#[test]
fn chunk_sizes_must_agree() {
    let (id, tag) = columns(4, 8, CodecConfig::None);
    for threads in [0, 2] {
        let err = BufferedItemWriter::<Row>::new(vec![("id", id.clone()), ("tag", tag.clone())], threads).unwrap_err();
        assert!(matches!(err, Error::Schema(_)), "{err}");
    }
}

#[test]
fn back_pressure_never_exceeds_thread_count() {
    for threads in [1, 2, 4] {
        let (id, _, max_in_flight) = write_rows(threads, 3, 1000);
        assert!(max_in_flight >= 1);
        assert!(max_in_flight <= threads, "{max_in_flight} > {threads}");
        assert_eq!(id.len(), 1000);
    }
}

#[test]
fn add_after_flush_is_rejected() {
    let (id, tag) = columns(2, 2, CodecConfig::None);
    let mut writer = BufferedItemWriter::<Row>::new(vec![("id", id.clone()), ("tag", tag)], 2).unwrap();
    writer.add(Row { id: 7, tag: vec![] }).unwrap();
    writer.flush().unwrap();
    assert!(matches!(writer.add(Row { id: 8, tag: vec![] }), Err(Error::Schema(_))));
    assert_eq!(id.read_all().unwrap(), Column::Int32(vec![7]));
}
