//! Ancestor data: one row per inferred ancestor.
//!
//! An ancestor covers the half-open interval `[start, end)` of the
//! inference sites of a finalized [`SampleData`]. Only the haplotype values
//! inside the interval are stored; [`expand_haplotype`] pads them back to
//! full width with [`UNKNOWN_ALLELE`].

use crate::container::{typed, DataContainer, Format};
use crate::samples::SampleData;
use crate::writer::{BufferedItemWriter, Record};
use gs_array::{ChunkedArray, Column, DType, Value};
use gs_common::{ContainerId, Error, FormatVersion, Result};
use gs_config::StoreOptions;
use serde_json::Value as JsonValue;
use std::fmt;
use std::path::Path;
use tracing::info;

pub const START: &str = "start";
pub const END: &str = "end";
pub const TIME: &str = "time";
pub const FOCAL_SITES: &str = "focal_sites";
pub const ANCESTOR: &str = "ancestor";

pub const SAMPLE_DATA_UUID_KEY: &str = "sample_data_uuid";
pub const NUM_SITES_KEY: &str = "num_sites";

/// Haplotype value outside an ancestor's interval.
pub const UNKNOWN_ALLELE: u8 = 255;

const ALL_ARRAYS: [&str; 5] = [START, END, TIME, FOCAL_SITES, ANCESTOR];

#[derive(Debug)]
pub struct AncestorDataFormat;

impl Format for AncestorDataFormat {
    const NAME: &'static str = "genostore-ancestor-data";
    const VERSION: FormatVersion = FormatVersion::new(1, 0);
}

struct AncestorRecord {
    start: i32,
    end: i32,
    time: f64,
    focal_sites: Vec<i32>,
    haplotype: Vec<u8>,
}

impl Record for AncestorRecord {
    const COLUMNS: &'static [&'static str] = &[START, END, TIME, FOCAL_SITES, ANCESTOR];

    fn into_values(self) -> Vec<Value> {
        vec![
            Value::Int32(self.start),
            Value::Int32(self.end),
            Value::Float64(self.time),
            Value::Int32s(self.focal_sites),
            Value::UInt8s(self.haplotype),
        ]
    }
}

/// Pad an interval haplotype to `num_sites` values.
pub fn expand_haplotype(start: usize, haplotype: &[u8], num_sites: usize) -> Vec<u8> {
    let mut full = vec![UNKNOWN_ALLELE; num_sites];
    let end = (start + haplotype.len()).min(num_sites);
    if start < end {
        full[start..end].copy_from_slice(&haplotype[..end - start]);
    }
    full
}

fn to_i32(value: usize, what: &str) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::Validation(format!("{what} {value} exceeds i32 range")))
}

/// Ancestor data container.
#[derive(Debug)]
pub struct AncestorData {
    container: DataContainer<AncestorDataFormat>,
    writer: Option<BufferedItemWriter<AncestorRecord>>,
    sample_data_uuid: ContainerId,
    num_sites: usize,
    num_ancestors: usize,
}

impl AncestorData {
    /// Create ancestor data for the inference sites of `input`, which must
    /// be finalized.
    pub fn initialise(input: &SampleData, path: Option<&Path>, options: StoreOptions) -> Result<Self> {
        if !input.is_finalized() {
            return Err(Error::Schema(
                "sample data must be finalized before building ancestors".to_string(),
            ));
        }
        let num_sites = input.num_inference_sites()?;
        to_i32(num_sites, "num_sites")?;

        let container = DataContainer::<AncestorDataFormat>::create(path, options.clone())?;
        container.set_attr(SAMPLE_DATA_UUID_KEY, JsonValue::from(input.uuid().as_str()))?;
        container.set_attr(NUM_SITES_KEY, JsonValue::from(num_sites))?;

        let columns = vec![
            (START, container.create_array(START, DType::Int32)?),
            (END, container.create_array(END, DType::Int32)?),
            (TIME, container.create_array(TIME, DType::Float64)?),
            (FOCAL_SITES, container.create_array(FOCAL_SITES, DType::RaggedInt32)?),
            (ANCESTOR, container.create_array(ANCESTOR, DType::RaggedUInt8)?),
        ];
        let writer = BufferedItemWriter::new(columns, options.num_flush_threads)?;
        Ok(Self {
            container,
            writer: Some(writer),
            sample_data_uuid: input.uuid().clone(),
            num_sites,
            num_ancestors: 0,
        })
    }

    /// Open a finalized ancestor data file read-only.
    pub fn load(path: &Path) -> Result<Self> {
        let container = DataContainer::<AncestorDataFormat>::load(path)?;
        let missing = |key: &str| Error::Storage(format!("{} has no {key}", path.display()));
        let sample_data_uuid = container
            .attr(SAMPLE_DATA_UUID_KEY)
            .and_then(|v| v.as_str().and_then(ContainerId::parse))
            .ok_or_else(|| missing(SAMPLE_DATA_UUID_KEY))?;
        let num_sites = container
            .attr(NUM_SITES_KEY)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| missing(NUM_SITES_KEY))? as usize;
        let num_ancestors = container.array(START)?.len();
        Ok(Self {
            container,
            writer: None,
            sample_data_uuid,
            num_sites,
            num_ancestors,
        })
    }

    pub fn container(&self) -> &DataContainer<AncestorDataFormat> {
        &self.container
    }

    pub fn uuid(&self) -> &ContainerId {
        self.container.uuid()
    }

    pub fn is_finalized(&self) -> bool {
        self.container.is_finalized()
    }

    /// Uuid of the sample data these ancestors were built from.
    pub fn sample_data_uuid(&self) -> &ContainerId {
        &self.sample_data_uuid
    }

    /// Number of inference sites in the source sample data.
    pub fn num_sites(&self) -> usize {
        self.num_sites
    }

    pub fn num_ancestors(&self) -> usize {
        self.writer
            .as_ref()
            .map_or(self.num_ancestors, BufferedItemWriter::total_items)
    }

    /// Add an ancestor and return its index.
    ///
    /// `haplotype` holds either the `end - start` values of the interval or
    /// all `num_sites` values, in which case only the interval is kept.
    /// Focal sites are absolute site indices.
    pub fn add_ancestor(
        &mut self,
        start: usize,
        end: usize,
        time: f64,
        focal_sites: &[usize],
        haplotype: &[u8],
    ) -> Result<usize> {
        self.container.check_write_mode()?;
        if start >= end || end > self.num_sites {
            return Err(Error::Validation(format!(
                "ancestor interval [{start}, {end}) invalid: need start < end <= num_sites ({})",
                self.num_sites
            )));
        }
        if !time.is_finite() || time <= 0.0 {
            return Err(Error::Validation(format!(
                "ancestor time must be finite and > 0, got {time}"
            )));
        }
        let interval = if haplotype.len() == end - start {
            haplotype
        } else if haplotype.len() == self.num_sites {
            &haplotype[start..end]
        } else {
            return Err(Error::Validation(format!(
                "haplotype has {} values, expected {} (interval) or {} (all sites)",
                haplotype.len(),
                end - start,
                self.num_sites
            )));
        };
        if let Some((offset, &value)) = interval.iter().enumerate().find(|(_, &v)| v > 1) {
            return Err(Error::Validation(format!(
                "haplotype value {value} at site {} outside {{0, 1}}",
                start + offset
            )));
        }
        for &site in focal_sites {
            if site < start || site >= end {
                return Err(Error::Validation(format!(
                    "focal site {site} outside ancestor interval [{start}, {end})"
                )));
            }
            if interval[site - start] != 1 {
                return Err(Error::Validation(format!(
                    "focal site {site} must carry the derived allele"
                )));
            }
        }
        let record = AncestorRecord {
            start: to_i32(start, "start")?,
            end: to_i32(end, "end")?,
            time,
            focal_sites: focal_sites
                .iter()
                .map(|&s| to_i32(s, "focal site"))
                .collect::<Result<_>>()?,
            haplotype: interval.to_vec(),
        };

        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| Error::Schema("ancestor writer is closed".to_string()))?;
        writer.add(record)
    }

    /// Drain the writer and finalize the container.
    pub fn finalise(&mut self) -> Result<()> {
        self.container.check_write_mode()?;
        // Keep the writer until the container is sealed: a failed flush
        // must fail again on retry.
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
            self.num_ancestors = writer.total_items();
        }
        self.container.finalise()?;
        self.writer = None;
        info!(
            num_ancestors = self.num_ancestors,
            sample_data = %self.sample_data_uuid,
            "ancestor data finalized"
        );
        Ok(())
    }

    /// Check that these ancestors were built from `input`.
    pub fn check_provenance(&self, input: &SampleData) -> Result<()> {
        if self.sample_data_uuid != *input.uuid() {
            return Err(Error::Provenance {
                field: SAMPLE_DATA_UUID_KEY,
                expected: input.uuid().to_string(),
                actual: self.sample_data_uuid.to_string(),
            });
        }
        let expected = input.num_inference_sites()?;
        if self.num_sites != expected {
            return Err(Error::Provenance {
                field: NUM_SITES_KEY,
                expected: expected.to_string(),
                actual: self.num_sites.to_string(),
            });
        }
        Ok(())
    }

    fn open_array(&self, path: &str) -> Result<ChunkedArray> {
        self.container.array(path)
    }

    pub fn start(&self) -> Result<Vec<i32>> {
        let column = self.container.read_column(START)?;
        Ok(typed(START, &column, Column::as_i32)?.to_vec())
    }

    pub fn end(&self) -> Result<Vec<i32>> {
        let column = self.container.read_column(END)?;
        Ok(typed(END, &column, Column::as_i32)?.to_vec())
    }

    pub fn time(&self) -> Result<Vec<f64>> {
        let column = self.container.read_column(TIME)?;
        Ok(typed(TIME, &column, Column::as_f64)?.to_vec())
    }

    pub fn focal_sites(&self) -> Result<Vec<Vec<i32>>> {
        let column = self.container.read_column(FOCAL_SITES)?;
        Ok(typed(FOCAL_SITES, &column, Column::as_ragged_i32)?.to_vec())
    }

    /// Scan the stored interval haplotypes, one chunk at a time.
    pub fn ancestors(&self) -> Result<AncestorIter> {
        self.container.check_finalized()?;
        Ok(AncestorIter {
            array: self.open_array(ANCESTOR)?,
            len: self.num_ancestors,
            next: 0,
            chunk: Vec::new(),
            chunk_pos: 0,
            failed: false,
        })
    }

    /// True if both containers hold the same rows and provenance.
    pub fn data_equal(&self, other: &AncestorData) -> Result<bool> {
        if self.num_sites != other.num_sites
            || self.sample_data_uuid != other.sample_data_uuid
            || self.num_ancestors() != other.num_ancestors()
        {
            return Ok(false);
        }
        self.container.arrays_equal(&other.container, &ALL_ARRAYS)
    }
}

impl PartialEq for AncestorData {
    fn eq(&self, other: &Self) -> bool {
        self.container.same_identity(&other.container) && self.data_equal(other).unwrap_or(false)
    }
}

impl fmt::Display for AncestorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts = [
            ("sample_data_uuid", self.sample_data_uuid.to_string()),
            ("num_sites", self.num_sites.to_string()),
            ("num_ancestors", self.num_ancestors().to_string()),
        ];
        self.container.write_summary(f, &counts)
    }
}

/// Iterator returned by [`AncestorData::ancestors`].
#[derive(Debug)]
pub struct AncestorIter {
    array: ChunkedArray,
    len: usize,
    next: usize,
    chunk: Vec<Vec<u8>>,
    chunk_pos: usize,
    failed: bool,
}

impl Iterator for AncestorIter {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.len {
            return None;
        }
        if self.chunk_pos == self.chunk.len() {
            let index = self.next / self.array.chunk_rows();
            let loaded = self
                .array
                .read_chunk(index)
                .and_then(|c| Ok(typed(ANCESTOR, &c, Column::as_ragged_u8)?.to_vec()));
            match loaded {
                Ok(rows) => {
                    self.chunk = rows;
                    self.chunk_pos = 0;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let haplotype = std::mem::take(&mut self.chunk[self.chunk_pos]);
        self.chunk_pos += 1;
        self.next += 1;
        Some(Ok(haplotype))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = if self.failed { 0 } else { self.len - self.next };
        (remaining, Some(remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data(num_inference_sites: usize) -> SampleData {
        let options = StoreOptions::default().with_chunk_size(3);
        let mut data = SampleData::initialise_with_samples(None, 0.0, 2, options).unwrap();
        for i in 0..num_inference_sites {
            data.add_site(i as f64, &["A", "T"], &[0, 1], None).unwrap();
        }
        data.finalise().unwrap();
        data
    }

    fn ancestors(input: &SampleData) -> AncestorData {
        AncestorData::initialise(input, None, StoreOptions::default().with_chunk_size(2)).unwrap()
    }

    #[test]
    fn test_expand_haplotype() {
        assert_eq!(
            expand_haplotype(2, &[1, 1, 0], 8),
            vec![255, 255, 1, 1, 0, 255, 255, 255]
        );
        assert_eq!(expand_haplotype(0, &[], 2), vec![255, 255]);
    }

    #[test]
    fn test_requires_finalized_input() {
        let data = SampleData::initialise_with_samples(None, 0.0, 2, StoreOptions::default()).unwrap();
        assert!(matches!(
            AncestorData::initialise(&data, None, StoreOptions::default()),
            Err(Error::Schema(_))
        ));
    }

    #[test]
    fn test_interval_and_full_width_haplotypes() {
        let input = sample_data(8);
        let mut data = ancestors(&input);
        data.add_ancestor(2, 5, 1.0, &[2, 3], &[1, 1, 0]).unwrap();
        data.add_ancestor(0, 3, 0.5, &[1], &[0, 1, 0, 255, 255, 255, 255, 255])
            .unwrap();
        data.add_ancestor(4, 8, 0.25, &[], &[0, 0, 0, 0]).unwrap();
        data.finalise().unwrap();

        let stored: Vec<Vec<u8>> = data.ancestors().unwrap().map(Result::unwrap).collect();
        assert_eq!(stored, vec![vec![1, 1, 0], vec![0, 1, 0], vec![0, 0, 0, 0]]);
        assert_eq!(data.start().unwrap(), vec![2, 0, 4]);
        assert_eq!(data.end().unwrap(), vec![5, 3, 8]);
        assert_eq!(data.time().unwrap(), vec![1.0, 0.5, 0.25]);
        assert_eq!(data.focal_sites().unwrap(), vec![vec![2, 3], vec![1], vec![]]);
    }

    #[test]
    fn test_rejections() {
        let input = sample_data(4);
        let mut data = ancestors(&input);
        let bad: Vec<(usize, usize, f64, Vec<usize>, Vec<u8>)> = vec![
            (3, 2, 1.0, vec![], vec![]),
            (1, 1, 1.0, vec![], vec![]),
            (0, 5, 1.0, vec![], vec![0; 5]),
            (0, 2, 0.0, vec![], vec![0, 0]),
            (0, 2, f64::INFINITY, vec![], vec![0, 0]),
            (0, 2, 1.0, vec![], vec![0, 0, 0]),
            (0, 2, 1.0, vec![], vec![0, 2]),
            (0, 2, 1.0, vec![2], vec![1, 1]),
            (0, 2, 1.0, vec![0], vec![0, 1]),
        ];
        for (start, end, time, focal, haplotype) in bad {
            let err = data.add_ancestor(start, end, time, &focal, &haplotype).unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{err}");
        }
        assert_eq!(data.num_ancestors(), 0);
    }

    #[test]
    fn test_provenance() {
        let input = sample_data(3);
        let other = sample_data(3);
        let mut data = ancestors(&input);
        data.finalise().unwrap();
        assert_eq!(data.sample_data_uuid(), input.uuid());
        data.check_provenance(&input).unwrap();
        assert!(matches!(
            data.check_provenance(&other),
            Err(Error::Provenance { field: SAMPLE_DATA_UUID_KEY, .. })
        ));
    }

    #[test]
    fn test_finalise_retry_after_failed_flush() {
        let input = sample_data(4);
        let mut data = ancestors(&input);
        data.add_ancestor(0, 2, 1.0, &[], &[0, 1]).unwrap();
        data.container.seal_store();

        assert!(matches!(data.finalise(), Err(Error::Schema(_))));
        assert!(matches!(data.finalise(), Err(Error::Concurrency(ref m)) if m.contains("failed earlier")));
        assert!(!data.is_finalized());
    }

    #[test]
    fn test_add_after_finalise() {
        let input = sample_data(2);
        let mut data = ancestors(&input);
        data.finalise().unwrap();
        assert!(matches!(
            data.add_ancestor(0, 1, 1.0, &[], &[0]),
            Err(Error::Schema(_))
        ));
    }
}
