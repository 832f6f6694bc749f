//! Sample data: populations, samples, and per-site genotypes.
//!
//! Rows must be added in phase order. Populations come first; the first
//! [`SampleData::add_sample`] freezes them. The first
//! [`SampleData::add_site`] freezes the samples and fixes the genotype row
//! width at the final sample count. Every `add_*` call validates its row
//! completely before anything is buffered.

use crate::container::{typed, DataContainer, Format};
use crate::writer::{BufferedItemWriter, Record};
use gs_array::{ChunkedArray, Column, DType, Value};
use gs_common::{ContainerId, Error, FormatVersion, Result};
use gs_config::StoreOptions;
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, info};

pub const POPULATION_METADATA: &str = "population/metadata";
pub const SAMPLES_POPULATION: &str = "samples/population";
pub const SAMPLES_METADATA: &str = "samples/metadata";
pub const SITES_POSITION: &str = "sites/position";
pub const SITES_GENOTYPES: &str = "sites/genotypes";
pub const SITES_ALLELES: &str = "sites/alleles";
pub const SITES_METADATA: &str = "sites/metadata";
pub const SITES_INFERENCE: &str = "sites/inference";

/// Root attribute holding the sequence length.
pub const SEQUENCE_LENGTH_KEY: &str = "sequence_length";

/// Population index of a sample that belongs to no population.
pub const NO_POPULATION: i32 = -1;

const ALL_ARRAYS: [&str; 8] = [
    POPULATION_METADATA,
    SAMPLES_POPULATION,
    SAMPLES_METADATA,
    SITES_POSITION,
    SITES_GENOTYPES,
    SITES_ALLELES,
    SITES_METADATA,
    SITES_INFERENCE,
];

#[derive(Debug)]
pub struct SampleDataFormat;

impl Format for SampleDataFormat {
    const NAME: &'static str = "genostore-sample-data";
    const VERSION: FormatVersion = FormatVersion::new(1, 0);
}

struct PopulationRecord {
    metadata: JsonValue,
}

impl Record for PopulationRecord {
    const COLUMNS: &'static [&'static str] = &["metadata"];

    fn into_values(self) -> Vec<Value> {
        vec![Value::Json(self.metadata)]
    }
}

struct SampleRecord {
    population: i32,
    metadata: JsonValue,
}

impl Record for SampleRecord {
    const COLUMNS: &'static [&'static str] = &["population", "metadata"];

    fn into_values(self) -> Vec<Value> {
        vec![Value::Int32(self.population), Value::Json(self.metadata)]
    }
}

struct SiteRecord {
    position: f64,
    genotypes: Vec<u8>,
    alleles: Vec<String>,
    metadata: JsonValue,
    inference: bool,
}

impl Record for SiteRecord {
    const COLUMNS: &'static [&'static str] = &["position", "genotypes", "alleles", "metadata", "inference"];

    fn into_values(self) -> Vec<Value> {
        vec![
            Value::Float64(self.position),
            Value::UInt8s(self.genotypes),
            Value::Json(JsonValue::from(self.alleles)),
            Value::Json(self.metadata),
            Value::from(self.inference),
        ]
    }
}

#[derive(Debug)]
enum Phase {
    Populations(BufferedItemWriter<PopulationRecord>),
    Samples(BufferedItemWriter<SampleRecord>),
    Sites(BufferedItemWriter<SiteRecord>),
    Closed,
}

/// Which sites a genotype scan yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SiteFilter {
    #[default]
    All,
    /// Only inference-eligible sites.
    Inference,
    /// Only sites that are not inference-eligible.
    NonInference,
}

impl SiteFilter {
    fn accepts(self, inference: u8) -> bool {
        match self {
            SiteFilter::All => true,
            SiteFilter::Inference => inference != 0,
            SiteFilter::NonInference => inference == 0,
        }
    }
}

/// A site is usable for inference iff its derived allele is carried by
/// some, but not all, samples.
pub fn is_inference_site(derived_count: usize, num_samples: usize) -> bool {
    derived_count > 0 && derived_count < num_samples
}

/// Metadata must be a JSON object; absent metadata becomes `{}`.
pub(crate) fn check_metadata(metadata: Option<JsonValue>, what: &str) -> Result<JsonValue> {
    match metadata {
        None => Ok(JsonValue::Object(Map::new())),
        Some(JsonValue::Object(m)) => Ok(JsonValue::Object(m)),
        Some(other) => Err(Error::Validation(format!(
            "{what} metadata must be a JSON object, got {other}"
        ))),
    }
}

/// Sample data container.
#[derive(Debug)]
pub struct SampleData {
    container: DataContainer<SampleDataFormat>,
    phase: Phase,
    num_threads: usize,
    num_populations: usize,
    num_samples: usize,
    num_sites: usize,
    sequence_length: f64,
    num_inference_sites: OnceLock<usize>,
}

impl SampleData {
    /// Create an empty sample data container in write mode.
    pub fn initialise(path: Option<&Path>, sequence_length: f64, options: StoreOptions) -> Result<Self> {
        if !sequence_length.is_finite() || sequence_length < 0.0 {
            return Err(Error::Validation(format!(
                "sequence_length must be finite and >= 0, got {sequence_length}"
            )));
        }
        let container = DataContainer::<SampleDataFormat>::create(path, options.clone())?;
        container.set_attr(SEQUENCE_LENGTH_KEY, JsonValue::from(sequence_length))?;

        let population_metadata = container.create_array(POPULATION_METADATA, DType::Json)?;
        container.create_array(SAMPLES_POPULATION, DType::Int32)?;
        container.create_array(SAMPLES_METADATA, DType::Json)?;
        container.create_array(SITES_POSITION, DType::Float64)?;
        container.create_matrix(SITES_GENOTYPES, 0)?;
        container.create_array(SITES_ALLELES, DType::Json)?;
        container.create_array(SITES_METADATA, DType::Json)?;
        container.create_array(SITES_INFERENCE, DType::UInt8)?;

        let writer = BufferedItemWriter::new(
            vec![("metadata", population_metadata)],
            options.num_flush_threads,
        )?;
        Ok(Self {
            container,
            phase: Phase::Populations(writer),
            num_threads: options.num_flush_threads,
            num_populations: 0,
            num_samples: 0,
            num_sites: 0,
            sequence_length,
            num_inference_sites: OnceLock::new(),
        })
    }

    /// Create a container with one default population holding
    /// `num_samples` samples.
    pub fn initialise_with_samples(
        path: Option<&Path>,
        sequence_length: f64,
        num_samples: usize,
        options: StoreOptions,
    ) -> Result<Self> {
        let mut data = Self::initialise(path, sequence_length, options)?;
        let population = data.add_population(None)?;
        let population = i32::try_from(population)
            .map_err(|_| Error::Validation("population index exceeds i32".to_string()))?;
        for _ in 0..num_samples {
            data.add_sample(population, None)?;
        }
        Ok(data)
    }

    /// Open a finalized sample data file read-only.
    pub fn load(path: &Path) -> Result<Self> {
        let container = DataContainer::<SampleDataFormat>::load(path)?;
        let sequence_length = container
            .attr(SEQUENCE_LENGTH_KEY)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| Error::Storage(format!("{} has no {SEQUENCE_LENGTH_KEY}", path.display())))?;
        let num_populations = container.array(POPULATION_METADATA)?.len();
        let num_samples = container.array(SAMPLES_POPULATION)?.len();
        let num_sites = container.array(SITES_POSITION)?.len();
        Ok(Self {
            container,
            phase: Phase::Closed,
            num_threads: 0,
            num_populations,
            num_samples,
            num_sites,
            sequence_length,
            num_inference_sites: OnceLock::new(),
        })
    }

    pub fn container(&self) -> &DataContainer<SampleDataFormat> {
        &self.container
    }

    pub fn uuid(&self) -> &ContainerId {
        self.container.uuid()
    }

    pub fn is_finalized(&self) -> bool {
        self.container.is_finalized()
    }

    pub fn sequence_length(&self) -> f64 {
        self.sequence_length
    }

    pub fn num_populations(&self) -> usize {
        match &self.phase {
            Phase::Populations(writer) => writer.total_items(),
            _ => self.num_populations,
        }
    }

    pub fn num_samples(&self) -> usize {
        match &self.phase {
            Phase::Samples(writer) => writer.total_items(),
            _ => self.num_samples,
        }
    }

    pub fn num_sites(&self) -> usize {
        match &self.phase {
            Phase::Sites(writer) => writer.total_items(),
            _ => self.num_sites,
        }
    }

    fn open_array(&self, path: &str) -> Result<ChunkedArray> {
        self.container.array(path)
    }

    /// Flush whatever writer is active and move to the sample phase.
    fn start_samples(&mut self) -> Result<()> {
        if let Phase::Populations(writer) = &mut self.phase {
            writer.flush()?;
            self.num_populations = writer.total_items();
            let writer = BufferedItemWriter::new(
                vec![
                    ("population", self.open_array(SAMPLES_POPULATION)?),
                    ("metadata", self.open_array(SAMPLES_METADATA)?),
                ],
                self.num_threads,
            )?;
            debug!(num_populations = self.num_populations, "populations frozen");
            self.phase = Phase::Samples(writer);
        }
        Ok(())
    }

    /// Freeze the samples and fix the genotype width.
    fn start_sites(&mut self) -> Result<()> {
        self.start_samples()?;
        if let Phase::Samples(writer) = &mut self.phase {
            writer.flush()?;
            self.num_samples = writer.total_items();
            self.open_array(SITES_GENOTYPES)?.reshape_width(self.num_samples)?;
            let writer = BufferedItemWriter::new(
                vec![
                    ("position", self.open_array(SITES_POSITION)?),
                    ("genotypes", self.open_array(SITES_GENOTYPES)?),
                    ("alleles", self.open_array(SITES_ALLELES)?),
                    ("metadata", self.open_array(SITES_METADATA)?),
                    ("inference", self.open_array(SITES_INFERENCE)?),
                ],
                self.num_threads,
            )?;
            debug!(num_samples = self.num_samples, "samples frozen");
            self.phase = Phase::Sites(writer);
        }
        Ok(())
    }

    /// Add a population and return its index.
    pub fn add_population(&mut self, metadata: Option<JsonValue>) -> Result<usize> {
        self.container.check_write_mode()?;
        let metadata = check_metadata(metadata, "population")?;
        match &mut self.phase {
            Phase::Populations(writer) => writer.add(PopulationRecord { metadata }),
            _ => Err(Error::Schema(
                "cannot add populations once samples have been added".to_string(),
            )),
        }
    }

    /// Add a sample and return its index. `population` is
    /// [`NO_POPULATION`] or the index of an existing population.
    pub fn add_sample(&mut self, population: i32, metadata: Option<JsonValue>) -> Result<usize> {
        self.container.check_write_mode()?;
        if matches!(self.phase, Phase::Sites(_) | Phase::Closed) {
            return Err(Error::Schema(
                "cannot add samples once sites have been added".to_string(),
            ));
        }
        let num_populations = self.num_populations();
        let in_range = usize::try_from(population).is_ok_and(|p| p < num_populations);
        if population != NO_POPULATION && !in_range {
            return Err(Error::Validation(format!(
                "population {population} out of bounds (num_populations = {num_populations})"
            )));
        }
        let metadata = check_metadata(metadata, "sample")?;

        self.start_samples()?;
        match &mut self.phase {
            Phase::Samples(writer) => writer.add(SampleRecord {
                population,
                metadata,
            }),
            _ => Err(Error::Schema("sample writer is not active".to_string())),
        }
    }

    /// Add a site and return its index.
    pub fn add_site(
        &mut self,
        position: f64,
        alleles: &[&str],
        genotypes: &[u8],
        metadata: Option<JsonValue>,
    ) -> Result<usize> {
        self.container.check_write_mode()?;
        if matches!(self.phase, Phase::Closed) {
            return Err(Error::Schema("sample data is closed".to_string()));
        }
        let num_samples = self.num_samples();
        if alleles.is_empty() || alleles.len() > 2 {
            return Err(Error::Validation(format!(
                "only biallelic sites supported: got {} alleles {alleles:?}",
                alleles.len()
            )));
        }
        if genotypes.len() != num_samples {
            return Err(Error::Validation(format!(
                "genotypes have {} values, expected one per sample ({num_samples})",
                genotypes.len()
            )));
        }
        if let Some((sample, g)) = genotypes
            .iter()
            .enumerate()
            .find(|(_, &g)| usize::from(g) >= alleles.len())
        {
            return Err(Error::Validation(format!(
                "genotype {g} of sample {sample} out of bounds for {} alleles",
                alleles.len()
            )));
        }
        if !position.is_finite() || position < 0.0 {
            return Err(Error::Validation(format!(
                "site position must be finite and >= 0, got {position}"
            )));
        }
        if self.sequence_length > 0.0 && position >= self.sequence_length {
            return Err(Error::Validation(format!(
                "site position {position} must be less than sequence_length {}",
                self.sequence_length
            )));
        }
        let metadata = check_metadata(metadata, "site")?;
        let derived = genotypes.iter().filter(|&&g| g != 0).count();

        self.start_sites()?;
        let Phase::Sites(writer) = &mut self.phase else {
            return Err(Error::Schema("site writer is not active".to_string()));
        };
        writer.add(SiteRecord {
            position,
            genotypes: genotypes.to_vec(),
            alleles: alleles.iter().map(|a| a.to_string()).collect(),
            metadata,
            inference: is_inference_site(derived, num_samples),
        })
    }

    /// Drain the active writer and finalize the container.
    pub fn finalise(&mut self) -> Result<()> {
        self.container.check_write_mode()?;
        self.start_sites()?;
        if let Phase::Sites(writer) = &mut self.phase {
            writer.flush()?;
            self.num_sites = writer.total_items();
        }
        self.phase = Phase::Closed;
        self.container.finalise()?;
        info!(
            num_populations = self.num_populations,
            num_samples = self.num_samples,
            num_sites = self.num_sites,
            "sample data finalized"
        );
        Ok(())
    }

    /// Number of inference-eligible sites, computed once.
    pub fn num_inference_sites(&self) -> Result<usize> {
        self.container.check_finalized()?;
        if let Some(&n) = self.num_inference_sites.get() {
            return Ok(n);
        }
        let array = self.open_array(SITES_INFERENCE)?;
        let mut count = 0;
        for index in 0..array.num_chunks() {
            let chunk = array.read_chunk(index)?;
            let flags = typed(SITES_INFERENCE, &chunk, Column::as_u8)?;
            count += flags.iter().filter(|&&f| f != 0).count();
        }
        Ok(*self.num_inference_sites.get_or_init(|| count))
    }

    /// Scan `(site index, genotype row)` pairs, one chunk of sites at a time.
    pub fn genotypes(&self, filter: SiteFilter) -> Result<GenotypeIter> {
        self.container.check_finalized()?;
        Ok(GenotypeIter {
            genotypes: self.open_array(SITES_GENOTYPES)?,
            inference: self.open_array(SITES_INFERENCE)?,
            filter,
            num_sites: self.num_sites,
            next_site: 0,
            block: None,
            failed: false,
        })
    }

    /// Scan per-sample haplotypes restricted to inference sites.
    ///
    /// Samples are processed in blocks of one chunk's worth of columns; a
    /// block decodes only the genotype chunks in its own column range.
    pub fn haplotypes(&self) -> Result<HaplotypeIter> {
        self.container.check_finalized()?;
        let genotypes = self.open_array(SITES_GENOTYPES)?;
        let block_size = genotypes.chunk_rows();
        Ok(HaplotypeIter {
            genotypes,
            inference: self.site_inference()?,
            num_samples: self.num_samples,
            block_size,
            next_sample: 0,
            block: Vec::new(),
            block_pos: 0,
            failed: false,
        })
    }

    pub fn site_positions(&self) -> Result<Vec<f64>> {
        let column = self.container.read_column(SITES_POSITION)?;
        Ok(typed(SITES_POSITION, &column, Column::as_f64)?.to_vec())
    }

    pub fn site_alleles(&self) -> Result<Vec<Vec<String>>> {
        let column = self.container.read_column(SITES_ALLELES)?;
        typed(SITES_ALLELES, &column, Column::as_json)?
            .iter()
            .map(|v| Ok(serde_json::from_value(v.clone())?))
            .collect()
    }

    pub fn site_metadata(&self) -> Result<Vec<JsonValue>> {
        let column = self.container.read_column(SITES_METADATA)?;
        Ok(typed(SITES_METADATA, &column, Column::as_json)?.to_vec())
    }

    pub fn site_inference(&self) -> Result<Vec<bool>> {
        let column = self.container.read_column(SITES_INFERENCE)?;
        Ok(typed(SITES_INFERENCE, &column, Column::as_u8)?
            .iter()
            .map(|&f| f != 0)
            .collect())
    }

    pub fn sample_populations(&self) -> Result<Vec<i32>> {
        let column = self.container.read_column(SAMPLES_POPULATION)?;
        Ok(typed(SAMPLES_POPULATION, &column, Column::as_i32)?.to_vec())
    }

    pub fn sample_metadata(&self) -> Result<Vec<JsonValue>> {
        let column = self.container.read_column(SAMPLES_METADATA)?;
        Ok(typed(SAMPLES_METADATA, &column, Column::as_json)?.to_vec())
    }

    pub fn population_metadata(&self) -> Result<Vec<JsonValue>> {
        let column = self.container.read_column(POPULATION_METADATA)?;
        Ok(typed(POPULATION_METADATA, &column, Column::as_json)?.to_vec())
    }

    /// True if both containers hold the same rows, regardless of identity.
    pub fn data_equal(&self, other: &SampleData) -> Result<bool> {
        if self.num_populations() != other.num_populations()
            || self.num_samples() != other.num_samples()
            || self.num_sites() != other.num_sites()
            || self.sequence_length != other.sequence_length
        {
            return Ok(false);
        }
        self.container.arrays_equal(&other.container, &ALL_ARRAYS)
    }
}

impl PartialEq for SampleData {
    fn eq(&self, other: &Self) -> bool {
        self.container.same_identity(&other.container) && self.data_equal(other).unwrap_or(false)
    }
}

impl fmt::Display for SampleData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut counts = vec![
            ("sequence_length", self.sequence_length.to_string()),
            ("num_populations", self.num_populations().to_string()),
            ("num_samples", self.num_samples().to_string()),
            ("num_sites", self.num_sites().to_string()),
        ];
        if let Ok(n) = self.num_inference_sites() {
            counts.push(("num_inference_sites", n.to_string()));
        }
        self.container.write_summary(f, &counts)
    }
}

/// One loaded chunk of sites.
#[derive(Debug)]
struct SiteBlock {
    first_site: usize,
    genotypes: Column,
    inference: Column,
}

/// Iterator returned by [`SampleData::genotypes`].
#[derive(Debug)]
pub struct GenotypeIter {
    genotypes: ChunkedArray,
    inference: ChunkedArray,
    filter: SiteFilter,
    num_sites: usize,
    next_site: usize,
    block: Option<SiteBlock>,
    failed: bool,
}

impl GenotypeIter {
    fn load_block(&mut self, site: usize) -> Result<&SiteBlock> {
        let c = self.genotypes.chunk_rows();
        let index = site / c;
        let loaded = self.block.as_ref().is_some_and(|b| b.first_site == index * c);
        if !loaded {
            self.block = Some(SiteBlock {
                first_site: index * c,
                genotypes: self.genotypes.read_chunk(index)?,
                inference: self.inference.read_chunk(index)?,
            });
        }
        self.block
            .as_ref()
            .ok_or_else(|| Error::Concurrency("site block vanished".to_string()))
    }
}

impl GenotypeIter {
    /// The genotypes of `site`, or `None` if the filter rejects it.
    fn site_row(&mut self, site: usize) -> Result<Option<Vec<u8>>> {
        let filter = self.filter;
        let block = self.load_block(site)?;
        let row = site - block.first_site;
        let flags = typed(SITES_INFERENCE, &block.inference, Column::as_u8)?;
        let flag = flags.get(row).copied().ok_or_else(|| {
            Error::Storage(format!("'{SITES_INFERENCE}' has no row for site {site}"))
        })?;
        if !filter.accepts(flag) {
            return Ok(None);
        }
        let genotypes = typed(SITES_GENOTYPES, &block.genotypes, |col| col.u8_row(row))?;
        Ok(Some(genotypes.to_vec()))
    }
}

impl Iterator for GenotypeIter {
    type Item = Result<(usize, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.failed && self.next_site < self.num_sites {
            let site = self.next_site;
            self.next_site += 1;
            match self.site_row(site) {
                Ok(Some(genotypes)) => return Some(Ok((site, genotypes))),
                Ok(None) => continue,
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}

/// Iterator returned by [`SampleData::haplotypes`].
#[derive(Debug)]
pub struct HaplotypeIter {
    genotypes: ChunkedArray,
    inference: Vec<bool>,
    num_samples: usize,
    block_size: usize,
    next_sample: usize,
    block: Vec<Vec<u8>>,
    block_pos: usize,
    failed: bool,
}

impl HaplotypeIter {
    /// Gather the haplotypes of samples `first..first + len`. Per site chunk
    /// holding any inference site, only the block's columns are read.
    fn load_block(&self, first: usize, len: usize) -> Result<Vec<Vec<u8>>> {
        let mut haplotypes = vec![Vec::new(); len];
        let c = self.genotypes.chunk_rows();
        for (index, flags) in self.inference.chunks(c).enumerate() {
            if !flags.contains(&true) {
                continue;
            }
            let rows = index * c..index * c + flags.len();
            let block = self.genotypes.read_block(rows, first..first + len)?;
            for (row, _) in flags.iter().enumerate().filter(|(_, &f)| f) {
                let genotypes = typed(SITES_GENOTYPES, &block, |col| col.u8_row(row))?;
                for (hap, &g) in haplotypes.iter_mut().zip(genotypes) {
                    hap.push(g);
                }
            }
        }
        Ok(haplotypes)
    }
}

impl Iterator for HaplotypeIter {
    type Item = Result<(usize, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if self.block_pos == self.block.len() {
            if self.next_sample >= self.num_samples {
                return None;
            }
            let len = self.block_size.min(self.num_samples - self.next_sample);
            match self.load_block(self.next_sample, len) {
                Ok(block) => {
                    self.block = block;
                    self.block_pos = 0;
                    self.next_sample += len;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
        let sample = self.next_sample - self.block.len() + self.block_pos;
        let haplotype = std::mem::take(&mut self.block[self.block_pos]);
        self.block_pos += 1;
        Some(Ok((sample, haplotype)))
    }
}
