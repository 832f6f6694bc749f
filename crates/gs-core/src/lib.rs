//! Genostore core: buffered columnar writers and versioned data containers.
//!
//! - [`writer`]: chunk-aligned buffered writer with an optional flush pool
//! - [`container`]: versioned containers with a one-way finalize transition
//! - [`samples`]: populations, samples, and per-site genotypes
//! - [`ancestors`]: inferred ancestors linked to their sample data
//! - [`logging`]: subscriber setup for the `genostore` binary

pub mod ancestors;
pub mod container;
pub mod logging;
pub mod samples;
pub mod writer;

pub use ancestors::{expand_haplotype, AncestorData, AncestorDataFormat, UNKNOWN_ALLELE};
pub use container::{read_format_name, read_root_attrs, DataContainer, Format};
pub use samples::{is_inference_site, SampleData, SampleDataFormat, SiteFilter, NO_POPULATION};
pub use writer::{BufferedItemWriter, Record, WriterStats};

pub use gs_common::{Error, Result};
pub use gs_config::StoreOptions;
