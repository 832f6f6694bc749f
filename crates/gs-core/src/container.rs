//! Versioned data containers.
//!
//! A [`DataContainer`] is a group of chunked arrays plus root attributes
//! (`format_name`, `format_version`, `uuid`, and `finalized` once set). It
//! moves one way through two states:
//!
//! - **write mode**: freshly created over a memory store or a staged file
//!   store; arrays may be created and written.
//! - **finalized**: the store is sealed. File stores are first packed into
//!   their single file (lock artifact and staging directory removed) and
//!   reloaded from it. Array handles taken in write mode can still read but
//!   can no longer write.
//!
//! Containers loaded from a path are always finalized.

use gs_array::{
    read_packed, ArraySpec, ChunkedArray, Column, CompactionReport, DType, Group, StagedFile,
    Store,
};
use gs_common::{
    check_format, ContainerId, Error, FormatVersion, Result, FINALIZED_KEY, FORMAT_NAME_KEY,
    FORMAT_VERSION_KEY, UUID_KEY,
};
use gs_config::StoreOptions;
use serde_json::{Map, Value};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::info;

/// Name and version a schema stamps into its containers.
pub trait Format {
    const NAME: &'static str;
    const VERSION: FormatVersion;
}

#[derive(Debug)]
enum Backing {
    Memory,
    /// Open file container; nodes are staged next to the target path.
    Staged(StagedFile),
    /// Packed file loaded into a sealed in-memory store.
    Packed,
}

impl Backing {
    fn kind(&self) -> &'static str {
        match self {
            Backing::Memory => "memory",
            Backing::Staged(_) => "file (staged)",
            Backing::Packed => "file (packed)",
        }
    }
}

/// A group of arrays tagged with format `F`.
#[derive(Debug)]
pub struct DataContainer<F: Format> {
    path: Option<PathBuf>,
    backing: Backing,
    group: Group,
    options: StoreOptions,
    uuid: ContainerId,
    finalized: bool,
    compaction: Option<CompactionReport>,
    _format: PhantomData<F>,
}

impl<F: Format> DataContainer<F> {
    /// Create a container in write mode: on disk at `path`, or in memory.
    pub fn create(path: Option<&Path>, options: StoreOptions) -> Result<Self> {
        options.validate()?;
        let (backing, store) = match path {
            Some(path) => {
                let staged = StagedFile::create(path)?;
                let store = staged.store().clone();
                (Backing::Staged(staged), store)
            }
            None => (Backing::Memory, Store::memory()),
        };
        let group = Group::create(&store)?;
        let uuid = ContainerId::new();
        group.set_attr(FORMAT_NAME_KEY, Value::from(F::NAME))?;
        group.set_attr(FORMAT_VERSION_KEY, serde_json::to_value(F::VERSION)?)?;
        group.set_attr(UUID_KEY, Value::from(uuid.as_str()))?;

        info!(
            format = F::NAME,
            version = %F::VERSION,
            uuid = %uuid,
            backing = backing.kind(),
            "created container"
        );
        Ok(Self {
            path: path.map(Path::to_path_buf),
            backing,
            group,
            options,
            uuid,
            finalized: false,
            compaction: None,
            _format: PhantomData,
        })
    }

    /// Open a finalized container read-only and check its format.
    pub fn load(path: &Path) -> Result<Self> {
        let group = Group::open(&read_packed(path)?)?;
        let attrs = group.attrs();
        check_format(&attrs, F::NAME, F::VERSION)?;

        let uuid = attrs
            .get(UUID_KEY)
            .and_then(Value::as_str)
            .and_then(ContainerId::parse)
            .ok_or_else(|| Error::Format {
                expected: F::NAME.to_string(),
                actual: "<missing or malformed uuid>".to_string(),
            })?;
        let finalized = attrs.get(FINALIZED_KEY).and_then(Value::as_bool) == Some(true);
        if !finalized {
            return Err(Error::Storage(format!(
                "{} was closed without being finalized",
                path.display()
            )));
        }

        info!(format = F::NAME, uuid = %uuid, path = %path.display(), "loaded container");
        Ok(Self {
            path: Some(path.to_path_buf()),
            backing: Backing::Packed,
            group,
            options: StoreOptions::default(),
            uuid,
            finalized: true,
            compaction: None,
            _format: PhantomData,
        })
    }

    pub fn uuid(&self) -> &ContainerId {
        &self.uuid
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Sizes recorded when a file-backed container was finalized.
    pub fn compaction_report(&self) -> Option<CompactionReport> {
        self.compaction
    }

    /// Stored format version, which may differ from `F::VERSION` in its minor part.
    pub fn format_version(&self) -> Result<FormatVersion> {
        match self.group.attr(FORMAT_VERSION_KEY) {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Ok(F::VERSION),
        }
    }

    pub fn attrs(&self) -> Map<String, Value> {
        self.group.attrs()
    }

    pub fn attr(&self, key: &str) -> Option<Value> {
        self.group.attr(key)
    }

    pub fn set_attr(&self, key: &str, value: Value) -> Result<()> {
        self.check_write_mode()?;
        self.group.set_attr(key, value)
    }

    /// Fail with [`Error::Schema`] unless the container is still writable.
    pub fn check_write_mode(&self) -> Result<()> {
        if self.finalized {
            return Err(Error::Schema(format!(
                "{} container {} is finalized and read-only",
                F::NAME,
                self.uuid
            )));
        }
        Ok(())
    }

    /// Fail with [`Error::Schema`] unless the container has been finalized.
    pub fn check_finalized(&self) -> Result<()> {
        if !self.finalized {
            return Err(Error::Schema(format!(
                "{} container {} must be finalized before reading",
                F::NAME,
                self.uuid
            )));
        }
        Ok(())
    }

    /// Create an array using the container's chunk size and codec.
    pub fn create_array(&self, path: &str, dtype: DType) -> Result<ChunkedArray> {
        self.check_write_mode()?;
        let spec = ArraySpec::new(dtype, self.options.chunk_size, self.options.codec);
        self.group.create_array(path, spec)
    }

    /// Create a `uint8` matrix of `width` columns, chunked in both
    /// dimensions by the container's chunk size.
    pub fn create_matrix(&self, path: &str, width: usize) -> Result<ChunkedArray> {
        self.check_write_mode()?;
        let spec = ArraySpec::new(DType::UInt8, self.options.chunk_size, self.options.codec)
            .with_width(width);
        self.group.create_array(path, spec)
    }

    pub fn array(&self, path: &str) -> Result<ChunkedArray> {
        self.group.array(path)
    }

    pub fn array_paths(&self) -> Result<Vec<String>> {
        self.group.array_paths()
    }

    #[cfg(test)]
    pub(crate) fn seal_store(&self) {
        self.group.store().seal();
    }

    /// Stamp `finalized` and seal the store. File containers are packed
    /// into their single file and reloaded from it.
    ///
    /// Array handles taken before this call can still read, but every write
    /// through them fails with [`Error::Schema`].
    pub fn finalise(&mut self) -> Result<()> {
        self.check_write_mode()?;
        self.group.set_attr(FINALIZED_KEY, Value::Bool(true))?;

        let reloaded = match &self.backing {
            Backing::Staged(staged) => {
                let report = staged.close()?;
                info!(
                    blobs = report.blobs,
                    live = report.live_bytes,
                    final_size = report.final_bytes,
                    "packed store file"
                );
                self.compaction = Some(report);
                Some(read_packed(staged.path())?)
            }
            Backing::Memory => {
                self.group.store().seal();
                None
            }
            Backing::Packed => {
                return Err(Error::Schema("read-only container cannot be finalized".to_string()));
            }
        };
        if let Some(store) = reloaded {
            self.group = Group::open(&store)?;
            self.backing = Backing::Packed;
        }
        self.finalized = true;
        info!(format = F::NAME, uuid = %self.uuid, "finalized container");
        Ok(())
    }

    /// Read a whole array of a finalized container.
    pub fn read_column(&self, path: &str) -> Result<Column> {
        self.check_finalized()?;
        self.array(path)?.read_all()
    }

    /// Compare the named arrays of two containers row by row, one block of
    /// chunk rows at a time.
    pub fn arrays_equal(&self, other: &DataContainer<F>, paths: &[&str]) -> Result<bool> {
        for path in paths {
            let (a, b) = (self.array(path)?, other.array(path)?);
            if a.len() != b.len() || a.dtype() != b.dtype() || a.width() != b.width() {
                return Ok(false);
            }
            let step = a.chunk_rows();
            let mut row = 0;
            while row < a.len() {
                let end = (row + step).min(a.len());
                if a.read_rows(row..end)? != b.read_rows(row..end)? {
                    return Ok(false);
                }
                row = end;
            }
        }
        Ok(true)
    }

    /// Same identity: equal uuids.
    pub fn same_identity(&self, other: &DataContainer<F>) -> bool {
        self.uuid == other.uuid
    }

    /// Write the shared part of a schema summary: identity, state, then one
    /// line per array.
    pub fn write_summary(&self, f: &mut fmt::Formatter<'_>, counts: &[(&str, String)]) -> fmt::Result {
        let path = self
            .path
            .as_ref()
            .map_or_else(|| "<memory>".to_string(), |p| p.display().to_string());
        let version = self
            .format_version()
            .map_or_else(|_| F::VERSION.to_string(), |v| v.to_string());
        let mut rows: Vec<(&str, String)> = vec![
            ("path", path),
            ("backing", self.backing.kind().to_string()),
            ("format_name", F::NAME.to_string()),
            ("format_version", version),
            ("finalized", self.finalized.to_string()),
            ("uuid", self.uuid.to_string()),
        ];
        rows.extend(counts.iter().cloned());
        for (key, value) in rows {
            writeln!(f, "{key:<20} = {value}")?;
        }
        let paths = match self.array_paths() {
            Ok(paths) => paths,
            Err(e) => return writeln!(f, "  <{e}>"),
        };
        for path in paths {
            match self.array(&path) {
                Ok(array) => writeln!(f, "  {array}")?,
                Err(e) => writeln!(f, "  {path}: <{e}>")?,
            }
        }
        Ok(())
    }
}

/// Borrow a typed view of `column` or report the array as mistyped.
pub(crate) fn typed<'a, T: ?Sized>(
    path: &str,
    column: &'a Column,
    view: impl FnOnce(&'a Column) -> Option<&'a T>,
) -> Result<&'a T> {
    view(column).ok_or_else(|| {
        Error::Storage(format!(
            "array '{path}' has dtype {}, which does not match its schema",
            column.dtype()
        ))
    })
}

/// Read the stored `format_name` of a finalized container without knowing
/// its schema.
pub fn read_format_name(path: &Path) -> Result<String> {
    read_root_attrs(path)?
        .remove(FORMAT_NAME_KEY)
        .and_then(|v| v.as_str().map(str::to_string))
        .ok_or_else(|| Error::Format {
            expected: "genostore container".to_string(),
            actual: "<missing format_name>".to_string(),
        })
}

/// Root attributes of a finalized container.
pub fn read_root_attrs(path: &Path) -> Result<Map<String, Value>> {
    Ok(Group::open(&read_packed(path)?)?.attrs())
}
