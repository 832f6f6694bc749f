//! Buffered, chunk-aligned columnar writer.
//!
//! A [`BufferedItemWriter`] appends records of a statically declared
//! [`Record`] type to a fixed set of [`ChunkedArray`]s that share one chunk
//! size `C`. Rows are staged in buffer slots of `C` rows each. When the
//! active slot is full it is committed to the arrays, either in the calling
//! thread (`num_threads == 0`) or by a pool of flush workers.
//!
//! # Threaded mode
//!
//! ```text
//!   producer ──Flush(slot)──▶ [bounded flush channel] ──▶ flush-worker-j
//!      ▲                                                       │
//!      └───────────slot──── [bounded free channel] ◀───────────┘
//! ```
//!
//! Slots move by value through the two channels, so a slot is never both
//! active and in flight. Each slot's row offset is fixed when it is handed
//! off, which keeps concurrent commits on disjoint chunks. The producer
//! blocks only when every slot is in flight.

use gs_array::{ChunkedArray, Column, Value};
use gs_common::{Error, Result};
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// A row type with a fixed, ordered column layout.
pub trait Record {
    /// Column names, in the order [`Record::into_values`] yields values.
    const COLUMNS: &'static [&'static str];

    fn into_values(self) -> Vec<Value>;
}

/// Counters describing a writer's progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WriterStats {
    /// Rows accepted by `add`.
    pub total_items: usize,
    /// Non-empty slots committed to the arrays.
    pub chunks_flushed: usize,
    /// Largest number of slots simultaneously handed to workers.
    pub max_in_flight: usize,
}

/// One set of per-column staging buffers.
#[derive(Debug)]
struct Slot {
    index: usize,
    buffers: Vec<Column>,
    start: usize,
    len: usize,
}

enum FlushMessage {
    Flush(Slot),
    Stop,
}

#[derive(Debug)]
struct Shared {
    arrays: Vec<ChunkedArray>,
    /// Serializes array resizes; holds the common length of all arrays.
    current_size: Mutex<usize>,
    failed: AtomicBool,
    chunks_flushed: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Shared {
    fn commit(&self, slot: &Slot) -> Result<()> {
        if slot.len == 0 {
            return Ok(());
        }
        let end = slot.start + slot.len;
        {
            let mut size = self
                .current_size
                .lock()
                .map_err(|_| Error::Concurrency("resize lock poisoned".to_string()))?;
            if *size < end {
                for array in &self.arrays {
                    array.resize(end)?;
                }
                *size = end;
            }
        }
        for (array, buffer) in self.arrays.iter().zip(&slot.buffers) {
            array.write_rows(slot.start, buffer, slot.len)?;
        }
        self.chunks_flushed.fetch_add(1, Ordering::Relaxed);
        debug!(
            slot = slot.index,
            start = slot.start,
            rows = slot.len,
            "flushed write buffer"
        );
        Ok(())
    }
}

/// Lifecycle of a writer. `Failed` is terminal: once a commit or flush has
/// failed, every later `add` and `flush` reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
enum WriterState {
    Open,
    Flushed,
    Failed(String),
}

enum Mode {
    Synchronous,
    Threaded {
        flush_tx: SyncSender<FlushMessage>,
        free_rx: Receiver<Slot>,
        workers: Vec<JoinHandle<Result<()>>>,
    },
}

/// Buffered writer for records of type `R`.
pub struct BufferedItemWriter<R: Record> {
    shared: Arc<Shared>,
    chunk_size: usize,
    num_threads: usize,
    active: Option<Slot>,
    mode: Mode,
    total_items: usize,
    state: WriterState,
    _record: PhantomData<fn(R)>,
}

impl<R: Record> std::fmt::Debug for BufferedItemWriter<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferedItemWriter")
            .field("columns", &R::COLUMNS)
            .field("chunk_size", &self.chunk_size)
            .field("num_threads", &self.num_threads)
            .field("total_items", &self.total_items)
            .field("state", &self.state)
            .finish()
    }
}

impl<R: Record> BufferedItemWriter<R> {
    /// Build a writer over `columns`, which must name exactly
    /// [`Record::COLUMNS`] in order. Every array is reset to zero rows.
    pub fn new(columns: Vec<(&str, ChunkedArray)>, num_threads: usize) -> Result<Self> {
        let names: Vec<&str> = columns.iter().map(|(name, _)| *name).collect();
        if names != R::COLUMNS {
            return Err(Error::Schema(format!(
                "writer columns {names:?} do not match record layout {:?}",
                R::COLUMNS
            )));
        }
        let arrays: Vec<ChunkedArray> = columns.into_iter().map(|(_, a)| a).collect();
        let chunk_size = match arrays.first() {
            Some(first) => first.chunk_rows(),
            None => return Err(Error::Schema("writer needs at least one column".to_string())),
        };
        if let Some((name, array)) = names
            .iter()
            .zip(&arrays)
            .find(|(_, a)| a.chunk_rows() != chunk_size)
        {
            return Err(Error::Schema(format!(
                "chunk size mismatch: '{name}' has {} rows per chunk, expected {chunk_size}",
                array.chunk_rows()
            )));
        }
        for array in &arrays {
            array.resize(0)?;
        }

        let num_slots = num_threads.max(1);
        let mut slots: Vec<Slot> = (0..num_slots)
            .map(|index| Slot {
                index,
                buffers: arrays
                    .iter()
                    .map(|a| Column::filled(a.dtype(), a.width(), chunk_size))
                    .collect(),
                start: 0,
                len: 0,
            })
            .collect();
        let active = slots.remove(0);

        let shared = Arc::new(Shared {
            arrays,
            current_size: Mutex::new(0),
            failed: AtomicBool::new(false),
            chunks_flushed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        });

        let mode = if num_threads == 0 {
            Mode::Synchronous
        } else {
            Self::start_workers(&shared, slots, num_threads)?
        };

        Ok(Self {
            shared,
            chunk_size,
            num_threads,
            active: Some(active),
            mode,
            total_items: 0,
            state: WriterState::Open,
            _record: PhantomData,
        })
    }

    fn start_workers(shared: &Arc<Shared>, free_slots: Vec<Slot>, num_threads: usize) -> Result<Mode> {
        let (flush_tx, flush_rx) = mpsc::sync_channel::<FlushMessage>(num_threads);
        let (free_tx, free_rx) = mpsc::sync_channel::<Slot>(num_threads);
        for slot in free_slots {
            free_tx
                .send(slot)
                .map_err(|_| Error::Concurrency("free slot channel closed".to_string()))?;
        }
        let flush_rx = Arc::new(Mutex::new(flush_rx));

        let mut workers = Vec::with_capacity(num_threads);
        for j in 0..num_threads {
            let shared = Arc::clone(shared);
            let rx = Arc::clone(&flush_rx);
            let free_tx = free_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("flush-worker-{j}"))
                .spawn(move || flush_worker(j, shared, rx, free_tx))?;
            workers.push(handle);
        }
        info!("started {num_threads} flush worker threads");
        Ok(Mode::Threaded {
            flush_tx,
            free_rx,
            workers,
        })
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    fn earlier_failure(&self, message: &str) -> Error {
        Error::Concurrency(format!(
            "writer for {:?} failed earlier: {message}",
            R::COLUMNS
        ))
    }

    pub fn stats(&self) -> WriterStats {
        WriterStats {
            total_items: self.total_items,
            chunks_flushed: self.shared.chunks_flushed.load(Ordering::Relaxed),
            max_in_flight: self.shared.max_in_flight.load(Ordering::Relaxed),
        }
    }

    /// Append one record and return its row index.
    ///
    /// The record is checked against every column before any buffer is
    /// touched, so a rejected record leaves the writer unchanged.
    pub fn add(&mut self, item: R) -> Result<usize> {
        match &self.state {
            WriterState::Open => {}
            WriterState::Flushed => {
                return Err(Error::Schema(format!(
                    "cannot add to {:?}: writer has been flushed",
                    R::COLUMNS
                )));
            }
            WriterState::Failed(message) => return Err(self.earlier_failure(message)),
        }
        let values = item.into_values();
        if values.len() != R::COLUMNS.len() {
            let missing = R::COLUMNS.get(values.len()).copied().unwrap_or("<extra>");
            return Err(Error::Schema(format!(
                "record has {} values for {} columns (first unmatched column '{missing}')",
                values.len(),
                R::COLUMNS.len()
            )));
        }
        let slot = self
            .active
            .as_ref()
            .ok_or_else(|| Error::Concurrency("writer failed during an earlier flush".to_string()))?;
        for ((name, buffer), value) in R::COLUMNS.iter().zip(&slot.buffers).zip(&values) {
            buffer
                .check(value)
                .map_err(|e| Error::Schema(format!("column '{name}': {e}")))?;
        }

        if slot.len == self.chunk_size {
            if let Err(e) = self.rotate() {
                self.state = WriterState::Failed(e.to_string());
                return Err(e);
            }
        }
        let slot = self
            .active
            .as_mut()
            .ok_or_else(|| Error::Concurrency("no active write buffer".to_string()))?;
        let row = slot.len;
        for (buffer, value) in slot.buffers.iter_mut().zip(values) {
            buffer.set(row, value)?;
        }
        slot.len += 1;
        self.total_items += 1;
        Ok(self.total_items - 1)
    }

    /// Hand off the full active slot and make a free slot active.
    fn rotate(&mut self) -> Result<()> {
        if self.shared.failed.load(Ordering::Acquire) {
            return Err(Error::Concurrency("a flush worker has failed".to_string()));
        }
        let Some(slot) = self.active.take() else {
            return Err(Error::Concurrency("no active write buffer".to_string()));
        };
        let next_start = slot.start + slot.len;
        match &self.mode {
            Mode::Synchronous => {
                let mut slot = slot;
                if let Err(e) = self.shared.commit(&slot) {
                    self.shared.failed.store(true, Ordering::Release);
                    return Err(e);
                }
                slot.start = next_start;
                slot.len = 0;
                self.active = Some(slot);
            }
            Mode::Threaded {
                flush_tx, free_rx, ..
            } => {
                let in_flight = self.shared.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                self.shared.max_in_flight.fetch_max(in_flight, Ordering::AcqRel);
                flush_tx
                    .send(FlushMessage::Flush(slot))
                    .map_err(|_| Error::Concurrency("all flush workers have exited".to_string()))?;
                let mut next = free_rx.recv().map_err(|_| {
                    Error::Concurrency("all flush workers have exited; no free write buffer".to_string())
                })?;
                next.start = next_start;
                next.len = 0;
                self.active = Some(next);
            }
        }
        Ok(())
    }

    /// Commit all buffered rows, stop the workers, and check that every
    /// array holds exactly [`BufferedItemWriter::total_items`] rows.
    ///
    /// Calling `flush` again after a success is a no-op; after a failure it
    /// fails again with [`Error::Concurrency`].
    pub fn flush(&mut self) -> Result<()> {
        match &self.state {
            WriterState::Open => {}
            WriterState::Flushed => return Ok(()),
            WriterState::Failed(message) => return Err(self.earlier_failure(message)),
        }
        match self.drain() {
            Ok(()) => {
                self.state = WriterState::Flushed;
                Ok(())
            }
            Err(e) => {
                self.state = WriterState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    fn drain(&mut self) -> Result<()> {
        let slot = self.active.take();
        let mode = std::mem::replace(&mut self.mode, Mode::Synchronous);

        match mode {
            Mode::Synchronous => {
                if let Some(slot) = slot {
                    self.shared.commit(&slot)?;
                }
            }
            Mode::Threaded {
                flush_tx,
                free_rx,
                workers,
            } => {
                let mut failure = None;
                if let Some(slot) = slot.filter(|s| s.len > 0) {
                    let in_flight = self.shared.in_flight.fetch_add(1, Ordering::AcqRel) + 1;
                    self.shared.max_in_flight.fetch_max(in_flight, Ordering::AcqRel);
                    if flush_tx.send(FlushMessage::Flush(slot)).is_err() {
                        failure = Some("all flush workers exited before the final buffer".to_string());
                    }
                }
                for _ in 0..workers.len() {
                    let _ = flush_tx.send(FlushMessage::Stop);
                }
                drop(flush_tx);
                for handle in workers {
                    let name = handle.thread().name().unwrap_or("flush-worker").to_string();
                    match handle.join() {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            failure.get_or_insert(format!("{name} failed: {e}"));
                        }
                        Err(_) => {
                            failure.get_or_insert(format!("{name} panicked"));
                        }
                    }
                }
                drop(free_rx);
                if let Some(message) = failure {
                    return Err(Error::Concurrency(message));
                }
            }
        }

        for (name, array) in R::COLUMNS.iter().zip(&self.shared.arrays) {
            let len = array.len();
            if len != self.total_items {
                return Err(Error::Concurrency(format!(
                    "column '{name}' holds {len} rows after flush, expected {}",
                    self.total_items
                )));
            }
        }
        debug!(
            columns = ?R::COLUMNS,
            total_items = self.total_items,
            "writer flushed"
        );
        Ok(())
    }
}

impl<R: Record> Drop for BufferedItemWriter<R> {
    fn drop(&mut self) {
        if self.state == WriterState::Flushed {
            return;
        }
        let pending = self.active.as_ref().map_or(0, |s| s.len);
        if let Mode::Threaded {
            flush_tx, workers, ..
        } = std::mem::replace(&mut self.mode, Mode::Synchronous)
        {
            for _ in 0..workers.len() {
                let _ = flush_tx.send(FlushMessage::Stop);
            }
            drop(flush_tx);
            for handle in workers {
                let _ = handle.join();
            }
        }
        if pending > 0 {
            warn!(
                columns = ?R::COLUMNS,
                lost_rows = pending,
                "writer dropped without flush; buffered rows were not written"
            );
        }
    }
}

fn flush_worker(
    id: usize,
    shared: Arc<Shared>,
    rx: Arc<Mutex<Receiver<FlushMessage>>>,
    free_tx: SyncSender<Slot>,
) -> Result<()> {
    loop {
        let message = {
            let rx = rx
                .lock()
                .map_err(|_| Error::Concurrency("flush channel lock poisoned".to_string()))?;
            rx.recv()
        };
        match message {
            Ok(FlushMessage::Flush(slot)) => {
                let result = shared.commit(&slot);
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                if let Err(e) = result {
                    shared.failed.store(true, Ordering::Release);
                    error!(worker = id, error = %e, "flush worker failed");
                    return Err(e);
                }
                // The free channel has room for every slot.
                let _ = free_tx.send(slot);
            }
            Ok(FlushMessage::Stop) | Err(_) => return Ok(()),
        }
    }
}
