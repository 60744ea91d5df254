//! Round-robin archive store with on-disk persistence.
//!
//! Updates are turned into per-step primary data points (PDPs): counters
//! become rates, gauges are taken as-is, and the time between two updates is
//! split across step boundaries. Every finished PDP feeds each archive.
//!
//! File layout:
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ HEADER (24 bytes)                           │
//! │   magic: [u8; 4]        = b"RRS1"           │
//! │   version: u16          = 1                 │
//! │   _reserved: [u8; 2]                        │
//! │   payload_len: u64                          │
//! │   payload_crc32: u32                        │
//! │   _reserved: [u8; 4]                        │
//! ├─────────────────────────────────────────────┤
//! │ PAYLOAD                                     │
//! │   postcard(descriptor, consolidation state) │
//! └─────────────────────────────────────────────┘
//! ```
//! Every write goes to a `<path>.tmp` sibling first and is renamed into place, so a
//! crash leaves either the old or the new archive.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::{Chart, DEFAULT_HEIGHT, DEFAULT_WIDTH, GraphRenderer, RenderError, Series};
use crate::storage::archive::{RoundRobinArchive, Row};
use crate::storage::descriptor::{ArchiveDescriptor, ConsolidationFn, DataSource, DsKind};

const MAGIC: [u8; 4] = *b"RRS1";
const VERSION: u16 = 1;
const HEADER_SIZE: usize = 24;

/// Error type for archive operations.
#[derive(Debug)]
pub enum StoreError {
    /// An archive already exists and overwrite was not requested.
    AlreadyExists(PathBuf),
    /// No archive at the given path.
    NotFound(PathBuf),
    /// Descriptor failed validation.
    InvalidDescriptor(String),
    /// Update timestamp not after the last accepted one.
    OutOfOrderUpdate { timestamp: i64, last: i64 },
    /// Update names a data source the descriptor does not declare.
    UnknownDataSource(String),
    /// No archive uses the requested consolidation function.
    NoMatchingArchive(ConsolidationFn),
    /// File is damaged or not an archive.
    Corrupt(String),
    /// Serialization failure.
    Encode(String),
    Io(io::Error),
    Render(RenderError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::AlreadyExists(p) => write!(f, "archive {} already exists", p.display()),
            StoreError::NotFound(p) => write!(f, "archive {} not found", p.display()),
            StoreError::InvalidDescriptor(msg) => write!(f, "invalid archive descriptor: {}", msg),
            StoreError::OutOfOrderUpdate { timestamp, last } => write!(
                f,
                "update at {} is not after last update at {}",
                timestamp, last
            ),
            StoreError::UnknownDataSource(name) => write!(f, "unknown data source '{}'", name),
            StoreError::NoMatchingArchive(cf) => write!(f, "no {} archive", cf),
            StoreError::Corrupt(msg) => write!(f, "corrupt archive: {}", msg),
            StoreError::Encode(msg) => write!(f, "archive encoding failed: {}", msg),
            StoreError::Io(e) => write!(f, "archive I/O error: {}", e),
            StoreError::Render(e) => write!(f, "render failed: {}", e),
        }
    }
}

impl StoreError {
    /// Whether a failed update can be dropped while the archive stays valid.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            StoreError::OutOfOrderUpdate { .. }
                | StoreError::UnknownDataSource(_)
                | StoreError::Io(_)
                | StoreError::Encode(_)
        )
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<RenderError> for StoreError {
    fn from(e: RenderError) -> Self {
        StoreError::Render(e)
    }
}

/// Maps a counter reading into `[0, modulus)` relative to the domain minimum.
fn reduce_counter(ds: &DataSource, value: f64) -> f64 {
    (value - ds.min).rem_euclid(ds.modulus())
}

/// Rate-of-change input for one counter step, assuming at most one wrap.
pub(crate) fn counter_delta(prev: f64, cur: f64, modulus: f64) -> f64 {
    if cur >= prev {
        cur - prev
    } else {
        cur + modulus - prev
    }
}

/// Per data source accumulator for the PDP currently being built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct PdpState {
    /// Last raw counter reading, for rate computation.
    last_raw: Option<f64>,
    /// Sum of rate × seconds over known time.
    sum: f64,
    known_secs: u64,
    unknown_secs: u64,
}

impl PdpState {
    fn accumulate(&mut self, rate: Option<f64>, secs: u64) {
        match rate {
            Some(r) => {
                self.sum += r * secs as f64;
                self.known_secs += secs;
            }
            None => self.unknown_secs += secs,
        }
    }

    /// Closes the PDP. Unknown if more than half of the step is unknown.
    fn take(&mut self, step_secs: u64) -> Option<f64> {
        let value = if self.known_secs == 0 || self.unknown_secs * 2 > step_secs {
            None
        } else {
            Some(self.sum / self.known_secs as f64)
        };
        self.sum = 0.0;
        self.known_secs = 0;
        self.unknown_secs = 0;
        value
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoreState {
    last_update: Option<i64>,
    pdp: Vec<PdpState>,
    archives: Vec<RoundRobinArchive>,
}

impl StoreState {
    fn new(descriptor: &ArchiveDescriptor) -> Self {
        let ds_count = descriptor.data_sources.len();
        Self {
            last_update: None,
            pdp: vec![PdpState::default(); ds_count],
            archives: descriptor
                .archives
                .iter()
                .map(|def| RoundRobinArchive::new(def.clone(), ds_count))
                .collect(),
        }
    }

    fn rate(ds: &DataSource, pdp: &PdpState, input: Option<f64>, interval: u64) -> Option<f64> {
        if interval > ds.heartbeat_secs {
            return None;
        }
        match ds.kind {
            DsKind::Counter => {
                let prev = reduce_counter(ds, pdp.last_raw?);
                let cur = reduce_counter(ds, input?);
                Some(counter_delta(prev, cur, ds.modulus()) / interval as f64)
            }
            DsKind::Gauge => input.filter(|v| *v >= ds.min && *v <= ds.max),
        }
    }

    /// Applies one update whose ordering and names were already checked.
    fn apply(&mut self, descriptor: &ArchiveDescriptor, now: i64, inputs: &[Option<f64>]) {
        let Some(last) = self.last_update else {
            // The first update only primes counters; there is no interval yet.
            for ((ds, pdp), input) in descriptor.data_sources.iter().zip(&mut self.pdp).zip(inputs) {
                if ds.kind == DsKind::Counter {
                    pdp.last_raw = *input;
                }
            }
            self.last_update = Some(now);
            return;
        };

        let interval = (now - last) as u64;
        let rates: Vec<Option<f64>> = descriptor
            .data_sources
            .iter()
            .zip(&mut self.pdp)
            .zip(inputs)
            .map(|((ds, pdp), input)| {
                let rate = Self::rate(ds, pdp, *input, interval);
                if ds.kind == DsKind::Counter {
                    pdp.last_raw = *input;
                }
                rate
            })
            .collect();

        let step = descriptor.step_secs as i64;
        let mut t = last;
        while t < now {
            let boundary = (t.div_euclid(step) + 1) * step;
            let seg_end = boundary.min(now);
            let secs = (seg_end - t) as u64;
            for (pdp, rate) in self.pdp.iter_mut().zip(&rates) {
                pdp.accumulate(*rate, secs);
            }
            if seg_end == boundary {
                let values: Vec<Option<f64>> = self
                    .pdp
                    .iter_mut()
                    .map(|p| p.take(descriptor.step_secs))
                    .collect();
                for rra in &mut self.archives {
                    rra.push_pdp(boundary, descriptor.step_secs, &values);
                }
            }
            t = seg_end;
        }
        self.last_update = Some(now);
    }
}

#[derive(Serialize)]
struct ArchiveFileRef<'a> {
    descriptor: &'a ArchiveDescriptor,
    state: &'a StoreState,
}

#[derive(Deserialize)]
struct ArchiveFile {
    descriptor: ArchiveDescriptor,
    state: StoreState,
}

/// Sibling written before the rename. Appended so it never equals `path`.
fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

fn write_archive(descriptor: &ArchiveDescriptor, state: &StoreState) -> Result<(), StoreError> {
    let payload = postcard::to_allocvec(&ArchiveFileRef { descriptor, state })
        .map_err(|e| StoreError::Encode(e.to_string()))?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..4].copy_from_slice(&MAGIC);
    header[4..6].copy_from_slice(&VERSION.to_le_bytes());
    header[8..16].copy_from_slice(&(payload.len() as u64).to_le_bytes());
    header[16..20].copy_from_slice(&crc32fast::hash(&payload).to_le_bytes());

    let path = &descriptor.path;
    let tmp_path = tmp_path(path);
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(&header)?;
    file.write_all(&payload)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_archive(path: &Path) -> Result<ArchiveFile, StoreError> {
    let data = fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => StoreError::NotFound(path.to_path_buf()),
        _ => StoreError::Io(e),
    })?;

    if data.len() < HEADER_SIZE {
        return Err(StoreError::Corrupt("file too small for header".to_string()));
    }
    if data[0..4] != MAGIC {
        return Err(StoreError::Corrupt(format!(
            "invalid magic: expected RRS1, got {:?}",
            &data[0..4]
        )));
    }
    let version = u16::from_le_bytes([data[4], data[5]]);
    if version != VERSION {
        return Err(StoreError::Corrupt(format!("unsupported version: {}", version)));
    }

    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&data[8..16]);
    let payload_len = u64::from_le_bytes(len_bytes);
    let mut crc_bytes = [0u8; 4];
    crc_bytes.copy_from_slice(&data[16..20]);
    let expected_crc = u32::from_le_bytes(crc_bytes);

    let payload = &data[HEADER_SIZE..];
    if payload.len() as u64 != payload_len {
        return Err(StoreError::Corrupt(format!(
            "payload length {} does not match header {}",
            payload.len(),
            payload_len
        )));
    }
    if crc32fast::hash(payload) != expected_crc {
        return Err(StoreError::Corrupt("checksum mismatch".to_string()));
    }

    postcard::from_bytes(payload).map_err(|e| StoreError::Corrupt(e.to_string()))
}

/// Read-only view of an archive's layout and fill level.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreInfo {
    pub descriptor: ArchiveDescriptor,
    pub last_update: Option<i64>,
    /// Rows currently held by each archive.
    pub rows: Vec<usize>,
}

impl fmt::Display for StoreInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.descriptor;
        writeln!(f, "filename = \"{}\"", d.path.display())?;
        writeln!(f, "step = {}", d.step_secs)?;
        writeln!(
            f,
            "last_update = {}",
            crate::fmt::format_timestamp(self.last_update)
        )?;
        for ds in &d.data_sources {
            writeln!(
                f,
                "ds[{}] = {} heartbeat={} min={} max={}",
                ds.name, ds.kind, ds.heartbeat_secs, ds.min, ds.max
            )?;
        }
        for (i, (rra, rows)) in d.archives.iter().zip(&self.rows).enumerate() {
            writeln!(
                f,
                "rra[{}] = {} xff={} steps={} rows={}/{} retention={}s",
                i,
                rra.cf,
                rra.xff,
                rra.steps,
                rows,
                rra.rows,
                d.retention_secs(rra)
            )?;
        }
        Ok(())
    }
}

/// Rows returned by a time-window query.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResult {
    pub cf: ConsolidationFn,
    /// Seconds covered by one row of the chosen archive.
    pub resolution_secs: u64,
    pub ds_names: Vec<String>,
    pub rows: Vec<Row>,
}

pub struct Store {
    descriptor: ArchiveDescriptor,
    state: StoreState,
}

impl Store {
    /// Creates a new archive file.
    ///
    /// Fails with [`StoreError::AlreadyExists`] when a file is present at the
    /// descriptor path, unless `overwrite` is set, in which case the old
    /// file and its history are discarded.
    pub fn create(descriptor: ArchiveDescriptor, overwrite: bool) -> Result<Self, StoreError> {
        descriptor.validate().map_err(StoreError::InvalidDescriptor)?;
        if descriptor.path.exists() && !overwrite {
            return Err(StoreError::AlreadyExists(descriptor.path.clone()));
        }

        let state = StoreState::new(&descriptor);
        write_archive(&descriptor, &state)?;
        info!(
            "Archive created at {} (step={}s, {} data sources, {} archives)",
            descriptor.path.display(),
            descriptor.step_secs,
            descriptor.data_sources.len(),
            descriptor.archives.len()
        );
        Ok(Self { descriptor, state })
    }

    /// Opens an existing archive file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let ArchiveFile {
            mut descriptor,
            state,
        } = read_archive(path)?;
        descriptor.path = path.to_path_buf();
        descriptor
            .validate()
            .map_err(|e| StoreError::Corrupt(format!("stored descriptor invalid: {}", e)))?;

        let ds_count = descriptor.data_sources.len();
        let consistent = state.pdp.len() == ds_count
            && state.archives.len() == descriptor.archives.len()
            && state
                .archives
                .iter()
                .zip(&descriptor.archives)
                .all(|(rra, def)| rra.def() == def && rra.ds_count() == ds_count);
        if !consistent {
            return Err(StoreError::Corrupt(
                "state does not match descriptor".to_string(),
            ));
        }

        debug!(
            "Archive opened at {} (last update {:?})",
            path.display(),
            state.last_update
        );
        Ok(Self { descriptor, state })
    }

    pub fn descriptor(&self) -> &ArchiveDescriptor {
        &self.descriptor
    }

    pub fn last_update(&self) -> Option<i64> {
        self.state.last_update
    }

    pub fn archives(&self) -> &[RoundRobinArchive] {
        &self.state.archives
    }

    /// Records values at `timestamp` and persists the archive.
    ///
    /// Data sources missing from `values` are unknown for this interval. On
    /// error neither the in-memory nor the on-disk state changes.
    pub fn update(
        &mut self,
        timestamp: i64,
        values: &BTreeMap<String, f64>,
    ) -> Result<(), StoreError> {
        if let Some(last) = self.state.last_update {
            if timestamp <= last {
                return Err(StoreError::OutOfOrderUpdate { timestamp, last });
            }
        }

        let mut inputs = vec![None; self.descriptor.data_sources.len()];
        for (name, value) in values {
            let idx = self
                .descriptor
                .ds_index(name)
                .ok_or_else(|| StoreError::UnknownDataSource(name.clone()))?;
            inputs[idx] = Some(*value).filter(|v| v.is_finite());
        }

        let mut next = self.state.clone();
        next.apply(&self.descriptor, timestamp, &inputs);
        write_archive(&self.descriptor, &next)?;
        self.state = next;
        Ok(())
    }

    pub fn info(&self) -> StoreInfo {
        StoreInfo {
            descriptor: self.descriptor.clone(),
            last_update: self.state.last_update,
            rows: self.state.archives.iter().map(|a| a.len()).collect(),
        }
    }

    /// Returns rows in `[from, to]` from the best archive using `cf`.
    ///
    /// Picks the finest archive whose retention reaches back to `from`,
    /// falling back to the one with the longest retention.
    pub fn fetch(&self, cf: ConsolidationFn, from: i64, to: i64) -> Result<FetchResult, StoreError> {
        let end = self.state.last_update.unwrap_or(to);
        let candidates: Vec<&RoundRobinArchive> = self
            .state
            .archives
            .iter()
            .filter(|a| a.def().cf == cf)
            .collect();

        let covering = candidates
            .iter()
            .filter(|a| end - (self.descriptor.retention_secs(a.def()) as i64) <= from)
            .min_by_key(|a| a.def().steps);
        let chosen = covering
            .or_else(|| {
                candidates
                    .iter()
                    .max_by_key(|a| self.descriptor.retention_secs(a.def()))
            })
            .ok_or(StoreError::NoMatchingArchive(cf))?;

        Ok(FetchResult {
            cf,
            resolution_secs: u64::from(chosen.def().steps) * self.descriptor.step_secs,
            ds_names: self
                .descriptor
                .data_sources
                .iter()
                .map(|ds| ds.name.clone())
                .collect(),
            rows: chosen.fetch(from, to),
        })
    }

    /// Renders all data sources over `[from, to]` using the first archive's
    /// consolidation function.
    pub fn render(
        &self,
        from: i64,
        to: i64,
        renderer: &dyn GraphRenderer,
    ) -> Result<Vec<u8>, StoreError> {
        let cf = self.descriptor.archives[0].cf;
        let fetched = self.fetch(cf, from, to)?;
        let series = fetched
            .ds_names
            .iter()
            .enumerate()
            .map(|(i, name)| Series {
                label: format!("{} ({}/s)", name, cf),
                points: fetched
                    .rows
                    .iter()
                    .map(|row| (row.timestamp, row.values[i]))
                    .collect(),
            })
            .collect();
        let title = self
            .descriptor
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.descriptor.path.display().to_string());
        let chart = Chart {
            title,
            from,
            to,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            series,
        };
        Ok(renderer.render(&chart)?)
    }
}
