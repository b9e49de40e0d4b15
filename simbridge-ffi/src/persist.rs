//! # Persistence
//!
//! A saved index is two files:
//!
//! ```text
//! <path>       topology: magic "SBTOPOLG" | version u32 | encoding u8 | distance u8
//!                        | space name | param count u32 | params... | method name
//!                        | record count u64 | method payload
//! <path>.dat   record vector (optional), written by the space's own writer
//! ```
//!
//! Strings are `len u32` followed by UTF-8 bytes; integers are little-endian.
//! On load the records are read before the method payload, since the method
//! addresses records by position.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tracing::info;

use simbridge_core::error::{Error, Result, ResultExt};
use simbridge_core::{Allocator, BridgeConfig, DataEncoding, DistanceKind};
use simbridge_engine::{dataset, registry};
use simbridge_engine::{DistanceValue, Element};

use crate::handle::{dispatch, IndexHandle, IndexState, TypedIndex};

const TOPOLOGY_MAGIC: &[u8; 8] = b"SBTOPOLG";
const TOPOLOGY_VERSION: u32 = 1;
const MAX_NAME_LEN: usize = 1 << 16;
const MAX_PARAMS: usize = 1 << 10;

/// Location of the record vector saved alongside `path`
pub fn data_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".dat");
    PathBuf::from(name)
}

fn write_string(w: &mut dyn Write, s: &str) -> Result<()> {
    w.write_u32::<LittleEndian>(dataset::length_prefix(s.len(), "string")?)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string(r: &mut dyn Read) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > MAX_NAME_LEN {
        return Err(Error::data_io(format!("string of {} bytes in topology header", len)));
    }
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|_| Error::data_io("topology header string is not UTF-8"))
}

struct TopologyHeader {
    encoding: DataEncoding,
    distance_kind: DistanceKind,
    space_name: String,
    space_params: Vec<String>,
    method_name: String,
    record_count: u64,
}

impl TopologyHeader {
    fn write(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(TOPOLOGY_MAGIC)?;
        w.write_u32::<LittleEndian>(TOPOLOGY_VERSION)?;
        w.write_u8(self.encoding.as_u8())?;
        w.write_u8(self.distance_kind.as_u8())?;
        write_string(w, &self.space_name)?;
        w.write_u32::<LittleEndian>(dataset::length_prefix(self.space_params.len(), "space parameter list")?)?;
        for param in &self.space_params {
            write_string(w, param)?;
        }
        write_string(w, &self.method_name)?;
        w.write_u64::<LittleEndian>(self.record_count)?;
        Ok(())
    }

    fn read(r: &mut dyn Read) -> Result<Self> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != TOPOLOGY_MAGIC {
            return Err(Error::data_io("not a saved index (bad topology magic)"));
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != TOPOLOGY_VERSION {
            return Err(Error::data_io(format!("unsupported topology version: {}", version)));
        }

        let encoding = DataEncoding::from_u32(r.read_u8()? as u32)
            .map_err(|e| Error::data_io(e.to_string()))?;
        let distance_kind = DistanceKind::from_u32(r.read_u8()? as u32)
            .map_err(|e| Error::data_io(e.to_string()))?;
        let space_name = read_string(r)?;

        let param_count = r.read_u32::<LittleEndian>()? as usize;
        if param_count > MAX_PARAMS {
            return Err(Error::data_io(format!("{} space parameters in topology header", param_count)));
        }
        let space_params = (0..param_count).map(|_| read_string(r)).collect::<Result<Vec<_>>>()?;

        let method_name = read_string(r)?;
        let record_count = r.read_u64::<LittleEndian>()?;

        Ok(Self {
            encoding,
            distance_kind,
            space_name,
            space_params,
            method_name,
            record_count,
        })
    }
}

impl<E: Element, D: DistanceValue> TypedIndex<E, D> {
    fn save_records(&self, w: &mut dyn Write) -> Result<()> {
        self.space.write_records(w, &self.records)
    }

    fn load_records(&mut self, r: &mut dyn Read) -> Result<()> {
        let records = self.space.read_records(r)?;
        self.replace_records(records)
    }

    fn save_topology(&self, w: &mut dyn Write) -> Result<()> {
        self.method()?.save(w)
    }

    fn load_topology(&mut self, method_name: &str, r: &mut dyn Read) -> Result<()> {
        let mut method = registry::create_method::<E, D>(method_name)?;
        method.load(r, self.ctx())?;
        self.method = Some(method);
        Ok(())
    }
}

fn create_file(path: &Path) -> Result<File> {
    File::create(path).map_err(|e| Error::io(format!("cannot create {}", path.display()), e))
}

fn open_file(path: &Path) -> Result<File> {
    File::open(path).map_err(|e| Error::io(format!("cannot open {}", path.display()), e))
}

impl IndexHandle {
    /// Save a built index to `path`, and its records to `path.dat` when
    /// `include_data` is set
    pub fn save(&self, path: impl AsRef<Path>, include_data: bool) -> Result<()> {
        let path = path.as_ref();
        if self.state() != IndexState::Built {
            return Err(Error::index_not_built());
        }
        let started = Instant::now();

        if include_data {
            let data_path = data_path(path);
            let file = create_file(&data_path)?;
            let mut w = BufWriter::new(&file);
            dispatch!(&self.body, ix => ix.save_records(&mut w))
                .with_context(|| format!("saving records to {}", data_path.display()))?;
            w.flush()?;
            drop(w);
            file.sync_all()?;
        }

        let header = TopologyHeader {
            encoding: self.header().encoding,
            distance_kind: self.header().distance_kind,
            space_name: self.space_type().to_string(),
            space_params: self.space_params().to_vec(),
            method_name: self.method_name().to_string(),
            record_count: self.data_qty() as u64,
        };

        let file = create_file(path)?;
        let mut w = BufWriter::new(&file);
        header.write(&mut w)?;
        dispatch!(&self.body, ix => ix.save_topology(&mut w))
            .with_context(|| format!("saving topology to {}", path.display()))?;
        w.flush()?;
        drop(w);
        file.sync_all()?;

        info!(
            path = %path.display(),
            include_data,
            records = self.data_qty(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index saved"
        );
        Ok(())
    }

    /// Load an index saved by [`IndexHandle::save`] with default configuration
    pub fn load(
        path: impl AsRef<Path>,
        encoding: DataEncoding,
        distance_kind: DistanceKind,
        allocator: Allocator,
        include_data: bool,
    ) -> Result<Self> {
        Self::load_with_config(path, encoding, distance_kind, allocator, include_data, BridgeConfig::default())
    }

    /// Load a saved index.
    ///
    /// The saved space and method are restored. `encoding` must match the
    /// saved one. Query-time parameters start from the engine defaults with
    /// the configured search breadth applied.
    pub fn load_with_config(
        path: impl AsRef<Path>,
        encoding: DataEncoding,
        distance_kind: DistanceKind,
        allocator: Allocator,
        include_data: bool,
        config: BridgeConfig,
    ) -> Result<Self> {
        let path = path.as_ref();
        let started = Instant::now();

        let mut r = BufReader::new(open_file(path)?);
        let header = TopologyHeader::read(&mut r)
            .with_context(|| format!("reading {}", path.display()))?;
        if header.encoding != encoding {
            return Err(Error::space_incompatible(format!(
                "index at {} stores {} records, not {}",
                path.display(),
                header.encoding,
                encoding
            )));
        }

        let mut handle = Self::assemble(
            encoding,
            distance_kind,
            &header.space_name,
            header.space_params,
            &header.method_name,
            allocator,
            config,
        )?;

        if include_data {
            let data_path = data_path(path);
            let mut dr = BufReader::new(open_file(&data_path)?);
            dispatch!(&mut handle.body, ix => ix.load_records(&mut dr))
                .with_context(|| format!("reading {}", data_path.display()))?;
        }

        if header.record_count != handle.data_qty() as u64 {
            return Err(Error::data_io(format!(
                "topology at {} covers {} records but {} were loaded",
                path.display(),
                header.record_count,
                handle.data_qty()
            )));
        }

        dispatch!(&mut handle.body, ix => ix.load_topology(&header.method_name, &mut r))
            .with_context(|| format!("reading {}", path.display()))?;
        handle.apply_default_query_params()?;

        info!(
            path = %path.display(),
            space = %handle.space_type(),
            method = %handle.method_name(),
            records = handle.data_qty(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Index loaded"
        );
        Ok(handle)
    }
}
