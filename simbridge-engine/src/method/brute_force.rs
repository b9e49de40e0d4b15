//! # Brute-Force Exact Search
//!
//! Scans every record. Used for:
//! 1. Ground truth when checking graph recall
//! 2. Small datasets where graph overhead isn't worth it
//! 3. Range queries that must be exact

use std::io::{Read, Write};
use std::marker::PhantomData;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use simbridge_core::error::{Error, Result};

use crate::distance::DistanceValue;
use crate::method::{Method, SearchContext};
use crate::object::{Element, QueryRecord};
use crate::params::ParamReader;
use crate::queue::{KnnQueue, Neighbor};

const BRUTE_FORCE_MAGIC: &[u8; 8] = b"SBBRUTEF";
const BRUTE_FORCE_VERSION: u32 = 1;

pub struct BruteForce<E, D> {
    record_count: usize,
    _marker: PhantomData<fn() -> (E, D)>,
}

impl<E, D> BruteForce<E, D> {
    pub fn new() -> Self {
        Self { record_count: 0, _marker: PhantomData }
    }
}

impl<E, D> Default for BruteForce<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Element, D: DistanceValue> Method<E, D> for BruteForce<E, D> {
    fn name(&self) -> &'static str {
        "brute_force"
    }

    fn build(&mut self, ctx: SearchContext<'_, E, D>, params: &[String], _print_progress: bool) -> Result<()> {
        ParamReader::parse(params)
            .and_then(ParamReader::finish)
            .map_err(|e| Error::index_build_failed(e.to_string()))?;
        self.record_count = ctx.records.len();
        Ok(())
    }

    fn set_query_time_params(&mut self, params: &[String]) -> Result<()> {
        // Accepted for interchangeability with graph methods; a scan has no breadth.
        let mut reader = ParamReader::parse(params)?;
        let _: usize = reader.get_or("efSearch", 0)?;
        reader.finish()
    }

    fn reset_query_time_params(&mut self) {}

    fn search_knn(
        &self,
        ctx: SearchContext<'_, E, D>,
        query: &QueryRecord<'_, E>,
        queue: &mut KnnQueue<D>,
    ) -> Result<()> {
        for (position, record) in ctx.records.iter().enumerate() {
            let distance = ctx.space.distance(query.data(), record.data());
            if queue.accepts(distance) {
                queue.push(Neighbor { position, id: record.id(), distance });
            }
        }
        Ok(())
    }

    fn search_range(
        &self,
        ctx: SearchContext<'_, E, D>,
        query: &QueryRecord<'_, E>,
        radius: D,
        queue: &mut KnnQueue<D>,
    ) -> Result<()> {
        for (position, record) in ctx.records.iter().enumerate() {
            let distance = ctx.space.distance(query.data(), record.data());
            if distance <= radius {
                queue.push(Neighbor { position, id: record.id(), distance });
            }
        }
        Ok(())
    }

    fn save(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(BRUTE_FORCE_MAGIC)?;
        w.write_u32::<LittleEndian>(BRUTE_FORCE_VERSION)?;
        w.write_u64::<LittleEndian>(self.record_count as u64)?;
        Ok(())
    }

    fn load(&mut self, r: &mut dyn Read, ctx: SearchContext<'_, E, D>) -> Result<()> {
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != BRUTE_FORCE_MAGIC {
            return Err(Error::data_io("invalid brute_force topology magic"));
        }

        let version = r.read_u32::<LittleEndian>()?;
        if version != BRUTE_FORCE_VERSION {
            return Err(Error::data_io(format!("unsupported brute_force version: {}", version)));
        }

        let count = r.read_u64::<LittleEndian>()? as usize;
        if count != ctx.records.len() {
            return Err(Error::data_io(format!(
                "topology was built over {} records but {} are loaded",
                count,
                ctx.records.len()
            )));
        }
        self.record_count = count;
        Ok(())
    }

    fn memory_usage(&self) -> usize {
        std::mem::size_of::<Self>()
    }
}
