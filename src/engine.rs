//! The search engine: catalog registry, item allocation, compaction.
//!
//! An [`Engine`] owns a set of named catalogs over one item type plus the
//! two-way mapping between caller primary keys and dense bit positions.
//! Items never live in the engine; adding one runs every catalog's
//! registration-time key extractor and sets the item's bit under the
//! extracted keys.
//!
//! Removal only tombstones the reverse table; catalog vectors keep the
//! dead bit until [`compact`](Engine::compact) rebuilds the position
//! space in two phases: a parallel read phase producing per-entry
//! scratch vectors against the shift table, and a serial write phase
//! committing them and rewriting the key tables.
//!
//! Concurrency contract: structural mutations take `&mut self` and are
//! serialized by the borrow checker; queries borrow `&self` and may run
//! concurrently with each other.

use core::fmt;
use std::any::Any;
use std::collections::HashMap;
use std::hash::Hash;
use std::marker::PhantomData;
use std::time::Instant;

use indexmap::IndexMap;
use rayon::prelude::*;

use crate::catalog::Catalog;
use crate::error::{Error, Result};
use crate::query::filter::{DynKey, FilterOp};
use crate::query::Query;
use crate::wah::{Compression, Vector};

/// Typed reference to a registered catalog.
///
/// Handles are how filters, sorts, facets, and typed catalog access name
/// a catalog without the engine exposing its dynamically typed registry.
pub struct CatalogHandle<K> {
    name: String,
    _key: PhantomData<fn() -> K>,
}

impl<K> CatalogHandle<K> {
    pub(crate) fn new(name: impl Into<String>) -> CatalogHandle<K> {
        CatalogHandle {
            name: name.into(),
            _key: PhantomData,
        }
    }

    /// The catalog's registered name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<K> Clone for CatalogHandle<K> {
    fn clone(&self) -> Self {
        CatalogHandle::new(self.name.clone())
    }
}

impl<K> fmt::Debug for CatalogHandle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CatalogHandle({})", self.name)
    }
}

/// The dynamically typed face of a registered catalog.
///
/// Filter keys arrive as `dyn Any` and are downcast to the catalog's key
/// type here: the capability a catalog registers instead of the engine
/// reflecting on key types at query time.
pub(crate) trait AnyCatalog<I>: Send + Sync {
    fn name(&self) -> &str;
    fn one_to_one(&self) -> bool;
    fn validate_item(&self, item: &I) -> Result<()>;
    fn index_item(&mut self, item: &I, position: u32) -> Result<()>;
    fn apply_filter(&self, op: &FilterOp, target: &mut Vector) -> Result<()>;
    fn facet_counts(
        &self,
        candidate: &Vector,
        disable_parallel: bool,
        short_circuit: bool,
    ) -> Result<Box<dyn Any + Send>>;
    fn sort_partition(&self, candidate: &Vector, ascending: bool) -> Result<Vec<Vector>>;
    fn optimize_read_phase(&mut self, shifts: &[i32]) -> Result<()>;
    fn optimize_write_phase(&mut self);
    fn as_any(&self) -> &dyn Any;
}

/// A catalog paired with its key extractor.
struct TypedCatalog<I, K> {
    catalog: Catalog<K>,
    extract: Box<dyn Fn(&I) -> Vec<K> + Send + Sync>,
}

fn downcast_key<'a, K: 'static>(key: &'a DynKey, catalog: &str) -> Result<&'a K> {
    key.downcast_ref::<K>().ok_or_else(|| {
        Error::catalog_mismatch(format!(
            "filter key type does not match catalog '{}'",
            catalog
        ))
    })
}

impl<I, K> AnyCatalog<I> for TypedCatalog<I, K>
where
    I: 'static,
    K: Ord + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.catalog.name()
    }

    fn one_to_one(&self) -> bool {
        self.catalog.one_to_one()
    }

    fn validate_item(&self, item: &I) -> Result<()> {
        let keys = (self.extract)(item);
        if self.catalog.one_to_one() && keys.len() > 1 {
            return Err(Error::argument_out_of_range(format!(
                "one-to-one catalog '{}' extracted {} keys for one item",
                self.catalog.name(),
                keys.len()
            )));
        }
        Ok(())
    }

    fn index_item(&mut self, item: &I, position: u32) -> Result<()> {
        let keys = (self.extract)(item);
        self.catalog.set_many(keys, position, true)
    }

    fn apply_filter(&self, op: &FilterOp, target: &mut Vector) -> Result<()> {
        let name = self.catalog.name();
        match op {
            FilterOp::Exact(key) => self.catalog.filter_exact(target, downcast_key(key, name)?),
            FilterOp::Among(keys) => {
                let typed: Vec<&K> = keys
                    .iter()
                    .map(|key| downcast_key(key, name))
                    .collect::<Result<_>>()?;
                self.catalog.filter_among(target, typed)
            }
            FilterOp::Range { min, max } => {
                let min = min.as_ref().map(|key| downcast_key(key, name)).transpose()?;
                let max = max.as_ref().map(|key| downcast_key(key, name)).transpose()?;
                self.catalog.filter_range(target, min, max)
            }
        }
    }

    fn facet_counts(
        &self,
        candidate: &Vector,
        disable_parallel: bool,
        short_circuit: bool,
    ) -> Result<Box<dyn Any + Send>> {
        let counts = self
            .catalog
            .facet(candidate, disable_parallel, short_circuit)?;
        Ok(Box::new(counts))
    }

    fn sort_partition(&self, candidate: &Vector, ascending: bool) -> Result<Vec<Vector>> {
        self.catalog.sort_partition(candidate, ascending)
    }

    fn optimize_read_phase(&mut self, shifts: &[i32]) -> Result<()> {
        self.catalog.optimize_read_phase(shifts)
    }

    fn optimize_write_phase(&mut self) {
        self.catalog.optimize_write_phase()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// One slot of the bit-position → primary-key reverse table.
#[derive(Clone, Debug)]
enum PositionSlot<P> {
    Live(P),
    Tombstone,
}

/// In-memory faceted search engine over items of type `I` identified by
/// primary keys of type `P`.
pub struct Engine<I, P> {
    allow_unsafe: bool,
    catalogs: IndexMap<String, Box<dyn AnyCatalog<I>>>,
    primary_keys: HashMap<P, u32>,
    positions: Vec<PositionSlot<P>>,
    deletion_count: u32,
}

impl<I, P> Engine<I, P>
where
    I: 'static,
    P: Clone + Hash + Ord,
{
    /// Create an empty engine.
    ///
    /// `allow_unsafe` selects the pointer-arithmetic bitmap kernels for
    /// every vector the engine creates; it fails here when the
    /// `unsafe-kernels` feature is not compiled in.
    pub fn new(allow_unsafe: bool) -> Result<Engine<I, P>> {
        if allow_unsafe && !cfg!(feature = "unsafe-kernels") {
            return Err(Error::unsafe_unavailable(
                "unsafe kernels requested but the unsafe-kernels feature is not compiled in",
            ));
        }
        Ok(Engine {
            allow_unsafe,
            catalogs: IndexMap::new(),
            primary_keys: HashMap::new(),
            positions: Vec::new(),
            deletion_count: 0,
        })
    }

    /// Register a catalog over one attribute of the item type.
    ///
    /// `extract` produces the item's keys for this catalog at add time; a
    /// one-to-one catalog accepts at most one key per item. Names must be
    /// unique within the engine.
    pub fn add_catalog<K, F>(
        &mut self,
        name: &str,
        compression: Compression,
        one_to_one: bool,
        extract: F,
    ) -> Result<CatalogHandle<K>>
    where
        K: Ord + Clone + Send + Sync + 'static,
        F: Fn(&I) -> Vec<K> + Send + Sync + 'static,
    {
        if self.catalogs.contains_key(name) {
            return Err(Error::duplicate_parameter(format!(
                "catalog '{}' is already registered",
                name
            )));
        }
        let catalog = Catalog::new(name, compression, self.allow_unsafe, one_to_one)?;
        self.catalogs.insert(
            name.to_string(),
            Box::new(TypedCatalog {
                catalog,
                extract: Box::new(extract),
            }),
        );
        log::debug!("registered catalog '{}' ({:?})", name, compression);
        Ok(CatalogHandle::new(name))
    }

    /// Typed access to a registered catalog.
    pub fn catalog<K: 'static>(&self, handle: &CatalogHandle<K>) -> Result<&Catalog<K>> {
        let any = self
            .catalogs
            .get(handle.name())
            .ok_or_else(|| {
                Error::catalog_mismatch(format!("catalog '{}' is not registered", handle.name()))
            })?
            .as_any();
        any.downcast_ref::<TypedCatalog<I, K>>()
            .map(|typed| &typed.catalog)
            .ok_or_else(|| {
                Error::catalog_mismatch(format!(
                    "catalog '{}' has a different key type",
                    handle.name()
                ))
            })
    }

    /// Add one item: allocate the next bit position, run every catalog's
    /// extractor, and record the primary-key mapping.
    pub fn add(&mut self, item: &I, primary_key: P) -> Result<()> {
        if self.primary_keys.contains_key(&primary_key) {
            return Err(Error::duplicate_primary_key(
                "an item with this primary key is already live",
            ));
        }
        // Validate every extraction before any catalog writes a bit, so a
        // rejected item leaves no phantom positions behind.
        for catalog in self.catalogs.values() {
            catalog.validate_item(item)?;
        }
        let position = self.positions.len() as u32;
        for catalog in self.catalogs.values_mut() {
            catalog.index_item(item, position)?;
        }
        self.positions.push(PositionSlot::Live(primary_key.clone()));
        self.primary_keys.insert(primary_key, position);
        Ok(())
    }

    /// Remove one item by tombstoning its position.
    ///
    /// Catalog vectors are untouched until [`compact`](Engine::compact).
    pub fn remove(&mut self, primary_key: &P) -> Result<()> {
        let position = self.primary_keys.remove(primary_key).ok_or_else(|| {
            Error::argument_out_of_range("no live item carries this primary key")
        })?;
        self.positions[position as usize] = PositionSlot::Tombstone;
        self.deletion_count += 1;
        Ok(())
    }

    /// Rebuild the bit-position space, eliminating tombstones.
    ///
    /// Phase 1 computes the shift table and rewrites every catalog entry
    /// into per-entry scratch, in parallel across catalogs. Phase 2
    /// serially commits the scratch vectors and rewrites both key tables.
    pub fn compact(&mut self) -> Result<()> {
        if self.deletion_count == 0 {
            log::debug!("compaction skipped: no tombstones");
            return Ok(());
        }
        let start = Instant::now();
        let total = self.positions.len();
        let mut shifts = vec![0i32; total];
        let mut removed = 0i32;
        for (index, slot) in self.positions.iter().enumerate() {
            match slot {
                PositionSlot::Tombstone => {
                    shifts[index] = -1;
                    removed += 1;
                }
                PositionSlot::Live(_) => shifts[index] = removed,
            }
        }
        log::debug!(
            "compaction phase 1: {} positions, {} tombstones, {} catalogs",
            total,
            removed,
            self.catalogs.len()
        );
        let mut catalogs: Vec<&mut Box<dyn AnyCatalog<I>>> = self.catalogs.values_mut().collect();
        catalogs
            .par_iter_mut()
            .try_for_each(|catalog| catalog.optimize_read_phase(&shifts))?;

        for catalog in self.catalogs.values_mut() {
            catalog.optimize_write_phase();
        }
        self.positions
            .retain(|slot| matches!(slot, PositionSlot::Live(_)));
        self.primary_keys.clear();
        for (index, slot) in self.positions.iter().enumerate() {
            if let PositionSlot::Live(primary_key) = slot {
                self.primary_keys.insert(primary_key.clone(), index as u32);
            }
        }
        self.deletion_count = 0;
        log::debug!(
            "compaction phase 2 done: {} live positions, {:?}",
            self.positions.len(),
            start.elapsed()
        );
        Ok(())
    }

    /// Start building a query against the engine's current state.
    pub fn create_query(&self) -> Query<'_, I, P> {
        Query::new(self)
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.positions.len() - self.deletion_count as usize
    }

    /// Whether no live item exists.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tombstoned items awaiting compaction.
    pub fn deleted_len(&self) -> usize {
        self.deletion_count as usize
    }

    // =========================================================================
    // Query support
    // =========================================================================

    #[inline]
    pub(crate) fn allow_unsafe(&self) -> bool {
        self.allow_unsafe
    }

    pub(crate) fn catalog_dyn(&self, name: &str) -> Result<&dyn AnyCatalog<I>> {
        self.catalogs
            .get(name)
            .map(|boxed| boxed.as_ref())
            .ok_or_else(|| {
                Error::catalog_mismatch(format!("catalog '{}' is not registered", name))
            })
    }

    /// All-ones candidate over the allocated position range.
    pub(crate) fn universe(&self) -> Result<Vector> {
        Vector::all_ones(self.positions.len() as u32, self.allow_unsafe)
    }

    pub(crate) fn position_of(&self, primary_key: &P) -> Option<u32> {
        self.primary_keys.get(primary_key).copied()
    }

    pub(crate) fn primary_key_at(&self, position: u32) -> Option<&P> {
        match self.positions.get(position as usize) {
            Some(PositionSlot::Live(primary_key)) => Some(primary_key),
            _ => None,
        }
    }

    /// Clear tombstoned positions out of a candidate vector.
    pub(crate) fn clear_tombstones(&self, candidate: &mut Vector) -> Result<()> {
        if self.deletion_count == 0 {
            return Ok(());
        }
        for (index, slot) in self.positions.iter().enumerate() {
            if matches!(slot, PositionSlot::Tombstone) {
                candidate.set_bit(index as u32, false)?;
            }
        }
        Ok(())
    }
}
