//! Per-attribute inverted index.
//!
//! A [`Catalog`] maps each distinct key of one item attribute to the
//! [`Vector`] of bit positions holding that key. The ordered map doubles
//! as the sorted key set, which is what makes range filters and
//! ascending/descending sort enumeration cheap: both are plain range
//! walks, never a sort.
//!
//! Filters intersect a caller-owned uncompressed candidate vector in
//! place. Multi-key filters union the matching entry vectors into a
//! fresh uncompressed scratch first, so the AND kernels never see two
//! compressed operands.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

use rayon::prelude::*;

use crate::error::{Error, Result};
use crate::wah::{Compression, Vector};

/// One key's posting vector plus its between-phases compaction scratch.
#[derive(Clone, Debug)]
pub struct CatalogEntry {
    vector: Vector,
    opt: EntryOpt,
}

/// Compaction scratch state; only leaves `Idle` between the two phases.
#[derive(Clone, Debug)]
enum EntryOpt {
    Idle,
    Ready(Vector),
    Dead,
}

impl CatalogEntry {
    /// The entry's posting vector.
    #[inline]
    pub fn vector(&self) -> &Vector {
        &self.vector
    }
}

/// Inverted index over one typed attribute.
#[derive(Debug)]
pub struct Catalog<K> {
    name: String,
    compression: Compression,
    allow_unsafe: bool,
    one_to_one: bool,
    entries: BTreeMap<K, CatalogEntry>,
}

impl<K: Ord> Catalog<K> {
    /// Create an empty catalog.
    pub fn new(
        name: impl Into<String>,
        compression: Compression,
        allow_unsafe: bool,
        one_to_one: bool,
    ) -> Result<Catalog<K>> {
        if allow_unsafe && !cfg!(feature = "unsafe-kernels") {
            return Err(Error::unsafe_unavailable(
                "unsafe kernels requested but the unsafe-kernels feature is not compiled in",
            ));
        }
        Ok(Catalog {
            name: name.into(),
            compression,
            allow_unsafe,
            one_to_one,
            entries: BTreeMap::new(),
        })
    }

    /// The catalog's registered name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compression mode of every entry vector.
    #[inline]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Whether each item holds at most one key of this attribute.
    #[inline]
    pub fn one_to_one(&self) -> bool {
        self.one_to_one
    }

    /// Number of distinct keys.
    #[inline]
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// The keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.entries.keys()
    }

    /// The posting vector of one key, if present.
    pub fn entry_vector(&self, key: &K) -> Option<&Vector> {
        self.entries.get(key).map(|entry| &entry.vector)
    }

    // =========================================================================
    // Indexing
    // =========================================================================

    /// Set or clear one item's bit under one key, creating the entry on
    /// first sight of the key.
    pub fn set(&mut self, key: K, position: u32, value: bool) -> Result<()> {
        let entry = match self.entries.entry(key) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                let vector = Vector::new(self.compression, self.allow_unsafe)?;
                vacant.insert(CatalogEntry {
                    vector,
                    opt: EntryOpt::Idle,
                })
            }
        };
        entry.vector.set_bit(position, value)
    }

    /// Set one item's bit under every key it holds.
    pub fn set_many(
        &mut self,
        keys: impl IntoIterator<Item = K>,
        position: u32,
        value: bool,
    ) -> Result<()> {
        for key in keys {
            self.set(key, position, value)?;
        }
        Ok(())
    }

    // =========================================================================
    // Filters
    // =========================================================================

    /// Intersect `target` with one key's postings; a missing key clears
    /// the candidate.
    pub fn filter_exact(&self, target: &mut Vector, key: &K) -> Result<()> {
        match self.entries.get(key) {
            Some(entry) => target.and_in_place(&entry.vector),
            None => {
                target.clear();
                Ok(())
            }
        }
    }

    /// Intersect `target` with the union of several keys' postings.
    ///
    /// Keys are deduplicated and missing keys skipped; if every key is
    /// missing the candidate is cleared.
    pub fn filter_among<'k>(
        &self,
        target: &mut Vector,
        keys: impl IntoIterator<Item = &'k K>,
    ) -> Result<()>
    where
        K: 'k,
    {
        let distinct: BTreeSet<&K> = keys.into_iter().collect();
        let found: Vec<&Vector> = distinct
            .into_iter()
            .filter_map(|key| self.entries.get(key))
            .map(|entry| &entry.vector)
            .collect();
        self.intersect_with_union(target, &found)
    }

    /// Intersect `target` with every key inside an inclusive range.
    ///
    /// At least one bound must be given; an absent bound is open at that
    /// end of the key order.
    pub fn filter_range(
        &self,
        target: &mut Vector,
        min: Option<&K>,
        max: Option<&K>,
    ) -> Result<()> {
        if min.is_none() && max.is_none() {
            return Err(Error::argument_required(format!(
                "range filter on catalog '{}' needs at least one bound",
                self.name
            )));
        }
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(Error::argument_out_of_range(format!(
                    "range filter on catalog '{}' has min above max",
                    self.name
                )));
            }
        }
        let lower = min.map_or(Bound::Unbounded, Bound::Included);
        let upper = max.map_or(Bound::Unbounded, Bound::Included);
        let found: Vec<&Vector> = self
            .entries
            .range((lower, upper))
            .map(|(_, entry)| &entry.vector)
            .collect();
        self.intersect_with_union(target, &found)
    }

    fn intersect_with_union(&self, target: &mut Vector, found: &[&Vector]) -> Result<()> {
        match found {
            [] => {
                target.clear();
                Ok(())
            }
            [only] => target.and_in_place(only),
            many => {
                let union = Vector::or_out_of_place(many)?;
                target.and_in_place(&union)
            }
        }
    }

    // =========================================================================
    // Faceting and sorting
    // =========================================================================

    /// Count the candidate's overlap with every key.
    ///
    /// Returns `(key, count)` for every key whose overlap is non-empty.
    /// Under `short_circuit` each matching key counts 1 and the scan per
    /// entry stops at the first hit. The scan runs across entries in
    /// parallel unless `disable_parallel` caps it to the serial path; the
    /// output order is unspecified either way.
    pub fn facet(
        &self,
        candidate: &Vector,
        disable_parallel: bool,
        short_circuit: bool,
    ) -> Result<Vec<(K, u32)>>
    where
        K: Clone + Send + Sync,
    {
        log::trace!(
            "facet scan over catalog '{}': {} keys, parallel={}",
            self.name,
            self.entries.len(),
            !disable_parallel
        );
        let count_entry = |key: &K, entry: &CatalogEntry| -> Result<Option<(K, u32)>> {
            let count = if short_circuit {
                u32::from(candidate.and_population_any(&entry.vector)?)
            } else {
                candidate.and_population(&entry.vector)?
            };
            Ok((count > 0).then(|| (key.clone(), count)))
        };
        let counted: Vec<Option<(K, u32)>> = if disable_parallel {
            self.entries
                .iter()
                .map(|(key, entry)| count_entry(key, entry))
                .collect::<Result<_>>()?
        } else {
            self.entries
                .par_iter()
                .map(|(key, entry)| count_entry(key, entry))
                .collect::<Result<_>>()?
        };
        Ok(counted.into_iter().flatten().collect())
    }

    /// Lazy key-ordered enumeration of the candidate's positions grouped
    /// by key.
    ///
    /// Keys whose overlap with the candidate is empty are skipped
    /// explicitly. `value` selects which bit value of the overlap is
    /// enumerated; the overlap is materialized uncompressed, so both
    /// values are supported.
    pub fn sort_bit_positions<'a>(
        &'a self,
        candidate: &'a Vector,
        value: bool,
        ascending: bool,
    ) -> impl Iterator<Item = (&'a K, Vec<u32>)> + 'a {
        let entries: Box<dyn Iterator<Item = (&K, &CatalogEntry)> + '_> = if ascending {
            Box::new(self.entries.iter())
        } else {
            Box::new(self.entries.iter().rev())
        };
        entries.filter_map(move |(key, entry)| {
            let overlap = candidate
                .and_out_of_place(&entry.vector, Compression::None)
                .ok()?;
            if !overlap.population_any() {
                return None;
            }
            let positions: Vec<u32> = overlap.bit_positions(value).ok()?.collect();
            Some((key, positions))
        })
    }

    /// The candidate split into per-key overlap vectors, in key order,
    /// empty overlaps skipped.
    pub(crate) fn sort_partition(
        &self,
        candidate: &Vector,
        ascending: bool,
    ) -> Result<Vec<Vector>> {
        let entries: Box<dyn Iterator<Item = &CatalogEntry> + '_> = if ascending {
            Box::new(self.entries.values())
        } else {
            Box::new(self.entries.values().rev())
        };
        let mut groups = Vec::new();
        for entry in entries {
            let overlap = candidate.and_out_of_place(&entry.vector, Compression::None)?;
            if overlap.population_any() {
                groups.push(overlap);
            }
        }
        Ok(groups)
    }

    // =========================================================================
    // Compaction
    // =========================================================================

    /// Phase 1 of compaction: rebuild every entry's vector against the
    /// shift table into per-entry scratch. Reads the live vectors only.
    pub fn optimize_read_phase(&mut self, shifts: &[i32]) -> Result<()> {
        for entry in self.entries.values_mut() {
            let (alive, rebuilt) = entry.vector.optimize_read_phase(shifts)?;
            entry.opt = if alive {
                EntryOpt::Ready(rebuilt)
            } else {
                EntryOpt::Dead
            };
        }
        Ok(())
    }

    /// Phase 2 of compaction: install the scratch vectors and drop dead
    /// entries together with their keys.
    pub fn optimize_write_phase(&mut self) {
        self.entries
            .retain(|_, entry| match std::mem::replace(&mut entry.opt, EntryOpt::Idle) {
                EntryOpt::Ready(rebuilt) => {
                    entry.vector = rebuilt;
                    true
                }
                EntryOpt::Idle => true,
                EntryOpt::Dead => false,
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Colors of six items, one key per position.
    fn color_catalog() -> Catalog<&'static str> {
        let mut catalog =
            Catalog::new("color", Compression::CompressedWithPackedPosition, false, true).unwrap();
        for (position, color) in ["red", "red", "green", "blue", "green", "red"]
            .iter()
            .enumerate()
        {
            catalog.set(*color, position as u32, true).unwrap();
        }
        catalog
    }

    fn universe(bits: u32) -> Vector {
        Vector::all_ones(bits, false).unwrap()
    }

    fn ones_of(v: &Vector) -> Vec<u32> {
        v.bit_positions(true).unwrap().collect()
    }

    #[test]
    fn test_set_creates_entries_on_first_sight() {
        let catalog = color_catalog();
        assert_eq!(catalog.key_count(), 3);
        assert_eq!(
            catalog.keys().copied().collect::<Vec<_>>(),
            vec!["blue", "green", "red"]
        );
        assert_eq!(
            ones_of(catalog.entry_vector(&"red").unwrap()),
            vec![0, 1, 5]
        );
    }

    #[test]
    fn test_filter_exact() {
        let catalog = color_catalog();
        let mut candidate = universe(6);
        catalog.filter_exact(&mut candidate, &"green").unwrap();
        assert_eq!(ones_of(&candidate), vec![2, 4]);

        let mut candidate = universe(6);
        catalog.filter_exact(&mut candidate, &"purple").unwrap();
        assert!(!candidate.population_any());
    }

    #[test]
    fn test_filter_among_dedups_and_skips_missing() {
        let catalog = color_catalog();
        let mut candidate = universe(6);
        catalog
            .filter_among(&mut candidate, ["red", "blue", "red", "purple"].iter())
            .unwrap();
        assert_eq!(ones_of(&candidate), vec![0, 1, 3, 5]);

        let mut candidate = universe(6);
        catalog
            .filter_among(&mut candidate, ["purple", "beige"].iter())
            .unwrap();
        assert!(!candidate.population_any());
    }

    #[test]
    fn test_filter_range_validation() {
        let mut catalog: Catalog<i32> =
            Catalog::new("price", Compression::Compressed, false, true).unwrap();
        for (position, price) in [10, 20, 30, 40, 50].iter().enumerate() {
            catalog.set(*price, position as u32, true).unwrap();
        }
        let mut candidate = universe(5);
        assert_eq!(
            catalog
                .filter_range(&mut candidate, None, None)
                .unwrap_err()
                .kind,
            crate::ErrorKind::ArgumentRequired
        );
        assert_eq!(
            catalog
                .filter_range(&mut candidate, Some(&40), Some(&20))
                .unwrap_err()
                .kind,
            crate::ErrorKind::ArgumentOutOfRange
        );

        catalog
            .filter_range(&mut candidate, Some(&20), Some(&40))
            .unwrap();
        assert_eq!(ones_of(&candidate), vec![1, 2, 3]);

        let mut candidate = universe(5);
        catalog.filter_range(&mut candidate, None, Some(&30)).unwrap();
        assert_eq!(ones_of(&candidate), vec![0, 1, 2]);

        let mut candidate = universe(5);
        catalog.filter_range(&mut candidate, Some(&35), None).unwrap();
        assert_eq!(ones_of(&candidate), vec![3, 4]);
    }

    #[test]
    fn test_facet_counts_match_populations() {
        let catalog = color_catalog();
        let candidate = universe(6);
        for disable_parallel in [false, true] {
            let mut counts = catalog.facet(&candidate, disable_parallel, false).unwrap();
            counts.sort();
            assert_eq!(counts, vec![("blue", 1), ("green", 2), ("red", 3)]);
        }
    }

    #[test]
    fn test_facet_short_circuit_counts_one_per_key() {
        let catalog = color_catalog();
        let mut candidate = universe(6);
        candidate.set_bit(3, false).unwrap();
        let mut counts = catalog.facet(&candidate, true, true).unwrap();
        counts.sort();
        assert_eq!(counts, vec![("green", 1), ("red", 1)]);
    }

    #[test]
    fn test_facet_against_filtered_candidate() {
        let catalog = color_catalog();
        let mut candidate = universe(6);
        catalog.filter_exact(&mut candidate, &"red").unwrap();
        let mut counts = catalog.facet(&candidate, true, false).unwrap();
        counts.sort();
        assert_eq!(counts, vec![("red", 3)]);
    }

    #[test]
    fn test_sort_bit_positions_orders_by_key() {
        let catalog = color_catalog();
        let candidate = universe(6);
        let ascending: Vec<(&str, Vec<u32>)> = catalog
            .sort_bit_positions(&candidate, true, true)
            .map(|(key, positions)| (*key, positions))
            .collect();
        assert_eq!(
            ascending,
            vec![
                ("blue", vec![3]),
                ("green", vec![2, 4]),
                ("red", vec![0, 1, 5]),
            ]
        );
        let descending: Vec<&str> = catalog
            .sort_bit_positions(&candidate, true, false)
            .map(|(key, _)| *key)
            .collect();
        assert_eq!(descending, vec!["red", "green", "blue"]);
    }

    #[test]
    fn test_sort_bit_positions_skips_empty_overlap() {
        let catalog = color_catalog();
        let mut candidate = universe(6);
        candidate.set_bit(3, false).unwrap();
        let keys: Vec<&str> = catalog
            .sort_bit_positions(&candidate, true, true)
            .map(|(key, _)| *key)
            .collect();
        assert_eq!(keys, vec!["green", "red"]);
    }

    #[test]
    fn test_optimize_phases_drop_dead_keys() {
        let mut catalog = color_catalog();
        // Tombstone positions 2 and 4 (both green items), shift the rest.
        let shifts = vec![0, 0, -1, 1, -1, 2];
        catalog.optimize_read_phase(&shifts).unwrap();
        catalog.optimize_write_phase();
        assert_eq!(catalog.key_count(), 2);
        assert!(catalog.entry_vector(&"green").is_none());
        assert_eq!(ones_of(catalog.entry_vector(&"red").unwrap()), vec![0, 1, 3]);
        assert_eq!(ones_of(catalog.entry_vector(&"blue").unwrap()), vec![2]);
    }
}
