//! One-shot query building and execution.
//!
//! A [`Query`] borrows its engine, accumulates filter, sort, facet, and
//! amongst parameters, and executes exactly once; the executed latch is
//! compare-and-swapped so a second call fails instead of silently
//! re-running.
//!
//! Execution walks the filter tree bottom-up. Every leaf copies the
//! all-ones candidate over the allocated position range and intersects
//! it through its catalog; `And` folds children into the first, `Or`
//! unions children out of place, `Not` clears the child's bits out of a
//! fresh universe. The candidate is then masked by the amongst-set and
//! by pending tombstones, counted, sorted, paged, and faceted.

pub mod filter;

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::engine::{AnyCatalog, CatalogHandle, Engine};
use crate::error::{Error, Result};
use crate::wah::{Compression, Vector};

pub use filter::{FilterClause, FilterParameter};

/// A one-shot query builder.
pub struct Query<'e, I, P> {
    engine: &'e Engine<I, P>,
    amongst: Vec<P>,
    filter: Option<FilterClause>,
    sorts: Vec<(String, bool)>,
    sort_primary_key: Option<bool>,
    facets: Vec<String>,
    disable_parallel: bool,
    short_circuit_counting: bool,
    executed: AtomicBool,
}

/// The result of executing a query.
pub struct QueryOutput<P> {
    /// The requested page of primary keys, in result order.
    pub primary_keys: Vec<P>,
    /// Total matches before paging.
    pub total: u32,
    /// Wall-clock execution time.
    pub elapsed: Duration,
    facets: HashMap<String, Box<dyn Any + Send>>,
}

impl<P: std::fmt::Debug> std::fmt::Debug for QueryOutput<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryOutput")
            .field("primary_keys", &self.primary_keys)
            .field("total", &self.total)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

impl<I, P> std::fmt::Debug for Query<'_, I, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("sorts", &self.sorts)
            .field("sort_primary_key", &self.sort_primary_key)
            .field("facets", &self.facets)
            .field("disable_parallel", &self.disable_parallel)
            .field("short_circuit_counting", &self.short_circuit_counting)
            .field("executed", &self.executed)
            .finish()
    }
}

impl<P> QueryOutput<P> {
    /// Facet counts for one catalog, typed by its handle.
    ///
    /// The pair order is unspecified; compare as a set. Returns `None`
    /// when the catalog was not faceted or the key type does not match.
    pub fn facet_counts<K: 'static>(&self, catalog: &CatalogHandle<K>) -> Option<&[(K, u32)]> {
        self.facets
            .get(catalog.name())?
            .downcast_ref::<Vec<(K, u32)>>()
            .map(|counts| counts.as_slice())
    }
}

impl<'e, I, P> Query<'e, I, P>
where
    I: 'static,
    P: Clone + std::hash::Hash + Ord,
{
    pub(crate) fn new(engine: &'e Engine<I, P>) -> Query<'e, I, P> {
        Query {
            engine,
            amongst: Vec::new(),
            filter: None,
            sorts: Vec::new(),
            sort_primary_key: None,
            facets: Vec::new(),
            disable_parallel: false,
            short_circuit_counting: false,
            executed: AtomicBool::new(false),
        }
    }

    // =========================================================================
    // Building
    // =========================================================================

    /// Add a filter clause; successive calls are conjoined.
    pub fn filter(&mut self, clause: impl Into<FilterClause>) -> &mut Self {
        let clause = clause.into();
        self.filter = Some(match self.filter.take() {
            None => clause,
            Some(existing) => FilterClause::and([existing, clause]),
        });
        self
    }

    /// Restrict results to the given primary keys.
    pub fn amongst(&mut self, primary_keys: impl IntoIterator<Item = P>) -> &mut Self {
        self.amongst.extend(primary_keys);
        self
    }

    /// Order results by a catalog's keys; later sorts break ties of
    /// earlier ones. At most one sort per catalog.
    pub fn sort<K>(&mut self, catalog: &CatalogHandle<K>, ascending: bool) -> Result<&mut Self> {
        if self.sort_primary_key.is_some() {
            return Err(Error::unsupported(
                "catalog sorts cannot be combined with primary-key ordering",
            ));
        }
        self.engine.catalog_dyn(catalog.name())?;
        if self.sorts.iter().any(|(name, _)| name == catalog.name()) {
            return Err(Error::duplicate_parameter(format!(
                "second sort parameter on catalog '{}'",
                catalog.name()
            )));
        }
        self.sorts.push((catalog.name().to_string(), ascending));
        Ok(self)
    }

    /// Order results by primary key value; mutually exclusive with
    /// catalog sorts.
    pub fn sort_by_primary_key(&mut self, ascending: bool) -> Result<&mut Self> {
        if !self.sorts.is_empty() {
            return Err(Error::unsupported(
                "primary-key ordering cannot be combined with catalog sorts",
            ));
        }
        if self.sort_primary_key.is_some() {
            return Err(Error::duplicate_parameter(
                "primary-key ordering is already set",
            ));
        }
        self.sort_primary_key = Some(ascending);
        Ok(self)
    }

    /// Request distinct-value counts over one catalog. At most one facet
    /// per catalog.
    pub fn facet<K>(&mut self, catalog: &CatalogHandle<K>) -> Result<&mut Self> {
        self.engine.catalog_dyn(catalog.name())?;
        if self.facets.iter().any(|name| name == catalog.name()) {
            return Err(Error::duplicate_parameter(format!(
                "second facet parameter on catalog '{}'",
                catalog.name()
            )));
        }
        self.facets.push(catalog.name().to_string());
        Ok(self)
    }

    /// Cap the facet scan to one thread.
    pub fn disable_parallel(&mut self) -> &mut Self {
        self.disable_parallel = true;
        self
    }

    /// Count each faceted key as matched-or-not instead of exactly.
    pub fn short_circuit_counting(&mut self) -> &mut Self {
        self.short_circuit_counting = true;
        self
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Execute once, returning the page `skip..skip + take` plus the
    /// total count and requested facets.
    pub fn execute(&self, skip: u32, take: u32) -> Result<QueryOutput<P>> {
        if self
            .executed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(Error::already_executed("this query has already run"));
        }
        let start = Instant::now();
        self.validate_filters()?;

        let mut candidate = match &self.filter {
            Some(clause) => self.evaluate(clause)?,
            None => self.engine.universe()?,
        };
        if !self.amongst.is_empty() {
            let mut mask = Vector::new(Compression::None, self.engine.allow_unsafe())?;
            for primary_key in &self.amongst {
                if let Some(position) = self.engine.position_of(primary_key) {
                    mask.set_bit(position, true)?;
                }
            }
            candidate.and_in_place(&mask)?;
        }
        self.engine.clear_tombstones(&mut candidate)?;

        let total = candidate.population();
        let skip = skip as usize;
        let take = take as usize;
        let limit = skip.saturating_add(take);

        let positions: Vec<u32> = if let Some(ascending) = self.sort_primary_key {
            let mut pairs: Vec<(&P, u32)> = candidate
                .ones()
                .filter_map(|position| {
                    self.engine
                        .primary_key_at(position)
                        .map(|primary_key| (primary_key, position))
                })
                .collect();
            pairs.sort_by(|a, b| if ascending { a.0.cmp(b.0) } else { b.0.cmp(a.0) });
            pairs.into_iter().map(|(_, position)| position).collect()
        } else if self.sorts.is_empty() {
            candidate.ones().take(limit).collect()
        } else {
            let mut ordered = Vec::new();
            self.collect_sorted(&self.sorts, &candidate, limit, &mut ordered)?;
            ordered
        };
        let primary_keys: Vec<P> = positions
            .into_iter()
            .skip(skip)
            .take(take)
            .filter_map(|position| self.engine.primary_key_at(position).cloned())
            .collect();

        let mut facets = HashMap::new();
        for name in &self.facets {
            let counts = self.engine.catalog_dyn(name)?.facet_counts(
                &candidate,
                self.disable_parallel,
                self.short_circuit_counting,
            )?;
            facets.insert(name.clone(), counts);
        }

        Ok(QueryOutput {
            primary_keys,
            total,
            elapsed: start.elapsed(),
            facets,
        })
    }

    /// Reject unknown catalogs and second filters on one-to-one catalogs.
    fn validate_filters(&self) -> Result<()> {
        let Some(clause) = &self.filter else {
            return Ok(());
        };
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for parameter in clause.leaves() {
            let catalog = self.engine.catalog_dyn(parameter.catalog())?;
            let count = counts.entry(parameter.catalog()).or_insert(0);
            *count += 1;
            if catalog.one_to_one() && *count > 1 {
                return Err(Error::duplicate_parameter(format!(
                    "second filter on one-to-one catalog '{}'",
                    parameter.catalog()
                )));
            }
        }
        Ok(())
    }

    fn evaluate(&self, clause: &FilterClause) -> Result<Vector> {
        match clause {
            FilterClause::Leaf(parameter) => {
                let mut candidate = self.engine.universe()?;
                self.engine
                    .catalog_dyn(parameter.catalog())?
                    .apply_filter(parameter.op(), &mut candidate)?;
                Ok(candidate)
            }
            FilterClause::And(children) => {
                let mut children = children.iter();
                let mut folded = match children.next() {
                    Some(first) => self.evaluate(first)?,
                    None => return self.engine.universe(),
                };
                for child in children {
                    let evaluated = self.evaluate(child)?;
                    folded.and_in_place(&evaluated)?;
                }
                Ok(folded)
            }
            FilterClause::Or(children) => {
                let evaluated: Vec<Vector> = children
                    .iter()
                    .map(|child| self.evaluate(child))
                    .collect::<Result<_>>()?;
                match evaluated.len() {
                    0 => {
                        let mut empty = self.engine.universe()?;
                        empty.clear();
                        Ok(empty)
                    }
                    1 => Ok(evaluated.into_iter().next().unwrap()),
                    _ => {
                        let refs: Vec<&Vector> = evaluated.iter().collect();
                        Vector::or_out_of_place(&refs)
                    }
                }
            }
            FilterClause::Not(child) => {
                let inner = self.evaluate(child)?;
                let mut universe = self.engine.universe()?;
                for position in inner.ones() {
                    universe.set_bit(position, false)?;
                }
                Ok(universe)
            }
        }
    }

    /// Cartesian sort composition: split the candidate by the first sort
    /// catalog's keys, recurse into each group with the remaining sorts,
    /// and emit ascending positions at the bottom. Stops once `limit`
    /// positions are collected.
    fn collect_sorted(
        &self,
        sorts: &[(String, bool)],
        candidate: &Vector,
        limit: usize,
        out: &mut Vec<u32>,
    ) -> Result<()> {
        if out.len() >= limit {
            return Ok(());
        }
        match sorts.split_first() {
            None => {
                for position in candidate.ones() {
                    out.push(position);
                    if out.len() >= limit {
                        break;
                    }
                }
            }
            Some(((name, ascending), rest)) => {
                let catalog = self.engine.catalog_dyn(name)?;
                for group in catalog.sort_partition(candidate, *ascending)? {
                    self.collect_sorted(rest, &group, limit, out)?;
                    if out.len() >= limit {
                        break;
                    }
                }
            }
        }
        Ok(())
    }
}
