//! Boolean filter trees.
//!
//! A [`FilterClause`] is an expression tree whose leaves are
//! [`FilterParameter`]s: one catalog plus an exact, multi-key, or range
//! match. Interior nodes combine children with `And`, `Or`, and `Not`.
//!
//! Composition flattens same-operation children on construction: `a & b
//! & c` is one ternary `And`, never nested binaries. Flattening is a
//! semantic property the evaluator relies on, not sugar: it keeps the
//! candidate intersection a single left fold.
//!
//! Filter keys are carried dynamically and downcast by the owning
//! catalog at evaluation time; a key of the wrong type for its catalog
//! surfaces as a `CatalogMismatch`.

use core::fmt;
use std::any::Any;

use crate::engine::CatalogHandle;

/// A dynamically typed filter key, resolved by the catalog it names.
pub(crate) type DynKey = Box<dyn Any + Send + Sync>;

/// The match a filter leaf performs against its catalog.
pub(crate) enum FilterOp {
    /// Exactly one key.
    Exact(DynKey),
    /// Any of several keys, deduplicated.
    Among(Vec<DynKey>),
    /// An inclusive key range; at least one bound is present.
    Range {
        min: Option<DynKey>,
        max: Option<DynKey>,
    },
}

impl fmt::Debug for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterOp::Exact(_) => write!(f, "Exact"),
            FilterOp::Among(keys) => write!(f, "Among({} keys)", keys.len()),
            FilterOp::Range { min, max } => write!(
                f,
                "Range(min={}, max={})",
                min.is_some(),
                max.is_some()
            ),
        }
    }
}

/// One filter leaf: a catalog name plus the match to run against it.
#[derive(Debug)]
pub struct FilterParameter {
    catalog: String,
    op: FilterOp,
}

impl FilterParameter {
    /// Match items holding exactly `key`.
    pub fn exact<K>(catalog: &CatalogHandle<K>, key: K) -> FilterParameter
    where
        K: Send + Sync + 'static,
    {
        FilterParameter {
            catalog: catalog.name().to_string(),
            op: FilterOp::Exact(Box::new(key)),
        }
    }

    /// Match items holding any of `keys`; duplicates are harmless.
    pub fn among<K>(catalog: &CatalogHandle<K>, keys: impl IntoIterator<Item = K>) -> FilterParameter
    where
        K: Send + Sync + 'static,
    {
        FilterParameter {
            catalog: catalog.name().to_string(),
            op: FilterOp::Among(keys.into_iter().map(|key| Box::new(key) as DynKey).collect()),
        }
    }

    /// Match items whose key falls in the inclusive range.
    ///
    /// At least one bound must be present; the evaluator rejects a
    /// fully open range.
    pub fn range<K>(catalog: &CatalogHandle<K>, min: Option<K>, max: Option<K>) -> FilterParameter
    where
        K: Send + Sync + 'static,
    {
        FilterParameter {
            catalog: catalog.name().to_string(),
            op: FilterOp::Range {
                min: min.map(|key| Box::new(key) as DynKey),
                max: max.map(|key| Box::new(key) as DynKey),
            },
        }
    }

    /// The catalog this leaf filters.
    #[inline]
    pub fn catalog(&self) -> &str {
        &self.catalog
    }

    #[inline]
    pub(crate) fn op(&self) -> &FilterOp {
        &self.op
    }
}

/// A Boolean combination of filter leaves.
#[derive(Debug)]
pub enum FilterClause {
    /// A single filter leaf.
    Leaf(FilterParameter),
    /// Every child must match.
    And(Vec<FilterClause>),
    /// Any child may match.
    Or(Vec<FilterClause>),
    /// The child must not match.
    Not(Box<FilterClause>),
}

impl FilterClause {
    /// Conjunction; nested `And` children are spliced in from either
    /// side, and a single child collapses to itself.
    pub fn and(clauses: impl IntoIterator<Item = FilterClause>) -> FilterClause {
        let mut children = Vec::new();
        for clause in clauses {
            match clause {
                FilterClause::And(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        if children.len() == 1 {
            children.into_iter().next().unwrap()
        } else {
            FilterClause::And(children)
        }
    }

    /// Disjunction; nested `Or` children are spliced in from either
    /// side, and a single child collapses to itself.
    pub fn or(clauses: impl IntoIterator<Item = FilterClause>) -> FilterClause {
        let mut children = Vec::new();
        for clause in clauses {
            match clause {
                FilterClause::Or(inner) => children.extend(inner),
                other => children.push(other),
            }
        }
        if children.len() == 1 {
            children.into_iter().next().unwrap()
        } else {
            FilterClause::Or(children)
        }
    }

    /// Negation of a single subclause.
    pub fn not(clause: FilterClause) -> FilterClause {
        FilterClause::Not(Box::new(clause))
    }

    /// Every leaf in the tree, in evaluation order.
    pub(crate) fn leaves(&self) -> Vec<&FilterParameter> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<&'a FilterParameter>) {
        match self {
            FilterClause::Leaf(parameter) => out.push(parameter),
            FilterClause::And(children) | FilterClause::Or(children) => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
            FilterClause::Not(child) => child.collect_leaves(out),
        }
    }
}

impl From<FilterParameter> for FilterClause {
    fn from(parameter: FilterParameter) -> FilterClause {
        FilterClause::Leaf(parameter)
    }
}

impl<R: Into<FilterClause>> std::ops::BitAnd<R> for FilterClause {
    type Output = FilterClause;

    fn bitand(self, rhs: R) -> FilterClause {
        FilterClause::and([self, rhs.into()])
    }
}

impl<R: Into<FilterClause>> std::ops::BitOr<R> for FilterClause {
    type Output = FilterClause;

    fn bitor(self, rhs: R) -> FilterClause {
        FilterClause::or([self, rhs.into()])
    }
}

impl std::ops::Not for FilterClause {
    type Output = FilterClause;

    fn not(self) -> FilterClause {
        FilterClause::not(self)
    }
}

impl<R: Into<FilterClause>> std::ops::BitAnd<R> for FilterParameter {
    type Output = FilterClause;

    fn bitand(self, rhs: R) -> FilterClause {
        FilterClause::and([self.into(), rhs.into()])
    }
}

impl<R: Into<FilterClause>> std::ops::BitOr<R> for FilterParameter {
    type Output = FilterClause;

    fn bitor(self, rhs: R) -> FilterClause {
        FilterClause::or([self.into(), rhs.into()])
    }
}

impl std::ops::Not for FilterParameter {
    type Output = FilterClause;

    fn not(self) -> FilterClause {
        FilterClause::not(self.into())
    }
}
