//! # Faceted
//!
//! In-memory faceted search over word-aligned hybrid (WAH) compressed
//! bitmaps.
//!
//! Items are tagged with typed attributes; each attribute gets an
//! inverted-index catalog mapping distinct keys to compressed bitmap
//! vectors of item positions. Queries compose Boolean filter trees over
//! catalogs, count distinct values per catalog (faceting), sort by key
//! order with multi-key composition, and page primary keys.
//!
//! ## Module Organization
//!
//! - [`wah`] - WAH bitmap vectors: the 31-bit word, the safe and
//!   pointer-arithmetic kernels, and the stateful [`Vector`]
//! - [`catalog`] - per-attribute inverted index with filter, facet, and
//!   sort primitives
//! - [`query`] - filter trees and one-shot query execution
//! - [`engine`] - the catalog registry, item/position allocation, and
//!   two-phase compaction
//!
//! ## Quick Start
//!
//! ```
//! use faceted::{Compression, Engine, FilterParameter};
//!
//! struct Sku {
//!     color: &'static str,
//! }
//!
//! let mut engine: Engine<Sku, u32> = Engine::new(false)?;
//! let color = engine.add_catalog(
//!     "color",
//!     Compression::CompressedWithPackedPosition,
//!     true,
//!     |sku: &Sku| vec![sku.color],
//! )?;
//! engine.add(&Sku { color: "red" }, 1)?;
//! engine.add(&Sku { color: "blue" }, 2)?;
//! engine.add(&Sku { color: "red" }, 3)?;
//!
//! let mut query = engine.create_query();
//! query.filter(FilterParameter::exact(&color, "red"));
//! query.facet(&color)?;
//! let result = query.execute(0, 10)?;
//! assert_eq!(result.primary_keys, vec![1, 3]);
//! assert_eq!(result.total, 2);
//! assert_eq!(result.facet_counts(&color), Some(&[("red", 2)][..]));
//! # Ok::<(), faceted::Error>(())
//! ```
//!
//! ## Concurrency
//!
//! Single writer, multiple readers: structural mutations take `&mut
//! Engine` and queries borrow `&Engine`, so the borrow checker enforces
//! the contract. Facet scans run across catalog entries in parallel
//! unless a query disables it.
//!
//! ## Features
//!
//! - `unsafe-kernels` (default) - compile the pointer-arithmetic bitmap
//!   kernels, selected at runtime by engines built with `allow_unsafe`
//! - `serde` - serialization for configuration and result types

// =============================================================================
// Core modules
// =============================================================================

/// WAH bitmap words, kernels, and vectors.
pub mod wah;

/// Crate-wide error type.
pub mod error;

// =============================================================================
// Engine modules
// =============================================================================

/// Per-attribute inverted index.
pub mod catalog;

/// Filter trees, query building, and execution.
pub mod query;

/// Catalog registry, item allocation, and compaction.
pub mod engine;

// =============================================================================
// Public re-exports
// =============================================================================

pub use catalog::Catalog;
pub use engine::{CatalogHandle, Engine};
pub use error::{Error, ErrorKind, Result};
pub use query::{FilterClause, FilterParameter, Query, QueryOutput};
pub use wah::{BitPositions, Compression, Vector, Word};
