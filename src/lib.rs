//! # recordcask
//!
//! An embeddable, file-backed record store for resource-constrained environments: a
//! heterogeneous set of typed record tables held in one main file, with an optional
//! write-ahead log for durability and an optional bounded LRU cache for hot reads.
//!
//! Unlike an LSM tree, there is no background compaction thread and no multi-level sorted
//! run structure: every mutation either appends to a small fixed-format WAL (folded into the
//! main file by a checkpoint) or goes straight through a copy-on-write rewrite of the main
//! file, installed atomically via a temp-file-then-rename.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                        Database                           │
//! │  ┌────────────┐   ┌───────────────┐   ┌─────────────────┐ │
//! │  │   Cache    │   │      WAL      │   │    Main file     │ │
//! │  │ (bounded,  │   │ (fixed, single│   │ (header + counts │ │
//! │  │  LRU)      │   │  segment)     │   │  + per-type data) │
//! │  └─────┬──────┘   └──────┬────────┘   └────────┬─────────┘ │
//! │        │  read overlay:  │  checkpoint:         │          │
//! │        │  cache -> wal   └─────────────►  rewrite engine    │
//! │        │  -> main file        (dedup, fold, atomic swap)   │
//! │        └────────────────────────────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`error`] | Crate-wide [`error::StoreError`] and [`error::Result`] alias |
//! | [`config`] | [`config::DbConfig`], [`config::WalConfig`], [`config::CacheConfig`] |
//! | [`io`] | CRC-accumulating [`io::Writer`]/[`io::Reader`] binary framing |
//! | [`record`] | The [`record::Record`] trait and the type-erased registry built on it |
//! | [`wal`] | The fixed, single-segment write-ahead log |
//! | [`cache`] | Bounded, linear-scan LRU read cache |
//! | [`query`] | Field-query engine ([`query::Query`], [`query::Condition`], glob `LIKE`) |
//! | [`store`] | [`store::Database`]: registration, CRUD, the read overlay, checkpointing |
//!
//! ## Key Features
//!
//! - **Copy-on-write rewrite engine** — every structural change to the main file is built in
//!   full, checksummed, and installed via `write tmp -> fsync -> rename -> fsync parent dir`,
//!   so a crash mid-rewrite never corrupts the previous file.
//! - **Optional write-ahead log** — point mutations append to a small journal instead of
//!   triggering a full rewrite each time; a checkpoint folds the journal into the main file
//!   once entry-count or size thresholds are crossed.
//! - **CRC-32 everywhere** — the main file header, every WAL entry, and the WAL header itself
//!   each carry their own checksum, so a torn write is detected and trimmed rather than read
//!   back as valid data.
//! - **Bounded LRU read cache** — keyed by `(type_index, id)`, invalidated wholesale on
//!   checkpoint and on any filter-based bulk mutation.
//! - **Typed field queries** — `Eq`/`Ne`/`Lt`/`Le`/`Gt`/`Ge`/`Between`/`Like`/`IsNull`/`NotNull`
//!   conditions evaluated against [`record::FieldDescriptor`]s, with a small backtracking
//!   glob matcher for `LIKE`.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::io::{Read, Write};
//!
//! use recordcask::config::DbConfig;
//! use recordcask::error::Result;
//! use recordcask::io::{Reader, Writer};
//! use recordcask::record::Record;
//! use recordcask::store::Database;
//!
//! #[derive(Debug, Clone)]
//! struct Product {
//!     id: u32,
//!     name: String,
//! }
//!
//! impl Record for Product {
//!     fn type_name() -> &'static str { "Product" }
//!     fn id(&self) -> u32 { self.id }
//!     fn set_id(&mut self, id: u32) { self.id = id; }
//!     fn write_to(&self, w: &mut Writer<&mut dyn Write>) -> Result<()> {
//!         w.write_u32(self.id)?;
//!         w.write_str(&self.name)?;
//!         Ok(())
//!     }
//!     fn read_from(r: &mut Reader<&mut dyn Read>) -> Result<Self> {
//!         Ok(Self { id: r.read_u32()?, name: r.read_str()? })
//!     }
//! }
//!
//! let db = Database::open(DbConfig::new("/tmp/recordcask-quickstart.db"))?;
//! db.register::<Product>()?;
//!
//! let id = db.add(Product { id: 0, name: "bolt".into() })?;
//! assert_eq!(db.get::<Product>(id)?.name, "bolt");
//!
//! db.delete::<Product>(id)?;
//! assert!(!db.exists::<Product>(id)?);
//!
//! db.close()?;
//! # Ok::<(), recordcask::error::StoreError>(())
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod io;
pub mod query;
pub mod record;
pub mod store;
pub mod wal;
