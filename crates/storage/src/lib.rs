//! In-memory reference storage backend
//!
//! This crate implements every capability the unit of work consumes:
//! - MemoryBackend: StorageBackendFactory keyed by `Data Source`
//! - MemoryContext: change-tracking PersistenceContext with data filters
//! - MemoryTransactionProvider: ambient transactions with staged writes
//! - UuidIdAssigner: IdAssigner for new entities
//! - testing: operation journal and fault injection
//!
//! # Storage model
//!
//! Each database is a `BTreeMap<entity_type, BTreeMap<id, EntityRecord>>`
//! behind a `parking_lot::RwLock`. Databases are held in a `DashMap` by name
//! and shared by every context opened against the same `Data Source`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod connection;
pub mod context;
pub mod database;
pub mod ids;
pub mod testing;
pub mod transaction;

pub use backend::MemoryBackend;
pub use connection::ConnectionString;
pub use context::{MemoryContext, IS_DELETED_FIELD};
pub use database::{MemoryDatabase, WriteOp};
pub use ids::UuidIdAssigner;
pub use transaction::{MemoryTransaction, MemoryTransactionProvider};
