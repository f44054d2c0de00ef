//! Transaction strategy layer for the unit of work
//!
//! This crate implements the per-scope transaction behavior:
//! - TransactionStrategy: NonTransactional or AmbientTransactional, picked once
//! - TransactionStatus: NotStarted -> Begun -> Committed -> Disposed
//! - Enlistment of every created context in the ambient transaction
//! - Best-effort disposal of the transaction and its enlisted contexts

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod strategy;

pub use strategy::{AmbientTransactionState, TransactionStatus, TransactionStrategy};
