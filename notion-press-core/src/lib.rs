#![doc = "notion-press-core: core logic library for notion-press."]

//! Mirrors pages from a block-structured document API (Notion) into posts of
//! a block-markup publishing system (WordPress).
//!
//! - [`pipeline`] turns a tree of [`block::SourceBlock`]s into post markup,
//!   dispatching each block through the [`converter`] registry.
//! - [`store`] keeps the durable page ↔ post mapping and the per-page sync lock.
//! - [`synchronise`] runs one page sync: delta check, lock, convert, publish.
//! - [`batch`] runs many page syncs as a cancellable, chunked batch.
//!
//! Remote systems are reached only through the traits in [`contract`]; the
//! CLI crate provides the HTTP implementations.
//!
//! # Usage
//! Add this as a dependency for conversion, mapping and sync logic. Mocks of
//! the contract traits are exported under the default `test-export-mocks`
//! feature.

pub mod batch;
pub mod block;
pub mod config;
pub mod contract;
pub mod converter;
pub mod error;
pub mod pipeline;
pub mod retry;
pub mod rich_text;
pub mod store;
pub mod synchronise;

pub use batch::{BatchProcessor, BatchProgress, BatchStatus};
pub use config::SyncConfig;
pub use error::SyncError;
pub use synchronise::{SyncOptions, SyncOrchestrator, SyncOutcome, SyncResult};
