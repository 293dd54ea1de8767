//! # Context Vault
//!
//! A local-first knowledge store. Text is imported into chunked documents,
//! every record is encoded as a canonical frame, raw bytes live in a
//! content-addressed object store, and every mutation is written to a
//! hash-chained audit log before it reaches the in-memory index.
//!
//! ## Architecture
//!
//! ```text
//!  text ──▶ Chunker ──▶ Codec ──┬──▶ Object Store   objects/<h[0:2]>/<h>
//!                               ├──▶ Audit Log      audit/<seq>.log
//!                               └──▶ Index          index/<table>.json
//!                                         │
//!                                         ▼
//!                               Hybrid Retriever ──▶ results / evidence
//! ```
//!
//! Pure logic (records, codec, chunker, embeddings, ranking) lives in the
//! `context-vault-core` crate; this crate owns everything that touches the
//! filesystem.
//!
//! ## Quick Start
//!
//! ```bash
//! cvault init
//! cvault import ./notes
//! cvault search "deployment"
//! cvault fact add fox is_a canine --confidence 0.9
//! cvault verify
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | [`VaultError`] taxonomy |
//! | [`object_store`] | Content-addressed blobs and integrity scans |
//! | [`index`] | In-memory tables, tombstones, snapshots |
//! | [`audit`] | Hash-chained audit log and export packages |
//! | [`signature`] | HMAC frame signatures |
//! | [`embedding`] | Provider selection |
//! | [`vault`] | The [`Vault`] facade |
//! | [`import`] | File and directory import |
//! | [`search`], [`get`], [`facts`], [`verify`], [`export`], [`stats`] | CLI commands |

mod atomic;
pub mod audit;
pub mod config;
pub mod embedding;
pub mod error;
pub mod export;
pub mod facts;
pub mod get;
pub mod import;
pub mod index;
pub mod object_store;
pub mod search;
pub mod signature;
pub mod stats;
pub mod vault;
pub mod verify;

pub use error::{Result, VaultError};
pub use vault::Vault;
