//! # Context Vault Core
//!
//! Pure logic for Context Vault: the record model, the canonical codec,
//! chunking, embedding utilities, and the hybrid ranking algorithm.
//!
//! This crate performs no filesystem I/O. Object storage, the metadata
//! index, the audit log and signing live in the `context-vault` crate,
//! which composes these pieces behind its `Vault` facade.

pub mod chunk;
pub mod codec;
pub mod embedding;
pub mod models;
pub mod search;
