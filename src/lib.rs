//! # Component Reconciler
//!
//! A library (and companion CLI) for installing, updating and deleting a Kubernetes
//! component — a bundle of resources produced by an external generator — with
//! wave-ordered Apply/Delete, drift detection, ownership tracking, and per-object
//! policies. The CLI binary in `src/bin/main.rs` consumes this library.

pub mod api_bridge;
pub mod cli;
pub mod config;
pub mod digest;
pub mod engine;
pub mod error;
pub mod field_manager;
pub mod generator;
pub mod inventory;
pub mod key;
pub mod normalizer;
pub mod object;
pub mod policy;
pub mod release_store;
pub mod status;
pub mod utils;

pub use config::ReconcilerConfig;
pub use engine::Engine;
pub use error::{K8sError, ReconcileError};
pub use inventory::{Inventory, InventoryItem};
pub use key::ObjectKey;
pub use object::Object;
