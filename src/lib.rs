//! Configuration synchronization subsystem for a panel-managed Xray core
//!
//! Architecture:
//! - `catalog`: supported protocols, their defaults and validation rules
//! - `security`: deployment-wide transport security (TLS) settings
//! - `store/`: persisted entities, the storage seam and typed adapters
//! - `xray/`: document synthesis, apply/rollback and the reconcile loop
//! - `config` / `logger` / `error`: agent plumbing

pub mod catalog;
pub mod config;
pub mod error;
pub mod logger;
pub mod security;
pub mod store;
pub mod xray;
