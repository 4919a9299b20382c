//! Integration tests for the NDB operator
//!
//! These tests require a Kubernetes cluster (kind works) and tell the story
//! of how database operators interact with NdbCluster resources.
//!
//! # Test Organization
//!
//! - `crd_operations`: Stories about creating, reading and updating
//!   NdbCluster resources through the Kubernetes API
//!
//! - `sync_passes`: Stories about the sync engine creating and updating the
//!   objects a cluster owns. Pods do not need to become ready; the stories
//!   stop at what a single pass does.
//!
//! # Running These Tests
//!
//! ```bash
//! cargo test --test kind -- --ignored
//!
//! # Only the sync stories, with logs
//! RUST_LOG=ndb_operator=debug cargo test --test kind sync_passes -- --ignored --nocapture
//! ```

mod crd_operations;
mod helpers;
mod sync_passes;
