//! Spec discovery providers
//!
//! Each provider feeds the catalog from one discovery mechanism: the
//! process environment, a watched directory, or a kubernetes cluster. The
//! long-lived providers run their own event loop and invoke the catalog's
//! mutators directly; the catalog is the single serialization point.

pub mod environment;
pub mod file_watcher;
pub mod kubernetes;
