//! Connection-graph escape analysis for Prism's optimizing JIT tier.
//!
//! - Sea-of-Nodes IR with alias classes and class metadata
//! - Escape state computation for every allocation site
//! - Scalar replaceability classification
//! - Unique-instance types and per-instance memory slices
pub mod ir;
pub mod opt;
