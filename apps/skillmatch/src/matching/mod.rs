//! Skillset matching engine.
//!
//! ```text
//! text ─► extractor ─► terms ─► embedding ─► vector ─► cluster::assign ─► cluster id
//!                                               │
//! query vector + same-cluster candidates ───────┴──► ranker::rank ─► ranked ids
//! ```
//!
//! `pipeline::MatchingEngine` wires the stages together; `handlers` exposes it
//! over HTTP.

pub mod cluster;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod handlers;
pub mod pipeline;
pub mod ranker;
pub mod types;

pub use error::MatchError;
