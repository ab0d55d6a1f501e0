// src/dag/mod.rs

//! Job graph and status machine.
//!
//! - [`status`] holds the lifecycle vocabulary and its legal transitions.
//! - [`job`] is the per-job record (parameters, resources, bookkeeping).
//! - [`graph`] owns every job of an experiment plus the parent/child edges,
//!   and answers "what can run now" queries.
//! - [`builder`] expands a configuration into a graph.

pub mod builder;
pub mod graph;
pub mod job;
pub mod status;

pub use builder::build_job_graph;
pub use graph::{Capacity, JobGraph};
pub use job::Job;
pub use status::{Status, Transition};
