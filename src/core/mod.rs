//! Core domain types: identifiers, job records, flow specs and time.

pub mod clock;
pub mod flow;
pub mod job;
pub mod schedule;
pub mod types;
