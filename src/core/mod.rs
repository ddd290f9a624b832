//! Collector runtime: the output frontend, header generation and the
//! sampling loop driving them.

pub mod executor;
pub mod header;
pub mod output;
