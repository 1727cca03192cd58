//! HTTP handler implementations, one module per resource.

pub mod jobs;
pub mod pools;
