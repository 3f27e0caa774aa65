// Cover letter service - API core
//
// Accepts a job posting URL, runs it through the staged pipeline from the
// `stagecoach` crate (fetch, extract, filter, generate) and exposes job
// status over HTTP and Server-Sent Events.

pub mod config;
pub mod kernel;
pub mod server;
pub mod stages;

pub use config::*;
