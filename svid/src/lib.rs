//! Core pipeline for the Street View Imagery Downloader (SVID): input
//! normalization into query points, per-stage CSV checkpointing,
//! proxy/user-agent rotation with bounded retry, and the batched
//! bounded-concurrency stage drivers the provider crates
//! (`svid-gsv`, `svid-mly`) plug their protocols into.

pub mod batch;
pub mod checkpoint;
pub mod completion;
pub mod dates;
pub mod error;
pub mod faillog;
pub mod input;
pub mod model;
pub mod net;
pub mod spatial;
pub mod table;

pub use error::SvidError;
