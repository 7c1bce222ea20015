//! Client for the urlscan.io API and the concurrency/pagination machinery
//! the commands are built on.

pub mod batch;
pub mod client;
pub mod context;
pub mod error;
pub mod iterator;
pub mod transport;
pub mod wait;

pub use batch::{BatchOptions, BatchTask};
pub use client::{
  Client, ClientBuilder, ScanOptions, DEFAULT_HOST, VISIBILITIES,
};
pub use context::TaskContext;
pub use error::{ApiError, Error, Result};
pub use iterator::{
  HostnameIterator, IteratorOptions, ResultIterator, SearchIterator,
  MAX_TOTAL,
};
pub use wait::WaitOptions;
