//! Streamstack - Composable streaming pipelines over layered data encodings
//!
//! Callers name a resource (a file path or an open stream) and get back one
//! plain byte stream. The transformation stages that apply to it, such as
//! decompression, archive extraction or character-encoding cleanup, are
//! picked from the resource name or given explicitly, and are assembled and
//! torn down transparently.
//!
//! ## Chain Layout
//!
//! ```text
//! read:   file/stream → base → stage[0] → stage[1] → … → caller
//! write:  caller → … → stage[1] → stage[0] → base → file/stream
//! ```
//!
//! - **Stage**: one layer, built by a [`StageFactory`] registered under a [`StageId`]
//! - **Registry**: process-wide table of factories and the file suffixes they claim
//! - **Materialization**: stages that need a seekable file (zip) get one; forward-only
//!   streams are copied to a temp file first
//! - **Capabilities**: stages with alternate backends pick one per process
//! - **Lifecycle**: chains close outermost first and delete their temp files on every
//!   exit path
//!
//! ## Example
//!
//! ```no_run
//! use streamstack::{PipelineBuilder, StageId};
//! use std::io::{Read, Write};
//!
//! // Stages inferred from the name: [zip]
//! let text = streamstack::read("report.csv.zip", |input| {
//!     let mut text = String::new();
//!     input.read_to_string(&mut text)?;
//!     Ok(text)
//! }).unwrap();
//!
//! // Explicit stages, innermost first
//! PipelineBuilder::new()
//!     .explicit([StageId::GZIP])
//!     .option(StageId::GZIP, "level", "9")
//!     .write("report.csv.gz", |output| {
//!         output.write_all(text.as_bytes())?;
//!         Ok(())
//!     })
//!     .unwrap();
//! ```

pub mod capability;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod materialize;
pub mod pipeline;
pub mod registry;
pub mod stage;
pub mod temp;

pub use capability::{Capability, ZipBackend, ZIP_ARCHIVES};
pub use config::Config;
pub use error::{ErrorKind, Result, StreamError};
pub use lifecycle::{copy, copy_with, read, write, Chain, ReadChain, WriteChain};
pub use pipeline::{PipelineBuilder, Resource, Stages};
pub use registry::Registry;
pub use stage::{
    Access, Direction, Downstream, ReadStage, StageFactory, StageId, StageOptions, Upstream,
    WriteStage,
};
pub use temp::{TempFile, TempFiles};
