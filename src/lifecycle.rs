//! Lifecycle Coordinator.
//!
//! A chain owns its outermost stage (which owns everything beneath it) and
//! the temp files created while it was built. Closing a chain closes the
//! stages from the outside in, then deletes the temp files. Dropping an
//! unclosed chain does the same and logs what went wrong.

use crate::error::{Result, StreamError};
use crate::pipeline::{PipelineBuilder, Resource};
use crate::stage::{closed_error, tolerate_closed, Direction, ReadStage, StageId, WriteStage};
use crate::temp::{release_all, TempFile};
use std::io::{self, Read, Write};
use std::path::Path;

/// The composed read stream handed to callers
pub struct ReadChain {
    stream: Box<dyn ReadStage>,
    temps: Vec<TempFile>,
    stages: Vec<StageId>,
    closed: bool,
}

impl ReadChain {
    pub(crate) fn new(stream: Box<dyn ReadStage>, temps: Vec<TempFile>, stages: Vec<StageId>) -> Self {
        Self {
            stream,
            temps,
            stages,
            closed: false,
        }
    }

    /// Stage ids, innermost first
    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    /// Temp files still held by the chain
    pub fn temp_paths(&self) -> Vec<&Path> {
        live_paths(&self.temps)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Close every stage and delete the temp files. Later calls do nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let closed = match tolerate_closed(self.stream.close()) {
            // the data was fully delivered, only the release failed
            Err(err @ StreamError::Io(_)) => Err(err.into_cleanup()),
            other => other,
        };
        let released = release_all(&mut self.temps);
        closed.and(released)
    }
}

impl Read for ReadChain {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        self.stream.read(buf)
    }
}

impl Drop for ReadChain {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, stages = ?self.stages, "failed to close read chain");
        }
    }
}

/// The composed write stream handed to callers
pub struct WriteChain {
    stream: Box<dyn WriteStage>,
    temps: Vec<TempFile>,
    stages: Vec<StageId>,
    closed: bool,
}

impl WriteChain {
    pub(crate) fn new(stream: Box<dyn WriteStage>, temps: Vec<TempFile>, stages: Vec<StageId>) -> Self {
        Self {
            stream,
            temps,
            stages,
            closed: false,
        }
    }

    pub fn stages(&self) -> &[StageId] {
        &self.stages
    }

    pub fn temp_paths(&self) -> Vec<&Path> {
        live_paths(&self.temps)
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Finalize every stage, then delete the temp files. A finalization
    /// failure means the destination is invalid and is reported as-is.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let closed = tolerate_closed(self.stream.close());
        let released = release_all(&mut self.temps);
        closed.and(released)
    }
}

impl Write for WriteChain {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(closed_error());
        }
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.stream.flush()
    }
}

impl Drop for WriteChain {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, stages = ?self.stages, "failed to close write chain");
        }
    }
}

/// A chain of either direction, as returned by [`PipelineBuilder::build`]
pub enum Chain {
    Read(ReadChain),
    Write(WriteChain),
}

impl Chain {
    pub fn direction(&self) -> Direction {
        match self {
            Chain::Read(_) => Direction::Read,
            Chain::Write(_) => Direction::Write,
        }
    }

    pub fn stages(&self) -> &[StageId] {
        match self {
            Chain::Read(chain) => chain.stages(),
            Chain::Write(chain) => chain.stages(),
        }
    }

    pub fn temp_paths(&self) -> Vec<&Path> {
        match self {
            Chain::Read(chain) => chain.temp_paths(),
            Chain::Write(chain) => chain.temp_paths(),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        match self {
            Chain::Read(chain) => chain.close(),
            Chain::Write(chain) => chain.close(),
        }
    }
}

fn live_paths(temps: &[TempFile]) -> Vec<&Path> {
    temps
        .iter()
        .filter(|temp| !temp.is_released())
        .map(TempFile::path)
        .collect()
}

/// Combine a body's outcome with the result of closing its chain.
/// A body failure always wins; the close failure is only logged then.
pub(crate) fn settle<T>(outcome: Result<T>, closed: Result<()>) -> Result<T> {
    match (outcome, closed) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            tracing::warn!(error = %close_err, "close failed after an earlier error");
            Err(err)
        }
    }
}

/// Read `source` through `from` and write it to `target` through `to`.
/// Returns the number of logical bytes copied.
pub fn copy_with(
    from: &PipelineBuilder<'_>,
    source: impl Into<Resource>,
    to: &PipelineBuilder<'_>,
    target: impl Into<Resource>,
) -> Result<u64> {
    let target = target.into();
    from.read(source, |input| {
        to.write(target, |output| {
            let copied = io::copy(input, output)?;
            tracing::debug!(bytes = copied, "copied between chains");
            Ok(copied)
        })
    })
}

/// Scoped read with stages inferred from the resource name
pub fn read<T, F>(resource: impl Into<Resource>, body: F) -> Result<T>
where
    F: FnOnce(&mut ReadChain) -> Result<T>,
{
    PipelineBuilder::from_env()?.read(resource, body)
}

/// Scoped write with stages inferred from the resource name
pub fn write<T, F>(resource: impl Into<Resource>, body: F) -> Result<T>
where
    F: FnOnce(&mut WriteChain) -> Result<T>,
{
    PipelineBuilder::from_env()?.write(resource, body)
}

/// Copy between two resources, inferring both stage lists from their names
pub fn copy(source: impl Into<Resource>, target: impl Into<Resource>) -> Result<u64> {
    let builder = PipelineBuilder::from_env()?;
    copy_with(&builder, source, &builder, target)
}
