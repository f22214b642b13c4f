//! Bridges forward-only streams and stages that need a seekable file.
//!
//! Read side: [`materialize`] drains a stream into a scratch file.
//! Write side: [`SpillWriter`] lets a random-access stage write into a
//! scratch file and copies the result downstream when it is closed.

use crate::error::Result;
use crate::stage::{closed_error, tolerate_closed, ReadStage, WriteStage};
use crate::temp::{TempFile, TempFiles};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::PathBuf;

/// Copy buffer; memory use is bounded by this regardless of input size
pub const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Drain `input` into a new scratch file. On failure the partial file is
/// deleted before returning.
pub fn materialize(input: &mut dyn Read, temps: &TempFiles, tag: &str) -> Result<TempFile> {
    let mut scratch = temps.create(tag)?;
    let copied = {
        let mut out = BufWriter::with_capacity(COPY_BUFFER_SIZE, scratch.as_file_mut());
        let copied = io::copy(input, &mut out)?;
        out.flush()?;
        copied
    };
    let temp = TempFile::from(scratch);
    tracing::debug!(
        stage = tag,
        bytes = copied,
        path = %temp.path().display(),
        "materialized stream to temp file"
    );
    Ok(temp)
}

/// Write layer for a random-access stage whose destination is a stream
pub struct SpillWriter {
    stage: Box<dyn WriteStage>,
    spill: PathBuf,
    downstream: Option<Box<dyn WriteStage>>,
}

impl SpillWriter {
    /// `stage` must be writing into the file at `spill`
    pub fn new(stage: Box<dyn WriteStage>, spill: PathBuf, downstream: Box<dyn WriteStage>) -> Self {
        Self {
            stage,
            spill,
            downstream: Some(downstream),
        }
    }
}

impl Write for SpillWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.downstream.is_none() {
            return Err(closed_error());
        }
        self.stage.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stage.flush()
    }
}

impl WriteStage for SpillWriter {
    fn close(&mut self) -> Result<()> {
        let Some(mut downstream) = self.downstream.take() else {
            return Ok(());
        };
        let finished = tolerate_closed(self.stage.close()).and_then(|()| {
            let mut spilled = BufReader::with_capacity(COPY_BUFFER_SIZE, File::open(&self.spill)?);
            let copied = io::copy(&mut spilled, &mut downstream)?;
            tracing::debug!(bytes = copied, "copied spilled output downstream");
            Ok(())
        });
        let closed = tolerate_closed(downstream.close());
        finished.and(closed)
    }
}

/// Copy `input` to a scratch file, close the stream, and hand back the file
pub(crate) fn materialize_stage(
    mut input: Box<dyn ReadStage>,
    temps: &TempFiles,
    tag: &str,
) -> Result<TempFile> {
    let copied = materialize(&mut input, temps, tag);
    let closed = tolerate_closed(input.close());
    let temp = copied?;
    closed?;
    Ok(temp)
}
