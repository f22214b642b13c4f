//! Character-encoding stage: validates text against a target encoding,
//! optionally replacing invalid sequences and non-printable characters.

use crate::error::{Result, StreamError};
use crate::stage::{
    closed_error, Direction, Downstream, ReadStage, StageFactory, StageId, StageOptions,
    Upstream, WriteStage,
};
use std::fmt;
use std::io::{self, Read, Write};
use std::str::FromStr;

const CHUNK_SIZE: usize = 64 * 1024;

/// Target encodings the stage can validate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    #[default]
    Utf8,
    Ascii,
}

impl FromStr for Encoding {
    type Err = StreamError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Self::Utf8),
            "ascii" | "us-ascii" => Ok(Self::Ascii),
            _ => Err(StreamError::Config(format!("unsupported encoding: {}", s))),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Utf8 => write!(f, "UTF-8"),
            Encoding::Ascii => write!(f, "US-ASCII"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cleaner {
    #[default]
    None,
    /// Control characters other than `\r` and `\n`
    NonPrintable,
}

impl FromStr for Cleaner {
    type Err = StreamError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(Self::None),
            "non_printable" | "non-printable" => Ok(Self::NonPrintable),
            _ => Err(StreamError::Config(format!("unsupported cleaner: {}", s))),
        }
    }
}

/// Incremental validator shared by the read and write sides
#[derive(Debug, Clone)]
pub struct Transcoder {
    encoding: Encoding,
    replace: Option<String>,
    cleaner: Cleaner,
    pending: Vec<u8>,
}

impl Transcoder {
    pub fn new(encoding: Encoding, replace: Option<String>, cleaner: Cleaner) -> Self {
        Self {
            encoding,
            replace,
            cleaner,
            pending: Vec::new(),
        }
    }

    pub fn from_options(options: &StageOptions) -> Result<Self> {
        let stage = StageId::ENCODE;
        let encoding = options
            .parse::<Encoding>(&stage, "encoding")?
            .unwrap_or_default();
        let cleaner = options.parse::<Cleaner>(&stage, "cleaner")?.unwrap_or_default();
        let replace = options.get("replace").map(str::to_string);
        Ok(Self::new(encoding, replace, cleaner))
    }

    /// Convert `input`, appending to `out`. A sequence cut off at the end of
    /// `input` is held back until the next call.
    pub fn push(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<()> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(input);

        match self.encoding {
            Encoding::Ascii => {
                for &byte in &buf {
                    if byte.is_ascii() {
                        self.emit_char(byte as char, out);
                    } else {
                        self.invalid(&[byte], out)?;
                    }
                }
            }
            Encoding::Utf8 => {
                let mut rest = &buf[..];
                loop {
                    match std::str::from_utf8(rest) {
                        Ok(text) => {
                            self.emit(text, out);
                            break;
                        }
                        Err(e) => {
                            let (valid, tail) = rest.split_at(e.valid_up_to());
                            self.emit(&String::from_utf8_lossy(valid), out);
                            match e.error_len() {
                                Some(len) => {
                                    self.invalid(&tail[..len], out)?;
                                    rest = &tail[len..];
                                }
                                None => {
                                    self.pending = tail.to_vec();
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// End of data: a held-back partial sequence is invalid
    pub fn finish(&mut self, out: &mut Vec<u8>) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let pending = std::mem::take(&mut self.pending);
        self.invalid(&pending, out)
    }

    fn invalid(&self, bytes: &[u8], out: &mut Vec<u8>) -> Result<()> {
        match &self.replace {
            Some(replacement) => {
                out.extend_from_slice(replacement.as_bytes());
                Ok(())
            }
            None => Err(StreamError::transform(
                StageId::ENCODE,
                format!("invalid byte sequence {:02X?} for {}", bytes, self.encoding),
            )),
        }
    }

    fn emit(&self, text: &str, out: &mut Vec<u8>) {
        if self.cleaner == Cleaner::None {
            out.extend_from_slice(text.as_bytes());
            return;
        }
        for ch in text.chars() {
            self.emit_char(ch, out);
        }
    }

    fn emit_char(&self, ch: char, out: &mut Vec<u8>) {
        let printable = !ch.is_control() || ch == '\r' || ch == '\n';
        if self.cleaner == Cleaner::NonPrintable && !printable {
            if let Some(replacement) = &self.replace {
                out.extend_from_slice(replacement.as_bytes());
            }
            return;
        }
        let mut utf8 = [0u8; 4];
        out.extend_from_slice(ch.encode_utf8(&mut utf8).as_bytes());
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeStage;

impl StageFactory for EncodeStage {
    fn id(&self) -> StageId {
        StageId::ENCODE
    }

    fn validate(&self, _direction: Direction, options: &StageOptions) -> Result<()> {
        options.reject_unknown(&StageId::ENCODE, &["encoding", "replace", "cleaner"])?;
        Transcoder::from_options(options).map(|_| ())
    }

    fn reader(&self, upstream: Upstream, options: &StageOptions) -> Result<Box<dyn ReadStage>> {
        Ok(Box::new(EncodeReader {
            transcoder: Transcoder::from_options(options)?,
            inner: Some(upstream.into_stream()?),
            chunk: vec![0u8; CHUNK_SIZE],
            out: Vec::new(),
            pos: 0,
            eof: false,
            failed: None,
        }))
    }

    fn writer(
        &self,
        downstream: Downstream,
        options: &StageOptions,
    ) -> Result<Box<dyn WriteStage>> {
        Ok(Box::new(EncodeWriter {
            transcoder: Transcoder::from_options(options)?,
            inner: Some(downstream.into_stream()?),
            out: Vec::new(),
        }))
    }
}

struct EncodeReader {
    transcoder: Transcoder,
    inner: Option<Box<dyn ReadStage>>,
    chunk: Vec<u8>,
    out: Vec<u8>,
    pos: usize,
    eof: bool,
    /// Transform failure that ended the stream; repeated on later reads
    failed: Option<String>,
}

impl EncodeReader {
    fn fill(&mut self) -> Result<()> {
        let inner = self.inner.as_mut().ok_or_else(closed_error)?;
        self.out.clear();
        self.pos = 0;
        while self.out.is_empty() && !self.eof {
            let n = inner.read(&mut self.chunk)?;
            if n == 0 {
                self.eof = true;
                self.transcoder.finish(&mut self.out)?;
            } else {
                self.transcoder.push(&self.chunk[..n], &mut self.out)?;
            }
        }
        Ok(())
    }
}

impl Read for EncodeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(message) = &self.failed {
            return Err(StreamError::transform(StageId::ENCODE, message.clone()).into());
        }
        if self.pos == self.out.len() {
            if self.eof {
                return Ok(0);
            }
            if let Err(err) = self.fill() {
                if let StreamError::Transform { message, .. } = &err {
                    self.failed = Some(message.clone());
                }
                return Err(err.into());
            }
        }
        let n = buf.len().min(self.out.len() - self.pos);
        buf[..n].copy_from_slice(&self.out[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl ReadStage for EncodeReader {
    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut inner) => inner.close(),
            None => Ok(()),
        }
    }
}

struct EncodeWriter {
    transcoder: Transcoder,
    inner: Option<Box<dyn WriteStage>>,
    out: Vec<u8>,
}

impl Write for EncodeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let inner = self.inner.as_mut().ok_or_else(closed_error)?;
        self.out.clear();
        self.transcoder.push(buf, &mut self.out)?;
        inner.write_all(&self.out)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl WriteStage for EncodeWriter {
    fn close(&mut self) -> Result<()> {
        let Some(mut inner) = self.inner.take() else {
            return Ok(());
        };
        self.out.clear();
        let finished = self
            .transcoder
            .finish(&mut self.out)
            .and_then(|()| Ok(inner.write_all(&self.out)?));
        let closed = inner.close();
        finished.and(closed)
    }
}
