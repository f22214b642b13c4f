//! Stage contract shared by every transformation layer.
//!
//! A stage wraps exactly one underlying stream (or, for random-access stages,
//! one file path) and is owned by the chain that created it. Read stages own
//! the stage below them, so closing the outermost stage closes the whole
//! chain from the outside in.

pub mod archive;
pub mod compress;
pub mod encode;

pub use self::archive::*;
pub use self::compress::*;
pub use self::encode::*;

use crate::error::{Result, StreamError};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Identifier of a transformation stage, compared case-insensitively
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(Cow<'static, str>);

impl StageId {
    pub const GZIP: StageId = StageId::from_static("gzip");
    pub const ZSTD: StageId = StageId::from_static("zstd");
    pub const LZ4: StageId = StageId::from_static("lz4");
    pub const BROTLI: StageId = StageId::from_static("brotli");
    pub const ZIP: StageId = StageId::from_static("zip");
    pub const ENCODE: StageId = StageId::from_static("encode");

    /// `name` must already be lowercase
    pub const fn from_static(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Cow::Owned(name.as_ref().trim().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StageId {
    type Err = StreamError;
    fn from_str(s: &str) -> Result<Self> {
        let id = Self::new(s);
        if id.as_str().is_empty() {
            return Err(StreamError::UnknownStage(s.to_string()));
        }
        Ok(id)
    }
}

/// Parse a comma separated stage list such as `gzip,encode`
pub fn parse_stage_list(s: &str) -> Result<Vec<StageId>> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// What a stage needs from the layer beneath it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Works on a forward-only stream
    Sequential,
    /// Needs a seekable file path
    RandomAccess,
}

/// Named options handed to a stage factory, plus the context the builder knows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOptions {
    values: BTreeMap<String, String>,
    file_name: Option<String>,
    temp_dir: Option<PathBuf>,
}

impl StageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Overlay `other` on top of these options; `other` wins on conflicts
    pub fn merge(&mut self, other: &StageOptions) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
        if other.file_name.is_some() {
            self.file_name = other.file_name.clone();
        }
        if other.temp_dir.is_some() {
            self.temp_dir = other.temp_dir.clone();
        }
    }

    /// File name of the resource the chain was built for, when it has one
    pub fn file_name(&self) -> Option<&str> {
        self.file_name.as_deref()
    }

    pub fn set_file_name(&mut self, name: Option<String>) {
        self.file_name = name;
    }

    /// Directory stages should use for their own scratch files
    pub fn temp_dir(&self) -> Option<&Path> {
        self.temp_dir.as_deref()
    }

    pub fn set_temp_dir(&mut self, dir: Option<PathBuf>) {
        self.temp_dir = dir;
    }

    pub fn parse<T>(&self, stage: &StageId, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|raw| {
                raw.trim().parse::<T>().map_err(|e| StreamError::InvalidOption {
                    stage: stage.clone(),
                    option: key.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    pub fn level(
        &self,
        stage: &StageId,
        key: &str,
        range: RangeInclusive<u32>,
        default: u32,
    ) -> Result<u32> {
        let value = self.parse::<u32>(stage, key)?.unwrap_or(default);
        if !range.contains(&value) {
            return Err(StreamError::InvalidOption {
                stage: stage.clone(),
                option: key.to_string(),
                reason: format!(
                    "{} is outside {}..={}",
                    value,
                    range.start(),
                    range.end()
                ),
            });
        }
        Ok(value)
    }

    /// Fail on any option key the stage does not understand
    pub fn reject_unknown(&self, stage: &StageId, known: &[&str]) -> Result<()> {
        match self.values.keys().find(|key| !known.contains(&key.as_str())) {
            Some(key) => Err(StreamError::InvalidOption {
                stage: stage.clone(),
                option: key.clone(),
                reason: format!("unknown option, expected one of: {}", known.join(", ")),
            }),
            None => Ok(()),
        }
    }
}

/// A readable layer. `close` releases this layer and everything beneath it.
///
/// Closing twice must be harmless: either return `Ok(())` or report
/// [`StreamError::AlreadyClosed`], which the chain ignores.
pub trait ReadStage: Read + Send {
    fn close(&mut self) -> Result<()>;
}

/// A writable layer. `close` finalizes buffered output, then closes the
/// layers beneath it.
pub trait WriteStage: Write + Send {
    fn close(&mut self) -> Result<()>;
}

impl ReadStage for Box<dyn ReadStage> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

impl WriteStage for Box<dyn WriteStage> {
    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// What a read stage is built on top of
pub enum Upstream {
    Stream(Box<dyn ReadStage>),
    File(PathBuf),
}

impl Upstream {
    /// Open the file if this is a path; streams pass through
    pub fn into_stream(self) -> Result<Box<dyn ReadStage>> {
        match self {
            Upstream::Stream(stream) => Ok(stream),
            Upstream::File(path) => Ok(Box::new(BaseReader::open(&path)?)),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Upstream::Stream(_))
    }
}

/// What a write stage emits into
pub enum Downstream {
    Stream(Box<dyn WriteStage>),
    File(PathBuf),
}

impl Downstream {
    /// Create the file if this is a path; streams pass through
    pub fn into_stream(self) -> Result<Box<dyn WriteStage>> {
        match self {
            Downstream::Stream(stream) => Ok(stream),
            Downstream::File(path) => Ok(Box::new(BaseWriter::create(&path)?)),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Downstream::Stream(_))
    }
}

/// A StageFactory builds stage instances for one stage identifier.
///
/// Factories are stateless and shared by every pipeline in the process.
/// The builder hands a random-access factory a [`Upstream::File`] or
/// [`Downstream::File`], never a stream.
pub trait StageFactory: Send + Sync {
    fn id(&self) -> StageId;

    /// File suffixes (without the dot) that imply this stage
    fn extensions(&self) -> &'static [&'static str] {
        &[]
    }

    fn access(&self, _direction: Direction) -> Access {
        Access::Sequential
    }

    /// Fail with `MissingDependency` when the stage cannot run on this host
    fn check_available(&self) -> Result<()> {
        Ok(())
    }

    /// Reject malformed options before anything is opened
    fn validate(&self, _direction: Direction, _options: &StageOptions) -> Result<()> {
        Ok(())
    }

    fn reader(&self, upstream: Upstream, options: &StageOptions) -> Result<Box<dyn ReadStage>>;

    fn writer(&self, downstream: Downstream, options: &StageOptions)
        -> Result<Box<dyn WriteStage>>;
}

/// Raw bytes straight from the resource
pub struct BaseReader {
    inner: Option<Box<dyn Read + Send>>,
}

impl BaseReader {
    pub fn new(inner: Box<dyn Read + Send>) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(Box::new(file)))
    }
}

impl Read for BaseReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.read(buf),
            None => Err(closed_error()),
        }
    }
}

impl ReadStage for BaseReader {
    fn close(&mut self) -> Result<()> {
        self.inner = None;
        Ok(())
    }
}

/// Raw bytes straight into the resource
pub struct BaseWriter {
    inner: Option<Box<dyn Write + Send>>,
}

impl BaseWriter {
    pub fn new(inner: Box<dyn Write + Send>) -> Self {
        Self { inner: Some(inner) }
    }

    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }
}

impl Write for BaseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.inner.as_mut() {
            Some(inner) => inner.write(buf),
            None => Err(closed_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl WriteStage for BaseWriter {
    fn close(&mut self) -> Result<()> {
        match self.inner.take() {
            Some(mut inner) => Ok(inner.flush()?),
            None => Ok(()),
        }
    }
}

/// Read layer around a decoder that owns the stage beneath it.
///
/// `release` hands back the inner stage once the decoder is dropped, so it
/// can be closed after this layer.
pub struct DecodeLayer<D> {
    stage: StageId,
    decoder: Option<D>,
    release: fn(D) -> Box<dyn ReadStage>,
}

impl<D: Read + Send> DecodeLayer<D> {
    pub fn new(stage: StageId, decoder: D, release: fn(D) -> Box<dyn ReadStage>) -> Self {
        Self {
            stage,
            decoder: Some(decoder),
            release,
        }
    }
}

impl<D: Read + Send> Read for DecodeLayer<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.decoder.as_mut() {
            Some(decoder) => decoder.read(buf).map_err(|e| relabel(&self.stage, e)),
            None => Err(closed_error()),
        }
    }
}

impl<D: Read + Send> ReadStage for DecodeLayer<D> {
    fn close(&mut self) -> Result<()> {
        match self.decoder.take() {
            Some(decoder) => {
                let mut inner = (self.release)(decoder);
                inner.close()
            }
            None => Ok(()),
        }
    }
}

/// Write layer around an encoder that owns the stage beneath it.
///
/// `finish` writes the encoder's trailer and hands back the inner stage.
pub struct EncodeLayer<E> {
    stage: StageId,
    encoder: Option<E>,
    finish: fn(E) -> io::Result<Box<dyn WriteStage>>,
}

impl<E: Write + Send> EncodeLayer<E> {
    pub fn new(
        stage: StageId,
        encoder: E,
        finish: fn(E) -> io::Result<Box<dyn WriteStage>>,
    ) -> Self {
        Self {
            stage,
            encoder: Some(encoder),
            finish,
        }
    }
}

impl<E: Write + Send> Write for EncodeLayer<E> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.write(buf).map_err(|e| relabel(&self.stage, e)),
            None => Err(closed_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.encoder.as_mut() {
            Some(encoder) => encoder.flush(),
            None => Ok(()),
        }
    }
}

impl<E: Write + Send> WriteStage for EncodeLayer<E> {
    fn close(&mut self) -> Result<()> {
        match self.encoder.take() {
            Some(encoder) => {
                let mut inner = (self.finish)(encoder).map_err(|e| relabel(&self.stage, e))?;
                inner.close()
            }
            None => Ok(()),
        }
    }
}

/// A stage that reports it was already closed has finished its work
pub(crate) fn tolerate_closed(closed: Result<()>) -> Result<()> {
    match closed {
        Err(err) if err.is_already_closed() => {
            tracing::debug!(error = %err, "ignoring close of an already closed stage");
            Ok(())
        }
        other => other,
    }
}

pub(crate) fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "stream is closed")
}

/// Codec failures become Transform errors; typed errors from lower layers
/// and genuine device errors pass through untouched.
pub(crate) fn relabel(stage: &StageId, err: io::Error) -> io::Error {
    if err.get_ref().map_or(false, |e| e.is::<StreamError>()) {
        return err;
    }
    match err.kind() {
        io::ErrorKind::InvalidData
        | io::ErrorKind::InvalidInput
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::Other => StreamError::transform(stage.clone(), err.to_string()).into(),
        _ => err,
    }
}
