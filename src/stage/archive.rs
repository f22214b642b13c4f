//! Zip archive stage.
//!
//! Reading exposes a single entry (the first file, or the one named by the
//! `entry` option) as a plain byte stream. Writing produces an archive with
//! one deflated entry. Both directions need a seekable file, so the builder
//! materializes streams before this stage sees them.

use crate::capability::{SystemZip, ZipBackend, ZIP_ARCHIVES};
use crate::error::{Result, StreamError};
use crate::stage::{
    closed_error, Access, Direction, Downstream, ReadStage, StageFactory, StageId,
    StageOptions, Upstream, WriteStage,
};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

#[derive(Debug, Clone, Copy, Default)]
pub struct ZipStage;

impl StageFactory for ZipStage {
    fn id(&self) -> StageId {
        StageId::ZIP
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["zip"]
    }

    fn access(&self, _direction: Direction) -> Access {
        Access::RandomAccess
    }

    fn check_available(&self) -> Result<()> {
        ZIP_ARCHIVES.resolve().map(|_| ())
    }

    fn validate(&self, direction: Direction, options: &StageOptions) -> Result<()> {
        options.reject_unknown(&StageId::ZIP, &["entry"])?;
        match (direction, options.get("entry")) {
            (Direction::Write, Some(entry)) => entry_path(entry).map(|_| ()),
            _ => Ok(()),
        }
    }

    fn reader(&self, upstream: Upstream, options: &StageOptions) -> Result<Box<dyn ReadStage>> {
        let path = match upstream {
            Upstream::File(path) => path,
            Upstream::Stream(_) => return Err(needs_file()),
        };
        let wanted = options.get("entry");
        match ZIP_ARCHIVES.resolve()? {
            #[cfg(feature = "zip")]
            ZipBackend::Embedded => embedded::open_entry(&path, wanted),
            #[cfg(not(feature = "zip"))]
            ZipBackend::Embedded => Err(ZIP_ARCHIVES.missing()),
            ZipBackend::System(sys) => open_with_unzip(sys, &path, wanted),
        }
    }

    fn writer(
        &self,
        downstream: Downstream,
        options: &StageOptions,
    ) -> Result<Box<dyn WriteStage>> {
        let path = match downstream {
            Downstream::File(path) => path,
            Downstream::Stream(_) => return Err(needs_file()),
        };
        let entry = options
            .get("entry")
            .map(str::to_string)
            .unwrap_or_else(|| default_entry_name(options.file_name()));
        match ZIP_ARCHIVES.resolve()? {
            #[cfg(feature = "zip")]
            ZipBackend::Embedded => embedded::create_entry(&path, &entry),
            #[cfg(not(feature = "zip"))]
            ZipBackend::Embedded => Err(ZIP_ARCHIVES.missing()),
            ZipBackend::System(sys) => create_with_zip(sys, &path, &entry, options.temp_dir()),
        }
    }
}

/// Relative path an entry name maps to; `..`, roots and empty names are refused
fn entry_path(entry: &str) -> Result<PathBuf> {
    let path = Path::new(entry);
    let normal = path
        .components()
        .all(|part| matches!(part, Component::Normal(_)));
    if entry.is_empty() || entry.ends_with('/') || !normal {
        return Err(StreamError::Config(format!(
            "zip entry name {:?} must be a relative file path",
            entry
        )));
    }
    Ok(path.to_path_buf())
}

/// `unzip` treats member names as wildcard patterns; match `name` literally
fn unzip_literal(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        if matches!(c, '\\' | '[' | '*' | '?') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn needs_file() -> StreamError {
    StreamError::Config("zip stage was handed a stream instead of a file".into())
}

/// Entry name for a new archive: the resource's base name up to `.zip`
pub fn default_entry_name(file_name: Option<&str>) -> String {
    let base = file_name
        .and_then(|name| name.rsplit(|c: char| c == '/' || c == '\\').next())
        .unwrap_or("");
    let stem = match base.to_ascii_lowercase().rfind(".zip") {
        Some(idx) => &base[..idx],
        None => base,
    };
    if stem.is_empty() {
        "data".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(feature = "zip")]
mod embedded {
    use super::*;
    use crate::stage::relabel;
    use ::zip::result::ZipError;
    use ::zip::write::FileOptions;
    use ::zip::{CompressionMethod, ZipArchive, ZipWriter};
    use std::io::{BufReader, Seek, SeekFrom};

    struct EntryLocation {
        name: String,
        data_start: u64,
        compressed_size: u64,
        method: CompressionMethod,
        crc32: u32,
    }

    pub(super) fn open_entry(path: &Path, wanted: Option<&str>) -> Result<Box<dyn ReadStage>> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(BufReader::new(file)).map_err(zip_error)?;
        let location = locate(&mut archive, wanted)?;

        let mut source = archive.into_inner();
        source.seek(SeekFrom::Start(location.data_start))?;
        let raw = source.take(location.compressed_size);
        let body: Box<dyn Read + Send> = match location.method {
            CompressionMethod::Stored => Box::new(raw),
            CompressionMethod::Deflated => Box::new(flate2::read::DeflateDecoder::new(raw)),
            other => {
                return Err(StreamError::transform(
                    StageId::ZIP,
                    format!("entry {} uses unsupported method {:?}", location.name, other),
                ))
            }
        };
        tracing::debug!(entry = %location.name, path = %path.display(), "opened zip entry");

        Ok(Box::new(EntryReader {
            body: Some(body),
            hasher: crc32fast::Hasher::new(),
            expected_crc: location.crc32,
            verified: false,
        }))
    }

    fn locate<R: Read + Seek>(
        archive: &mut ZipArchive<R>,
        wanted: Option<&str>,
    ) -> Result<EntryLocation> {
        for index in 0..archive.len() {
            let entry = archive.by_index_raw(index).map_err(zip_error)?;
            if entry.is_dir() || wanted.map_or(false, |name| entry.name() != name) {
                continue;
            }
            return Ok(EntryLocation {
                name: entry.name().to_string(),
                data_start: entry.data_start(),
                compressed_size: entry.compressed_size(),
                method: entry.compression(),
                crc32: entry.crc32(),
            });
        }
        let message = match wanted {
            Some(name) => format!("archive has no entry named {}", name),
            None => "archive contains no files".to_string(),
        };
        Err(StreamError::transform(StageId::ZIP, message))
    }

    struct EntryReader {
        body: Option<Box<dyn Read + Send>>,
        hasher: crc32fast::Hasher,
        expected_crc: u32,
        verified: bool,
    }

    impl EntryReader {
        fn verify(&mut self) -> Result<()> {
            if self.verified {
                return Ok(());
            }
            // a mismatch stays unverified, so every later read fails the same way
            let actual = self.hasher.clone().finalize();
            if actual != self.expected_crc {
                return Err(StreamError::transform(
                    StageId::ZIP,
                    format!(
                        "CRC mismatch: expected {:08x}, got {:08x}",
                        self.expected_crc, actual
                    ),
                ));
            }
            self.verified = true;
            Ok(())
        }
    }

    impl Read for EntryReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let body = self.body.as_mut().ok_or_else(closed_error)?;
            let n = body.read(buf).map_err(|e| relabel(&StageId::ZIP, e))?;
            if n == 0 && !buf.is_empty() {
                self.verify()?;
            } else {
                self.hasher.update(&buf[..n]);
            }
            Ok(n)
        }
    }

    impl ReadStage for EntryReader {
        fn close(&mut self) -> Result<()> {
            self.body = None;
            Ok(())
        }
    }

    pub(super) fn create_entry(path: &Path, entry: &str) -> Result<Box<dyn WriteStage>> {
        let file = File::create(path)?;
        let mut writer = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        writer.start_file(entry, options).map_err(zip_error)?;
        tracing::debug!(entry, path = %path.display(), "started zip entry");
        Ok(Box::new(EntryWriter {
            writer: Some(writer),
        }))
    }

    struct EntryWriter {
        writer: Option<ZipWriter<File>>,
    }

    impl Write for EntryWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            match self.writer.as_mut() {
                Some(writer) => writer.write(buf),
                None => Err(closed_error()),
            }
        }

        fn flush(&mut self) -> io::Result<()> {
            match self.writer.as_mut() {
                Some(writer) => writer.flush(),
                None => Ok(()),
            }
        }
    }

    impl WriteStage for EntryWriter {
        fn close(&mut self) -> Result<()> {
            match self.writer.take() {
                Some(mut writer) => {
                    let mut file = writer.finish().map_err(zip_error)?;
                    file.flush()?;
                    Ok(())
                }
                None => Ok(()),
            }
        }
    }

    fn zip_error(err: ZipError) -> StreamError {
        match err {
            ZipError::Io(e) => StreamError::Io(e),
            other => StreamError::transform(StageId::ZIP, other.to_string()),
        }
    }
}

fn open_with_unzip(
    sys: &SystemZip,
    path: &Path,
    wanted: Option<&str>,
) -> Result<Box<dyn ReadStage>> {
    let listing = Command::new(&sys.unzip)
        .arg("-Z1")
        .arg(path)
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()?;
    if !listing.status.success() {
        return Err(StreamError::transform(
            StageId::ZIP,
            format!("unzip could not list {}", path.display()),
        ));
    }
    let names = String::from_utf8_lossy(&listing.stdout);
    let name = names
        .lines()
        .filter(|name| !name.ends_with('/'))
        .find(|name| wanted.map_or(true, |w| *name == w))
        .map(str::to_string)
        .ok_or_else(|| StreamError::transform(StageId::ZIP, "archive contains no matching file"))?;

    let mut child = Command::new(&sys.unzip)
        .arg("-p")
        .arg(path)
        .arg(unzip_literal(&name))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;
    let stdout = child.stdout.take();
    tracing::debug!(entry = %name, unzip = %sys.unzip.display(), "streaming zip entry through unzip");
    Ok(Box::new(UnzipReader {
        child: Some(child),
        stdout,
        eof: false,
    }))
}

/// Entry bytes streamed from an `unzip -p` child process
struct UnzipReader {
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    eof: bool,
}

impl Read for UnzipReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stdout = self.stdout.as_mut().ok_or_else(closed_error)?;
        let n = stdout.read(buf)?;
        if n == 0 && !buf.is_empty() {
            self.eof = true;
        }
        Ok(n)
    }
}

impl ReadStage for UnzipReader {
    fn close(&mut self) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        self.stdout = None;
        if !self.eof {
            // caller stopped early; the exit status means nothing
            let _ = child.kill();
            child.wait()?;
            return Ok(());
        }
        let status = child.wait()?;
        if !status.success() {
            return Err(StreamError::transform(
                StageId::ZIP,
                format!("unzip exited with {}", status),
            ));
        }
        Ok(())
    }
}

fn create_with_zip(
    sys: &SystemZip,
    path: &Path,
    entry: &str,
    temp_dir: Option<&Path>,
) -> Result<Box<dyn WriteStage>> {
    let zip = sys.zip.clone().ok_or(StreamError::MissingDependency {
        capability: "zip archive writing",
        hint: "install the `zip` program or build with the `zip` feature",
    })?;

    let mut builder = tempfile::Builder::new();
    builder.prefix("streamstack_zip_");
    let staging = match temp_dir {
        Some(dir) => builder.tempdir_in(dir)?,
        None => builder.tempdir()?,
    };
    let entry = entry_path(entry)?;
    let staged = staging.path().join("entries").join(&entry);
    if let Some(parent) = staged.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = BufWriter::new(File::create(&staged)?);

    Ok(Box::new(ZipCommandWriter {
        zip,
        target: path.to_path_buf(),
        entry,
        file: Some(file),
        staging: Some(staging),
    }))
}

/// Stages the entry under `<scratch>/entries` and runs `zip` there on close,
/// so the stored name keeps its directories
struct ZipCommandWriter {
    zip: PathBuf,
    target: PathBuf,
    entry: PathBuf,
    file: Option<BufWriter<File>>,
    staging: Option<tempfile::TempDir>,
}

impl ZipCommandWriter {
    fn pack(&mut self, staging: &Path) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        let staging = std::env::current_dir()?.join(staging);
        let archive = staging.join("archive.zip");
        let status = Command::new(&self.zip)
            .current_dir(staging.join("entries"))
            .arg("-q")
            .arg("-nw")
            .arg(&archive)
            .arg(&self.entry)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .status()?;
        if !status.success() {
            return Err(StreamError::transform(
                StageId::ZIP,
                format!("zip exited with {}", status),
            ));
        }
        fs::copy(&archive, &self.target)?;
        Ok(())
    }
}

impl Write for ZipCommandWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(file) => file.write(buf),
            None => Err(closed_error()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl WriteStage for ZipCommandWriter {
    fn close(&mut self) -> Result<()> {
        let Some(staging) = self.staging.take() else {
            return Ok(());
        };
        let packed = self.pack(staging.path());
        let removed = staging
            .close()
            .map_err(|e| StreamError::Io(e).into_cleanup());
        packed.and(removed)
    }
}
