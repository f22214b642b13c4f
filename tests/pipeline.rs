use proptest::prelude::*;
use std::error::Error;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use streamstack::{
    Access, Config, Direction, Downstream, ErrorKind, PipelineBuilder, ReadStage, Registry,
    Resource, StageFactory, StageId, StageOptions, StreamError, Upstream, WriteStage,
};
use tempfile::tempdir;

/// Builder whose scratch files land in `scratch`
fn builder_in(scratch: &Path) -> PipelineBuilder<'static> {
    PipelineBuilder::new().config(Config {
        temp_dir: Some(scratch.to_path_buf()),
        ..Config::default()
    })
}

fn entries(dir: &Path) -> usize {
    fs::read_dir(dir).unwrap().count()
}

fn read_all(builder: &PipelineBuilder<'_>, resource: Resource) -> streamstack::Result<Vec<u8>> {
    builder.read(resource, |input| {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        Ok(data)
    })
}

fn write_all(
    builder: &PipelineBuilder<'_>,
    resource: impl Into<Resource>,
    data: &[u8],
) -> streamstack::Result<()> {
    builder.write(resource, |output| {
        output.write_all(data)?;
        Ok(())
    })
}

/// Input that hands out a few bytes at a time, like a socket
struct Trickle<R> {
    inner: R,
    chunk: usize,
}

impl<R: Read> Read for Trickle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = buf.len().min(self.chunk);
        self.inner.read(&mut buf[..n])
    }
}

/// Input that counts how often it was read
struct Counting {
    reads: Arc<AtomicUsize>,
}

impl Read for Counting {
    fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

struct CountingWriter {
    writes: Arc<AtomicUsize>,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Destination the test keeps a handle on after the chain takes it
#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn contents(&self) -> Vec<u8> {
        self.0.lock().unwrap().clone()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn empty_chains_leave_no_temp_files() -> Result<(), Box<dyn Error>> {
    let scratch = tempdir()?;
    let out = tempdir()?;
    let builder = builder_in(scratch.path());

    for id in Registry::global().ids() {
        let target = out.path().join(format!("empty.{}", id));
        let explicit = builder.clone().explicit([id.clone()]);

        let mut chain = explicit.writer(Resource::writer(File::create(&target)?))?;
        chain.close()?;
        assert_eq!(entries(scratch.path()), 0, "write chain for {} left files", id);

        let mut chain = explicit.reader(Resource::reader(File::open(&target)?))?;
        chain.close()?;
        assert_eq!(entries(scratch.path()), 0, "read chain for {} left files", id);
    }
    Ok(())
}

#[test]
fn chained_suffixes_round_trip() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("log.txt.zst.gz");
    let builder = builder_in(dir.path());
    let text = b"line one\nline two\n".repeat(200);

    write_all(&builder, path.as_path(), &text)?;
    assert_ne!(fs::read(&path)?, text);
    assert_eq!(read_all(&builder, Resource::from(path.as_path()))?, text);

    // layers come off in the inferred order
    let outer_only = builder.clone().explicit([StageId::GZIP]);
    let zstd_bytes = read_all(&outer_only, Resource::from(path.as_path()))?;
    let inner_only = builder.clone().explicit([StageId::ZSTD]);
    assert_eq!(read_all(&inner_only, Resource::reader(io::Cursor::new(zstd_bytes)))?, text);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn explicit_stages_round_trip(data in proptest::collection::vec(any::<u8>(), 0..8192)) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("payload.bin");
        let builder = builder_in(dir.path()).explicit([StageId::GZIP, StageId::ZSTD]);

        write_all(&builder, path.as_path(), &data).unwrap();
        let back = read_all(&builder, Resource::from(path.as_path())).unwrap();
        prop_assert_eq!(back, data);
    }

    #[test]
    fn lz4_brotli_round_trip(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("payload.lz4.br");
        let builder = builder_in(dir.path());

        write_all(&builder, path.as_path(), &data).unwrap();
        let back = read_all(&builder, Resource::from(path.as_path())).unwrap();
        prop_assert_eq!(back, data);
    }
}

#[test]
fn unknown_stage_fails_before_reading() {
    let reads = Arc::new(AtomicUsize::new(0));
    let builder = PipelineBuilder::new().explicit([StageId::GZIP, StageId::new("rar")]);
    let resource = Resource::reader(Counting {
        reads: Arc::clone(&reads),
    });

    let err = read_all(&builder, resource).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.to_string().contains("rar"));
    assert_eq!(reads.load(Ordering::SeqCst), 0);
}

#[test]
fn unknown_stage_fails_before_writing() {
    let writes = Arc::new(AtomicUsize::new(0));
    let builder = PipelineBuilder::new().explicit([StageId::new("rar"), StageId::GZIP]);
    let resource = Resource::writer(CountingWriter {
        writes: Arc::clone(&writes),
    });

    let mut body_ran = false;
    let err = builder
        .write(resource, |_| {
            body_ran = true;
            Ok(())
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(!body_ran);
    assert_eq!(writes.load(Ordering::SeqCst), 0);
}

#[test]
fn malformed_option_fails_at_build() {
    let builder = PipelineBuilder::new()
        .explicit([StageId::ZSTD])
        .option(StageId::ZSTD, "level", "99");
    let err = builder.writer(Resource::writer(io::sink())).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn encode_stage_replaces_invalid_bytes() -> Result<(), Box<dyn Error>> {
    let raw: &[u8] = b"New M\xE9xico,NE\ngood line\nNew M\xE9xico,SF";
    let strict = PipelineBuilder::new().explicit([StageId::ENCODE]);

    let err = read_all(&strict, Resource::reader(io::Cursor::new(raw.to_vec()))).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transform);

    let lenient = strict.clone().option(StageId::ENCODE, "replace", "?");
    let cleaned = read_all(&lenient, Resource::reader(io::Cursor::new(raw.to_vec())))?;
    assert_eq!(cleaned, b"New M?xico,NE\ngood line\nNew M?xico,SF");

    let cleaner = lenient.option(StageId::ENCODE, "cleaner", "non_printable");
    let cleaned = read_all(&cleaner, Resource::reader(io::Cursor::new(raw.to_vec())))?;
    assert_eq!(cleaned, b"New M?xico,NE\ngood line\nNew M?xico,SF");
    Ok(())
}

#[test]
fn gzip_then_encode_on_write() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("names.csv.gz");
    let builder = PipelineBuilder::new()
        .explicit([StageId::GZIP, StageId::ENCODE])
        .option(StageId::ENCODE, "encoding", "ascii")
        .option(StageId::ENCODE, "replace", "_");

    write_all(&builder, path.as_path(), "Zoë,Ñandú\n".as_bytes())?;
    // every byte outside ASCII is replaced on its own
    let plain = PipelineBuilder::new();
    assert_eq!(read_all(&plain, Resource::from(path.as_path()))?, b"Zo__,__and__\n");
    Ok(())
}

#[test]
fn transform_error_still_cleans_up() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let scratch = tempdir()?;
    let path = dir.path().join("broken.gz");
    fs::write(&path, b"\x1f\x8b\x08\x00 definitely not deflate data")?;

    let err = read_all(&builder_in(scratch.path()), Resource::from(path.as_path())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transform);
    assert_eq!(entries(scratch.path()), 0);
    Ok(())
}

#[cfg(feature = "zip")]
mod archives {
    use super::*;
    use tempfile::TempDir;
    use zip::write::FileOptions;
    use zip::{CompressionMethod, ZipWriter};

    const REPORT: &[u8] = b"region,total\nnorth,12\nsouth,7\n";

    /// A directory, the report, then a second file
    fn report_archive(dir: &TempDir) -> Result<std::path::PathBuf, Box<dyn Error>> {
        let path = dir.path().join("report.csv.zip");
        let mut zip = ZipWriter::new(File::create(&path)?);
        zip.add_directory("reports/", FileOptions::default())?;
        zip.start_file(
            "report.csv",
            FileOptions::default().compression_method(CompressionMethod::Deflated),
        )?;
        zip.write_all(REPORT)?;
        zip.start_file(
            "notes.txt",
            FileOptions::default().compression_method(CompressionMethod::Stored),
        )?;
        zip.write_all(b"second entry")?;
        zip.finish()?;
        Ok(path)
    }

    #[test]
    fn report_csv_zip_exposes_first_entry() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = report_archive(&dir)?;
        let builder = builder_in(dir.path());

        let resource = Resource::from(path.as_path());
        assert_eq!(builder.resolve(&resource)?, vec![StageId::ZIP]);
        assert_eq!(read_all(&builder, resource)?, REPORT);

        let named = builder.clone().option(StageId::ZIP, "entry", "notes.txt");
        assert_eq!(read_all(&named, Resource::from(path.as_path()))?, b"second entry");
        Ok(())
    }

    #[test]
    fn stream_input_matches_file_input() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let scratch = tempdir()?;
        let path = report_archive(&dir)?;
        let builder = builder_in(scratch.path()).explicit([StageId::ZIP]);

        let from_file = read_all(&builder, Resource::from(path.as_path()))?;
        let socket = Trickle {
            inner: File::open(&path)?,
            chunk: 7,
        };
        let from_stream = read_all(&builder, Resource::reader(socket))?;
        assert_eq!(from_file, from_stream);
        assert_eq!(entries(scratch.path()), 0);
        Ok(())
    }

    #[test]
    fn materialized_file_lives_for_the_scope_only() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let scratch = tempdir()?;
        let path = report_archive(&dir)?;
        let builder = builder_in(scratch.path()).explicit([StageId::ZIP]);

        let seen = builder.read(Resource::reader(File::open(&path)?), |input| {
            let temps: Vec<_> = input.temp_paths().iter().map(|p| p.to_path_buf()).collect();
            assert_eq!(temps.len(), 1);
            assert!(temps[0].exists());
            Ok(temps)
        })?;
        assert!(!seen[0].exists());
        assert_eq!(entries(scratch.path()), 0);

        // body failure: the body's error comes back and the file is still gone
        let err = builder
            .read(Resource::reader(File::open(&path)?), |_| -> streamstack::Result<()> {
                Err(StreamError::Config("caller gave up".into()))
            })
            .unwrap_err();
        assert!(err.to_string().contains("caller gave up"));
        assert_eq!(entries(scratch.path()), 0);
        Ok(())
    }

    #[test]
    fn garbage_archive_from_stream_cleans_up() -> Result<(), Box<dyn Error>> {
        let scratch = tempdir()?;
        let builder = builder_in(scratch.path()).explicit([StageId::ZIP]);
        let garbage = io::Cursor::new(b"PK but not really an archive".to_vec());

        let err = read_all(&builder, Resource::reader(garbage)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transform);
        assert_eq!(entries(scratch.path()), 0);
        Ok(())
    }

    #[test]
    fn double_close_deletes_once() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let scratch = tempdir()?;
        let path = report_archive(&dir)?;
        let builder = builder_in(scratch.path()).explicit([StageId::ZIP]);

        let mut chain = builder.reader(Resource::reader(File::open(&path)?))?;
        let temp = chain.temp_paths()[0].to_path_buf();
        let mut data = Vec::new();
        chain.read_to_end(&mut data)?;
        chain.close()?;
        assert!(!temp.exists());

        // a file reappearing at the old path is not ours to delete
        fs::write(&temp, b"unrelated")?;
        chain.close()?;
        drop(chain);
        assert!(temp.exists());
        assert_eq!(data, REPORT);
        Ok(())
    }

    #[test]
    fn dropped_chain_releases_temp_file() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let scratch = tempdir()?;
        let path = report_archive(&dir)?;
        let builder = builder_in(scratch.path()).explicit([StageId::ZIP]);

        let chain = builder.reader(Resource::reader(File::open(&path)?))?;
        assert_eq!(entries(scratch.path()), 1);
        drop(chain);
        assert_eq!(entries(scratch.path()), 0);
        Ok(())
    }

    #[test]
    fn archive_written_to_stream_is_spilled() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let scratch = tempdir()?;
        let target = dir.path().join("export.zip");
        let builder = builder_in(scratch.path())
            .explicit([StageId::ZIP])
            .option(StageId::ZIP, "entry", "export.csv");

        builder.write(Resource::writer(File::create(&target)?), |output| {
            assert_eq!(output.temp_paths().len(), 1);
            output.write_all(REPORT)?;
            Ok(())
        })?;
        assert_eq!(entries(scratch.path()), 0);

        let mut archive = zip::ZipArchive::new(File::open(&target)?)?;
        assert_eq!(archive.len(), 1);
        let mut entry = archive.by_index(0)?;
        assert_eq!(entry.name(), "export.csv");
        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        assert_eq!(data, REPORT);
        Ok(())
    }

    #[test]
    fn gzipped_archive_round_trip() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("dump.csv.zip.gz");
        let builder = builder_in(dir.path());

        write_all(&builder, path.as_path(), REPORT)?;
        assert_eq!(read_all(&builder, Resource::from(path.as_path()))?, REPORT);

        // the archive inside is named after the resource
        let unzipped = builder.clone().explicit([StageId::GZIP]);
        let archive_bytes = read_all(&unzipped, Resource::from(path.as_path()))?;
        let mut archive = zip::ZipArchive::new(io::Cursor::new(archive_bytes))?;
        assert_eq!(archive.by_index(0)?.name(), "dump.csv");
        Ok(())
    }

    #[test]
    fn copy_between_layouts() -> Result<(), Box<dyn Error>> {
        let dir = tempdir()?;
        let source = report_archive(&dir)?;
        let target = dir.path().join("report.csv.br");

        let copied = streamstack::copy(source.as_path(), target.as_path())?;
        assert_eq!(copied, REPORT.len() as u64);
        assert_eq!(read_all(&PipelineBuilder::new(), Resource::from(target.as_path()))?, REPORT);
        Ok(())
    }
}

/// Pass-through stage whose close result is picked by its `close` option
struct ScriptedClose;

struct ScriptedReader {
    inner: Box<dyn ReadStage>,
    outcome: Option<&'static str>,
}

impl Read for ScriptedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl ReadStage for ScriptedReader {
    fn close(&mut self) -> streamstack::Result<()> {
        self.inner.close()?;
        match self.outcome.take() {
            Some("already") => Err(StreamError::AlreadyClosed(StageId::new("scripted"))),
            Some("io") => Err(io::Error::new(io::ErrorKind::BrokenPipe, "socket reset").into()),
            Some("transform") => Err(StreamError::transform(StageId::new("scripted"), "trailer")),
            _ => Ok(()),
        }
    }
}

impl StageFactory for ScriptedClose {
    fn id(&self) -> StageId {
        StageId::new("scripted")
    }

    fn validate(&self, _direction: Direction, options: &StageOptions) -> streamstack::Result<()> {
        options.reject_unknown(&self.id(), &["close"])
    }

    fn reader(
        &self,
        upstream: Upstream,
        options: &StageOptions,
    ) -> streamstack::Result<Box<dyn ReadStage>> {
        let outcome = match options.get("close") {
            Some("already") => Some("already"),
            Some("io") => Some("io"),
            Some("transform") => Some("transform"),
            _ => None,
        };
        Ok(Box::new(ScriptedReader {
            inner: upstream.into_stream()?,
            outcome,
        }))
    }

    fn writer(
        &self,
        downstream: Downstream,
        _options: &StageOptions,
    ) -> streamstack::Result<Box<dyn WriteStage>> {
        downstream.into_stream()
    }
}

/// Plugin that insists on a file, recording what it was handed
struct NeedsFile {
    saw_file: Arc<AtomicUsize>,
}

impl StageFactory for NeedsFile {
    fn id(&self) -> StageId {
        StageId::new("seeker")
    }

    fn access(&self, _direction: Direction) -> Access {
        Access::RandomAccess
    }

    fn reader(
        &self,
        upstream: Upstream,
        _options: &StageOptions,
    ) -> streamstack::Result<Box<dyn ReadStage>> {
        if let Upstream::File(_) = &upstream {
            self.saw_file.fetch_add(1, Ordering::SeqCst);
        }
        upstream.into_stream()
    }

    fn writer(
        &self,
        downstream: Downstream,
        options: &StageOptions,
    ) -> streamstack::Result<Box<dyn WriteStage>> {
        let inner = downstream.into_stream()?;
        if options.get("close") == Some("already") {
            return Ok(Box::new(FinishedEarly { inner }));
        }
        Ok(inner)
    }
}

/// Writer that finishes its file, then reports it was already closed
struct FinishedEarly {
    inner: Box<dyn WriteStage>,
}

impl Write for FinishedEarly {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl WriteStage for FinishedEarly {
    fn close(&mut self) -> streamstack::Result<()> {
        self.inner.close()?;
        Err(StreamError::AlreadyClosed(StageId::new("seeker")))
    }
}

fn scripted(close: &str) -> streamstack::Result<Vec<u8>> {
    let registry = Registry::builtin().with(ScriptedClose);
    let builder = PipelineBuilder::with_registry(&registry)
        .explicit([StageId::new("scripted")])
        .option(StageId::new("scripted"), "close", close);
    read_all(&builder, Resource::reader(io::Cursor::new(b"payload".to_vec())))
}

#[test]
fn already_closed_is_suppressed() {
    assert_eq!(scripted("already").unwrap(), b"payload");
}

#[test]
fn io_close_error_after_success_is_cleanup() {
    let err = scripted("io").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Cleanup);
}

#[test]
fn transform_close_error_after_success_propagates() {
    let err = scripted("transform").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transform);
}

#[test]
fn body_error_wins_over_close_error() {
    let registry = Registry::builtin().with(ScriptedClose);
    let builder = PipelineBuilder::with_registry(&registry)
        .explicit([StageId::new("scripted")])
        .option(StageId::new("scripted"), "close", "io");

    let err = builder
        .read(Resource::reader(io::Cursor::new(Vec::new())), |_| -> streamstack::Result<()> {
            Err(StreamError::transform(StageId::new("caller"), "bad row"))
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transform);
    assert!(err.to_string().contains("bad row"));
}

#[test]
fn plugin_needing_files_gets_one() -> Result<(), Box<dyn Error>> {
    let scratch = tempdir()?;
    let saw_file = Arc::new(AtomicUsize::new(0));
    let registry = Registry::builtin().with(NeedsFile {
        saw_file: Arc::clone(&saw_file),
    });
    let builder = PipelineBuilder::with_registry(&registry)
        .config(Config {
            temp_dir: Some(scratch.path().to_path_buf()),
            ..Config::default()
        })
        .explicit([StageId::GZIP, StageId::new("seeker")]);

    let dir = tempdir()?;
    let packed = dir.path().join("in.gz");
    write_all(&PipelineBuilder::new(), packed.as_path(), b"seekable please")?;

    let data = read_all(&builder, Resource::reader(File::open(&packed)?))?;
    assert_eq!(data, b"seekable please");
    assert_eq!(saw_file.load(Ordering::SeqCst), 1);
    assert_eq!(entries(scratch.path()), 0);
    Ok(())
}

#[test]
fn already_closed_below_a_file_stage_is_suppressed() -> Result<(), Box<dyn Error>> {
    let scratch = tempdir()?;
    let registry = Registry::builtin().with(ScriptedClose).with(NeedsFile {
        saw_file: Arc::new(AtomicUsize::new(0)),
    });
    let builder = PipelineBuilder::with_registry(&registry)
        .config(Config {
            temp_dir: Some(scratch.path().to_path_buf()),
            ..Config::default()
        })
        .explicit([StageId::new("scripted"), StageId::new("seeker")])
        .option(StageId::new("scripted"), "close", "already");

    let data = read_all(&builder, Resource::reader(io::Cursor::new(b"data".to_vec())))?;
    assert_eq!(data, b"data");
    assert_eq!(entries(scratch.path()), 0);
    Ok(())
}

#[test]
fn spilled_output_survives_already_closed_writer() -> Result<(), Box<dyn Error>> {
    let scratch = tempdir()?;
    let registry = Registry::builtin().with(NeedsFile {
        saw_file: Arc::new(AtomicUsize::new(0)),
    });
    let builder = PipelineBuilder::with_registry(&registry)
        .config(Config {
            temp_dir: Some(scratch.path().to_path_buf()),
            ..Config::default()
        })
        .explicit([StageId::new("seeker")])
        .option(StageId::new("seeker"), "close", "already");

    let sink = SharedSink::default();
    write_all(&builder, Resource::writer(sink.clone()), b"payload")?;
    assert_eq!(sink.contents(), b"payload");
    assert_eq!(entries(scratch.path()), 0);
    Ok(())
}

#[test]
fn suffix_depth_is_configurable() -> Result<(), Box<dyn Error>> {
    let dir = tempdir()?;
    let path = dir.path().join("twice.gz.gz");
    let shallow = PipelineBuilder::new().config(Config {
        suffix_depth: Some(1),
        ..Config::default()
    });

    write_all(&PipelineBuilder::new(), path.as_path(), b"nested")?;
    let once = read_all(&shallow, Resource::from(path.as_path()))?;
    let twice = read_all(
        &shallow.clone().explicit([StageId::GZIP]),
        Resource::reader(io::Cursor::new(once)),
    )?;
    assert_eq!(twice, b"nested");
    Ok(())
}

#[test]
fn registry_is_shared_across_threads() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let dir = tempdir().unwrap();
                let path = dir.path().join(format!("t{}.txt.zst", i));
                let builder = builder_in(dir.path());
                let payload = format!("thread {}", i).into_bytes();
                write_all(&builder, path.as_path(), &payload).unwrap();
                read_all(&builder, Resource::from(path.as_path())).unwrap() == payload
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
}
