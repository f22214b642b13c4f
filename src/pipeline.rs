//! Pipeline Builder.
//!
//! Resolves the stage list for a resource, validates every stage before
//! anything is opened, and nests the stage instances around the base stream.
//!
//! ```text
//! read:   resource → base → stage[0] → stage[1] → … → caller
//! write:  caller → … → stage[1] → stage[0] → base → resource
//! ```
//!
//! Stage lists are always ordered innermost (closest to the raw bytes)
//! first, for both directions, so the same list reads back what it wrote.

use crate::config::Config;
use crate::error::{Result, StreamError};
use crate::lifecycle::{settle, Chain, ReadChain, WriteChain};
use crate::materialize::{materialize_stage, SpillWriter};
use crate::registry::Registry;
use crate::stage::{
    Access, BaseReader, BaseWriter, Direction, Downstream, StageFactory, StageId, StageOptions,
    Upstream, WriteStage,
};
use crate::temp::TempFile;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What a pipeline reads from or writes to
pub enum Resource {
    /// A named file, opened (or created) by the pipeline
    Path(PathBuf),
    /// An already open, forward-only input
    Reader(Box<dyn Read + Send>),
    /// An already open, forward-only output
    Writer(Box<dyn Write + Send>),
}

impl Resource {
    pub fn path(path: impl Into<PathBuf>) -> Self {
        Resource::Path(path.into())
    }

    pub fn reader(reader: impl Read + Send + 'static) -> Self {
        Resource::Reader(Box::new(reader))
    }

    pub fn writer(writer: impl Write + Send + 'static) -> Self {
        Resource::Writer(Box::new(writer))
    }

    pub fn is_stream(&self) -> bool {
        !matches!(self, Resource::Path(_))
    }

    /// Final path component, for suffix inference and entry naming
    pub fn file_name(&self) -> Option<String> {
        match self {
            Resource::Path(path) => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            _ => None,
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Path(path) => f.debug_tuple("Path").field(path).finish(),
            Resource::Reader(_) => f.write_str("Reader(..)"),
            Resource::Writer(_) => f.write_str("Writer(..)"),
        }
    }
}

impl From<PathBuf> for Resource {
    fn from(path: PathBuf) -> Self {
        Resource::Path(path)
    }
}

impl From<&Path> for Resource {
    fn from(path: &Path) -> Self {
        Resource::Path(path.to_path_buf())
    }
}

impl From<&str> for Resource {
    fn from(path: &str) -> Self {
        Resource::Path(PathBuf::from(path))
    }
}

impl From<String> for Resource {
    fn from(path: String) -> Self {
        Resource::Path(PathBuf::from(path))
    }
}

/// How the stage list is chosen
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Stages {
    /// From the resource name's suffixes; none for unnamed streams
    #[default]
    Infer,
    /// Exactly these, innermost first; suffixes are ignored
    Explicit(Vec<StageId>),
}

/// One validated stage, ready to instantiate
struct Planned {
    id: StageId,
    factory: Arc<dyn StageFactory>,
    access: Access,
    options: StageOptions,
}

/// Assembles chains for resources
#[derive(Debug, Clone)]
pub struct PipelineBuilder<'r> {
    registry: &'r Registry,
    config: Config,
    stages: Stages,
    options: BTreeMap<StageId, StageOptions>,
}

impl Default for PipelineBuilder<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder<'static> {
    /// Builder over the global registry with default settings
    pub fn new() -> Self {
        Self::with_registry(Registry::global())
    }

    /// Builder over the global registry, configured from the environment
    pub fn from_env() -> Result<Self> {
        Ok(Self::new().config(Config::from_env()?))
    }
}

impl<'r> PipelineBuilder<'r> {
    pub fn with_registry(registry: &'r Registry) -> Self {
        Self {
            registry,
            config: Config::default(),
            stages: Stages::Infer,
            options: BTreeMap::new(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn stages(mut self, stages: Stages) -> Self {
        self.stages = stages;
        self
    }

    /// Use exactly `ids`, innermost first
    pub fn explicit(self, ids: impl IntoIterator<Item = StageId>) -> Self {
        self.stages(Stages::Explicit(ids.into_iter().collect()))
    }

    /// Set one option for one stage, overriding configured defaults
    pub fn option(mut self, stage: StageId, key: &str, value: &str) -> Self {
        self.options.entry(stage).or_default().set(key, value);
        self
    }

    pub fn options(mut self, stage: StageId, options: StageOptions) -> Self {
        self.options.entry(stage).or_default().merge(&options);
        self
    }

    pub fn registry(&self) -> &'r Registry {
        self.registry
    }

    /// Stage ids that apply to `resource`, innermost first
    pub fn resolve(&self, resource: &Resource) -> Result<Vec<StageId>> {
        match &self.stages {
            Stages::Explicit(ids) => Ok(ids.clone()),
            Stages::Infer => Ok(resource
                .file_name()
                .map(|name| self.registry.infer(&name, self.config.suffix_depth))
                .unwrap_or_default()),
        }
    }

    /// Validate the whole chain, then open it
    pub fn build(&self, resource: Resource, direction: Direction) -> Result<Chain> {
        match (direction, &resource) {
            (Direction::Read, Resource::Writer(_)) => {
                return Err(StreamError::Config(
                    "cannot read from an output stream".into(),
                ))
            }
            (Direction::Write, Resource::Reader(_)) => {
                return Err(StreamError::Config("cannot write to an input stream".into()))
            }
            _ => {}
        }

        let ids = self.resolve(&resource)?;
        let plan = self.plan(&ids, direction, &resource)?;
        tracing::debug!(
            resource = ?resource,
            %direction,
            stages = ?ids,
            "assembling chain"
        );

        match direction {
            Direction::Read => self.assemble_reader(resource, ids, plan).map(Chain::Read),
            Direction::Write => self.assemble_writer(resource, ids, plan).map(Chain::Write),
        }
    }

    pub fn reader(&self, resource: impl Into<Resource>) -> Result<ReadChain> {
        match self.build(resource.into(), Direction::Read)? {
            Chain::Read(chain) => Ok(chain),
            Chain::Write(_) => Err(StreamError::Config("expected a read chain".into())),
        }
    }

    pub fn writer(&self, resource: impl Into<Resource>) -> Result<WriteChain> {
        match self.build(resource.into(), Direction::Write)? {
            Chain::Write(chain) => Ok(chain),
            Chain::Read(_) => Err(StreamError::Config("expected a write chain".into())),
        }
    }

    /// Run `body` against the outermost read stream, then close the chain.
    ///
    /// The chain is closed and its temp files deleted on every exit path.
    /// When `body` fails its error is returned even if closing fails too.
    pub fn read<T, F>(&self, resource: impl Into<Resource>, body: F) -> Result<T>
    where
        F: FnOnce(&mut ReadChain) -> Result<T>,
    {
        let mut chain = self.reader(resource)?;
        let outcome = body(&mut chain);
        let closed = chain.close();
        settle(outcome, closed)
    }

    /// Run `body` against the outermost write stream, then finalize the chain
    pub fn write<T, F>(&self, resource: impl Into<Resource>, body: F) -> Result<T>
    where
        F: FnOnce(&mut WriteChain) -> Result<T>,
    {
        let mut chain = self.writer(resource)?;
        let outcome = body(&mut chain);
        let closed = chain.close();
        settle(outcome, closed)
    }

    /// Every stage is looked up, probed and given its options before any
    /// resource is touched.
    fn plan(
        &self,
        ids: &[StageId],
        direction: Direction,
        resource: &Resource,
    ) -> Result<Vec<Planned>> {
        let file_name = resource.file_name();
        let temp_dir = self.config.temp_files().dir().to_path_buf();

        ids.iter()
            .map(|id| {
                let factory = Arc::clone(self.registry.factory(id)?);
                factory.check_available()?;

                let mut options = self.config.defaults_for(id);
                if let Some(extra) = self.options.get(id) {
                    options.merge(extra);
                }
                options.set_file_name(file_name.clone());
                options.set_temp_dir(Some(temp_dir.clone()));
                factory.validate(direction, &options)?;

                Ok(Planned {
                    id: id.clone(),
                    access: factory.access(direction),
                    factory,
                    options,
                })
            })
            .collect()
    }

    fn assemble_reader(
        &self,
        resource: Resource,
        ids: Vec<StageId>,
        plan: Vec<Planned>,
    ) -> Result<ReadChain> {
        let temps = self.config.temp_files();
        let mut scratch: Vec<TempFile> = Vec::new();
        let mut upstream = match resource {
            Resource::Path(path) => Upstream::File(path),
            Resource::Reader(reader) => Upstream::Stream(Box::new(BaseReader::new(reader))),
            Resource::Writer(_) => {
                return Err(StreamError::Config(
                    "cannot read from an output stream".into(),
                ))
            }
        };

        for step in plan {
            upstream = match upstream {
                Upstream::Stream(stream) if step.access == Access::RandomAccess => {
                    let temp = materialize_stage(stream, &temps, step.id.as_str())?;
                    let path = temp.path().to_path_buf();
                    scratch.push(temp);
                    Upstream::File(path)
                }
                other => other,
            };
            upstream = Upstream::Stream(step.factory.reader(upstream, &step.options)?);
        }

        Ok(ReadChain::new(upstream.into_stream()?, scratch, ids))
    }

    fn assemble_writer(
        &self,
        resource: Resource,
        ids: Vec<StageId>,
        plan: Vec<Planned>,
    ) -> Result<WriteChain> {
        let temps = self.config.temp_files();
        let mut scratch: Vec<TempFile> = Vec::new();
        let mut downstream = match resource {
            Resource::Path(path) => Downstream::File(path),
            Resource::Writer(writer) => Downstream::Stream(Box::new(BaseWriter::new(writer))),
            Resource::Reader(_) => {
                return Err(StreamError::Config("cannot write to an input stream".into()))
            }
        };

        for step in plan {
            let stage: Box<dyn WriteStage> = match downstream {
                Downstream::Stream(inner) if step.access == Access::RandomAccess => {
                    let temp = temps.reserve(step.id.as_str())?;
                    let spill = temp.path().to_path_buf();
                    scratch.push(temp);
                    let stage = step
                        .factory
                        .writer(Downstream::File(spill.clone()), &step.options)?;
                    tracing::debug!(stage = %step.id, path = %spill.display(), "spilling to temp file");
                    Box::new(SpillWriter::new(stage, spill, inner))
                }
                other => step.factory.writer(other, &step.options)?,
            };
            downstream = Downstream::Stream(stage);
        }

        Ok(WriteChain::new(downstream.into_stream()?, scratch, ids))
    }
}
