use crate::config::Config;
use crate::error::{Result, StreamError};
use crate::lifecycle::copy_with;
use crate::pipeline::{PipelineBuilder, Resource, Stages};
use crate::stage::{parse_stage_list, StageId};
use std::path::PathBuf;

/// Stands for stdin or stdout on the command line
pub const STDIO: &str = "-";

/// Options for the copy and cat commands
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Stages to read the input through (inferred from its name if unset)
    pub from: Option<Vec<StageId>>,
    /// Stages to write the output through (inferred from its name if unset)
    pub to: Option<Vec<StageId>>,
    /// `stage.key=value` overrides
    pub options: Vec<StageSetting>,
    /// JSON config file; environment settings apply on top
    pub config: Option<PathBuf>,
}

/// One `stage.key=value` option from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSetting {
    pub stage: StageId,
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for StageSetting {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || StreamError::Config(format!("expected stage.key=value, got `{}`", s));
        let (name, value) = s.split_once('=').ok_or_else(malformed)?;
        let (stage, key) = name.split_once('.').ok_or_else(malformed)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(malformed());
        }
        Ok(Self {
            stage: stage.parse()?,
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

/// Parse a `--from`/`--to` value; an empty list means "no stages"
pub fn parse_stages(s: &str) -> Result<Vec<StageId>> {
    parse_stage_list(s)
}

pub fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path)?.apply_env(),
        None => Config::from_env(),
    }
}

fn builder(
    stages: &Option<Vec<StageId>>,
    options: &CopyOptions,
    config: &Config,
) -> PipelineBuilder<'static> {
    let stages = match stages {
        Some(ids) => Stages::Explicit(ids.clone()),
        None => Stages::Infer,
    };
    options.options.iter().fold(
        PipelineBuilder::new().config(config.clone()).stages(stages),
        |builder, setting| builder.option(setting.stage.clone(), &setting.key, &setting.value),
    )
}

fn input_resource(input: &str) -> Resource {
    if input == STDIO {
        Resource::reader(std::io::stdin())
    } else {
        Resource::path(input)
    }
}

fn output_resource(output: &str) -> Resource {
    if output == STDIO {
        Resource::writer(std::io::stdout())
    } else {
        Resource::path(output)
    }
}

/// Copy `input` to `output`, decoding and re-encoding as needed.
/// Returns the number of logical bytes copied.
pub fn copy_resource(input: &str, output: &str, options: &CopyOptions) -> Result<u64> {
    let config = load_config(options.config.as_ref())?;
    let reader = builder(&options.from, options, &config);
    let writer = builder(&options.to, options, &config);
    copy_with(&reader, input_resource(input), &writer, output_resource(output))
}

/// Decode `input` to stdout
pub fn cat_resource(input: &str, options: &CopyOptions) -> Result<u64> {
    let options = CopyOptions {
        to: Some(Vec::new()),
        ..options.clone()
    };
    copy_resource(input, STDIO, &options)
}
