use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use streamstack::cli::{
    cat_resource, copy_resource, describe_stages, load_config, parse_stages, show_capabilities,
    CopyOptions, StageSetting, STDIO,
};
use streamstack::{Registry, StageId};
use tracing_subscriber::EnvFilter;

/// Version info from build.rs
const VERSION: &str = env!("STREAMSTACK_VERSION");
const PROFILE: &str = env!("STREAMSTACK_PROFILE");
const GIT_HASH: &str = env!("STREAMSTACK_GIT_HASH");
const ZIP_DEFAULT: &str = env!("STREAMSTACK_ZIP_DEFAULT");

fn get_version() -> &'static str {
    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<String> = OnceLock::new();
    VERSION_STRING.get_or_init(|| {
        format!("{} {} ({}, zip: {})", PROFILE, VERSION, GIT_HASH, ZIP_DEFAULT)
    })
}

#[derive(Parser)]
#[command(name = "streamstack")]
#[command(author, about = "Read and write data through layered compression, archive and encoding stages", long_about = None)]
struct Cli {
    /// Print version
    #[arg(short = 'V', long)]
    version: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy a resource, decoding the input and encoding the output
    #[command(alias = "cp")]
    Copy {
        /// Input file, or - for stdin
        input: String,

        /// Output file, or - for stdout
        output: String,

        /// Input stages, innermost first (e.g. gzip,encode); inferred from the name if omitted
        #[arg(long)]
        from: Option<String>,

        /// Output stages, innermost first; inferred from the name if omitted
        #[arg(long)]
        to: Option<String>,

        /// Stage option as stage.key=value (repeatable)
        #[arg(long = "option", short = 'o', value_parser = parse_setting)]
        options: Vec<StageSetting>,

        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Decode a resource to stdout
    Cat {
        /// Input file, or - for stdin
        input: String,

        /// Input stages, innermost first; inferred from the name if omitted
        #[arg(long)]
        from: Option<String>,

        /// Stage option as stage.key=value (repeatable)
        #[arg(long = "option", short = 'o', value_parser = parse_setting)]
        options: Vec<StageSetting>,

        /// JSON config file
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show the stages inferred from a resource name
    Stages {
        /// File name to inspect
        name: String,

        /// JSON config file (for suffix_depth)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// List registered stages and available backends
    Capabilities,
}

/// `--from`/`--to`: absent means infer, an empty string means no stages
fn stage_list(arg: Option<String>) -> streamstack::Result<Option<Vec<StageId>>> {
    arg.as_deref().map(parse_stages).transpose()
}

fn parse_setting(s: &str) -> Result<StageSetting, String> {
    s.parse().map_err(|e| format!("{}", e))
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.version {
        println!("streamstack {}", get_version());
        return ExitCode::SUCCESS;
    }

    let command = match cli.command {
        Some(cmd) => cmd,
        None => {
            use clap::CommandFactory;
            let _ = Cli::command().print_help();
            println!();
            return ExitCode::SUCCESS;
        }
    };

    let result = match command {
        Commands::Copy {
            input,
            output,
            from,
            to,
            options,
            config,
        } => stage_list(from).and_then(|from| {
            let options = CopyOptions {
                from,
                to: stage_list(to)?,
                options,
                config,
            };
            let copied = copy_resource(&input, &output, &options)?;
            if output != STDIO {
                eprintln!("Copied {} bytes to {}", copied, output);
            }
            Ok(())
        }),

        Commands::Cat {
            input,
            from,
            options,
            config,
        } => stage_list(from).and_then(|from| {
            let options = CopyOptions {
                from,
                to: None,
                options,
                config,
            };
            cat_resource(&input, &options).map(|_| ())
        }),

        Commands::Stages { name, config } => load_config(config.as_ref()).map(|config| {
            print!(
                "{}",
                describe_stages(Registry::global(), &name, config.suffix_depth)
            );
        }),

        Commands::Capabilities => {
            print!("{}", show_capabilities(Registry::global()));
            Ok(())
        }
    };

    let _ = std::io::stdout().flush();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
