//! vspec command line interface
//!
//! Compiles a vehicle signal specification and prints the result.
//!
//! # Usage
//!
//! ```bash
//! # Flat YAML of the expanded tree
//! vspec export spec/VehicleSignalSpecification.vspec -u spec/units.yaml
//!
//! # Same, as JSON, with an overlay and uuids
//! vspec export spec/root.vspec -l overlays/seats.vspec --uuid --format json
//!
//! # Run a configured build, failing on any policy violation
//! vspec check --config vspec.yaml --strict
//!
//! # Indented outline
//! vspec tree spec/root.vspec
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::Level;
use tracing_subscriber::EnvFilter;
use vss_compiler::vspec_core::Tree;
use vss_compiler::{get_trees, to_json, to_yaml, AbortCategory, ConfigLoader, PipelineConfig};

#[derive(Parser)]
#[command(name = "vspec")]
#[command(version = "0.1.0")]
#[command(about = "Compile vehicle signal specification files")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level: warn, info or debug
    #[arg(long, global = true, default_value = "warn", value_enum)]
    log_level: LogLevel,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogLevel {
    Warn,
    Info,
    Debug,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Yaml,
    Json,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Policy {
    NameStyle,
    UnknownAttribute,
}

impl From<Policy> for AbortCategory {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::NameStyle => AbortCategory::NameStyle,
            Policy::UnknownAttribute => AbortCategory::UnknownAttribute,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and print the flat fqn -> payload mapping
    Export {
        #[command(flatten)]
        run: RunArgs,

        /// Output format
        #[arg(long, short = 'f', default_value = "yaml", value_enum)]
        format: OutputFormat,

        /// Write to a file instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,

        /// Also export the user type tree
        #[arg(long)]
        types_output: Option<PathBuf>,
    },

    /// Compile and report problems only
    Check {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Compile and print an indented outline of the tree
    Tree {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Root vspec file. Without it the run is read from the config file.
    vspec: Option<PathBuf>,

    /// Run configuration file
    #[arg(long, short = 'c', env = "VSPEC_CONFIG")]
    config: Option<PathBuf>,

    /// Additional include directory
    #[arg(long = "include-dir", short = 'I')]
    include_dirs: Vec<PathBuf>,

    /// Overlay file, applied in order
    #[arg(long = "overlay", short = 'l')]
    overlays: Vec<PathBuf>,

    /// Unit file
    #[arg(long = "unit-file", short = 'u')]
    units: Vec<PathBuf>,

    /// Quantity file
    #[arg(long = "quantity-file", short = 'q')]
    quantities: Vec<PathBuf>,

    /// User type file
    #[arg(long = "types", short = 't')]
    types: Vec<PathBuf>,

    /// Extended attribute to accept and export
    #[arg(long = "extended-attribute", short = 'e')]
    extended_attributes: Vec<String>,

    /// Keep instance declarations unexpanded
    #[arg(long)]
    no_expand: bool,

    /// Assign uuids to every node
    #[arg(long)]
    uuid: bool,

    /// Treat every policy violation as an error
    #[arg(long)]
    strict: bool,

    /// Policy category to treat as an error
    #[arg(long, value_enum)]
    abort_on: Vec<Policy>,

    /// Policy category to skip entirely
    #[arg(long, value_enum)]
    ignore: Vec<Policy>,
}

impl RunArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match self.vspec {
            Some(vspec) => PipelineConfig::new(vspec),
            None => ConfigLoader::resolve(self.config).load()?,
        };
        config.include_dirs.extend(self.include_dirs);
        config.overlays.extend(self.overlays);
        config.units.extend(self.units);
        config.quantities.extend(self.quantities);
        config.types.extend(self.types);
        config.extended_attributes.extend(self.extended_attributes);
        config.aborts.extend(self.abort_on.into_iter().map(AbortCategory::from));
        config.ignore.extend(self.ignore.into_iter().map(AbortCategory::from));
        config.expand &= !self.no_expand;
        config.uuid |= self.uuid;
        config.strict |= self.strict;
        Ok(config)
    }
}

fn write_output(text: &str, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            print!("{text}");
            Ok(())
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Export {
            run,
            format,
            output,
            types_output,
        } => {
            let config = run.into_config()?;
            let trees = get_trees(&config)?;
            let render = |tree: &Tree| match format {
                OutputFormat::Yaml => to_yaml(tree, &config),
                OutputFormat::Json => to_json(tree, &config),
            };
            write_output(&render(&trees.root)?, output.as_ref())?;
            if let (Some(path), Some(types_root)) = (types_output, &trees.types_root) {
                write_output(&render(types_root)?, Some(&path))?;
            }
        }
        Commands::Check { run } => {
            let config = run.into_config()?;
            let trees = get_trees(&config)?;
            println!(
                "OK: {} node(s), {} user type(s)",
                trees.root.node_count(),
                trees.registry.datatypes.dynamic_types().len()
            );
        }
        Commands::Tree { run } => {
            let config = run.into_config()?;
            let trees = get_trees(&config)?;
            print!("{}", trees.root.render());
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(Level::from(cli.log_level).into()),
        )
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
