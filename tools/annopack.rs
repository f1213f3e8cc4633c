//! annopack command line
//!
//! Usage:
//!   annopack build <SOURCE_ROOT> [--output <FILE>] [--workers <N>] [--print] [--qualify-exports]
//!   annopack plan <MODULE_DIR> <KEY>
//!   annopack check <MODULE_DIR>

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use annopack::config::{LoggingConfig, PackConfig};
use annopack::registry::RegistryBuilder;
use annopack::resolver::{Context, LoadScope, ResolveError, Source, SourceBody};
use annopack::utils::init_logging_from_config;

#[derive(Parser, Debug)]
#[command(name = "annopack", version, about = "Annotation registry builder and load planner")]
struct Cli {
    /// Configuration file (.toml or .json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "annopack::registry=trace"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan a source tree and write its registry document
    Build {
        source_root: PathBuf,

        /// Output file; defaults to the registry file name inside SOURCE_ROOT
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Number of scan workers
        #[arg(long)]
        workers: Option<usize>,

        /// Print the document instead of writing it
        #[arg(long)]
        print: bool,

        /// Prefix undotted export names with the file's package
        #[arg(long)]
        qualify_exports: bool,
    },
    /// Print the sources loading KEY would run, in order
    Plan { module_dir: PathBuf, key: String },
    /// Check every registry entry's requires resolve without cycles
    Check { module_dir: PathBuf },
}

/// Body used when only planning; nothing is executed
struct PlanOnly;

impl SourceBody for PlanOnly {
    fn run(&self, _source: &Source, _code: &[u8], _scope: &mut LoadScope<'_>) -> Result<(), ResolveError> {
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PackConfig::from_file(path)?,
        None => PackConfig::default(),
    };
    if let Some(filter) = &cli.log_filter {
        let logging = config.logging.get_or_insert_with(LoggingConfig::default);
        logging.filter = Some(filter.clone());
    }
    init_logging_from_config(config.logging.as_ref());

    match cli.command {
        Commands::Build {
            source_root,
            output,
            workers,
            print,
            qualify_exports,
        } => {
            if qualify_exports {
                config.builder.qualify_exports = true;
            }
            if workers.is_some() {
                config.builder.workers = workers;
                config.validate()?;
            }
            build(&config, &source_root, output, print).await
        }
        Commands::Plan { module_dir, key } => plan(&config, &module_dir, &key),
        Commands::Check { module_dir } => check(&config, &module_dir),
    }
}

async fn build(config: &PackConfig, source_root: &Path, output: Option<PathBuf>, print: bool) -> Result<()> {
    let builder = RegistryBuilder::new(source_root, config.builder.clone());
    let document = builder
        .build()
        .await
        .with_context(|| format!("Failed to build registry for {}", source_root.display()))?;

    if print {
        println!("{}", document.to_json_pretty()?);
        return Ok(());
    }

    let output = output.unwrap_or_else(|| source_root.join(&config.resolver.registry_file_name));
    document.write_to_file(&output)?;
    info!("Wrote {} entries to {}", document.len(), output.display());
    Ok(())
}

fn load_context(config: &PackConfig, module_dir: &Path) -> Result<Context> {
    let mut context =
        Context::new(module_dir, Arc::new(PlanOnly)).with_config(config.resolver.clone());
    context
        .load_registry()
        .with_context(|| format!("Failed to load registry under {}", module_dir.display()))?;
    Ok(context)
}

fn plan(config: &PackConfig, module_dir: &Path, key: &str) -> Result<()> {
    let context = load_context(config, module_dir)?;
    for path in context.plan_for_export(key)? {
        println!("{}", path.display());
    }
    Ok(())
}

fn check(config: &PackConfig, module_dir: &Path) -> Result<()> {
    let context = load_context(config, module_dir)?;
    let sources: Vec<PathBuf> = context
        .registry()
        .map(|registry| {
            registry
                .entries()
                .map(|entry| entry.source_path().to_path_buf())
                .collect()
        })
        .unwrap_or_default();

    let mut failures = 0usize;
    for source in &sources {
        if let Err(err) = context.plan_for_source(source) {
            warn!("{}: {}", source.display(), err);
            failures += 1;
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} sources have unresolvable requires", failures, sources.len());
    }
    println!("{} sources OK", sources.len());
    Ok(())
}
