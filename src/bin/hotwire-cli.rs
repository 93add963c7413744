//! Hotwire CLI - evaluate scripts against a fresh root
//!
//! The root carries a `script` executor unit; anything else a script needs it
//! builds itself through the container protocol (`/root.add-child ...`).

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use hotwire::interpreter::executor::{self, EVAL_CONTROL};
use hotwire::runtime::Root;
use hotwire::runtime::config::RuntimeConfig;
use hotwire::runtime::env::LogLevel;
use hotwire::runtime::registry::ComponentCatalog;
use hotwire::runtime::value::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "hotwire")]
#[command(about = "Live-codable component runtime", long_about = None)]
struct Cli {
    /// Runtime config file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Destination path
        #[arg(default_value = "hotwire.json")]
        path: PathBuf,
    },

    /// List the component types available to scripts
    Types,

    /// Evaluate a script file
    Eval {
        /// Script to run
        file: PathBuf,

        /// Keep going after failing lines and report them all
        #[arg(long)]
        trap_errors: bool,

        /// Most verbose level kept for script `log` lines
        #[arg(long, default_value = "info")]
        log_level: String,

        /// Print the root's snapshot once the script finished
        #[arg(long)]
        dump: bool,
    },
}

fn catalog() -> ComponentCatalog {
    let mut catalog = ComponentCatalog::new();
    executor::register(&mut catalog);
    catalog
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RuntimeConfig::default(),
    };

    match cli.command {
        Commands::Init { path } => {
            config.save(&path)?;
            println!("Wrote default config to {}", path.display());
        }

        Commands::Types => {
            for name in catalog().type_names() {
                println!("{}", name);
            }
        }

        Commands::Eval {
            file,
            trap_errors,
            log_level,
            dump,
        } => {
            let source = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let Some(level) = LogLevel::parse(&log_level) else {
                bail!("unknown log level '{}'", log_level);
            };
            eval(config, source, trap_errors, level, dump)?;
        }
    }

    Ok(())
}

fn eval(
    config: RuntimeConfig,
    source: String,
    trap_errors: bool,
    level: LogLevel,
    dump: bool,
) -> anyhow::Result<()> {
    let step = config.tick_period_ms.max(1) as i64;
    let mut root = Root::new(config, catalog())?;
    let top = root.address().clone();
    let script = executor::add_executor(&mut root, &top, "script")?;
    root.start();

    let mut options = BTreeMap::new();
    options.insert("trap-errors".to_string(), Value::Bool(trap_errors));
    options.insert("log-level".to_string(), Value::text(level.to_string()));
    let handle = root.request_with_timeout(
        script.control(EVAL_CONTROL)?,
        vec![Value::Text(source), Value::Map(options)],
        None,
    );

    root.run_until_idle();
    while !handle.is_done() {
        let next = root.time().wrapping_add(step);
        root.tick(next);
    }

    let outcome = handle.result();
    if dump {
        println!("{}", root.serialize_text(&top)?);
    }
    root.stop();

    match outcome {
        Some(Ok(values)) => {
            for value in values {
                println!("{}", value);
            }
            Ok(())
        }
        Some(Err(error)) => bail!("{}: {}", error.category, error.message),
        None => bail!("script produced no answer"),
    }
}
