//! vnsh: a scriptable shell over an in-memory vnswitch.
//!
//! ## Usage
//!
//! ```bash
//! # Read commands from stdin
//! echo 'mkdir /a
//! write /a/hello hi
//! cat /a/hello' | vnsh
//!
//! # Run a script with a custom cache size
//! vnsh --config switch.ron setup.vnsh
//!
//! # One-off commands
//! vnsh -c 'mkdir /m' -c 'mount /m' -c mounts
//! ```

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};
use vnswitch_kernel::SwitchConfig;

mod shell;

use shell::Shell;

/// Scriptable shell over an in-memory virtual filesystem switch.
#[derive(Parser, Debug)]
#[command(name = "vnsh")]
#[command(about = "Drive a vnswitch with line-oriented commands")]
struct Args {
    /// Switch configuration (RON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter, overriding RUST_LOG
    #[arg(long)]
    log: Option<String>,

    /// Run this command (repeatable) instead of reading a script
    #[arg(short = 'c', long = "command")]
    commands: Vec<String>,

    /// Script file; stdin when omitted
    script: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let filter = match &args.log {
        Some(directives) => EnvFilter::new(directives),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .init();

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failures) => {
            tracing::warn!("{} command(s) failed", failures);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<usize> {
    let config = match &args.config {
        Some(path) => SwitchConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => SwitchConfig::default(),
    };
    tracing::debug!(?config, "booting switch");
    let shell = Shell::boot(config)?;

    let (mut out, mut err) = (io::stdout().lock(), io::stderr());
    let failures = if !args.commands.is_empty() {
        let script = args.commands.join("\n");
        shell.run(script.as_bytes(), &mut out, &mut err)?
    } else if let Some(path) = &args.script {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        shell.run(BufReader::new(file), &mut out, &mut err)?
    } else {
        shell.run(io::stdin().lock(), &mut out, &mut err)?
    };

    shell.sync()?;
    Ok(failures)
}
