//! pdf-overlay CLI - reads a JSON request on stdin, writes PDF or PNG to stdout
//!
//! ```text
//! cat request.json | pdf-overlay > out.pdf
//! ```

use std::io::{self, Read};
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use overlay::{parse_request, render_to, ErrorKind, OverlayError, RenderConfig};

#[derive(Parser, Debug)]
#[command(name = "pdf-overlay")]
#[command(version)]
#[command(about = "Draw text and image areas over the first page of a PDF template", long_about = None)]
struct Cli {
    /// Rendering configuration (JSON)
    #[arg(long, value_name = "FILE", env = "PDF_OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Extra font directory, may be repeated
    #[arg(long = "font-dir", value_name = "DIR")]
    font_dirs: Vec<PathBuf>,

    /// Do not scan the platform font directories
    #[arg(long)]
    no_system_fonts: bool,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(err) = run(&cli) {
        eprintln!("error: {err:#}");
        std::process::exit(exit_code(&err));
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = build_config(cli)?;

    let mut input = String::new();
    io::stdin()
        .read_to_string(&mut input)
        .context("cannot read request from stdin")?;
    let request = parse_request(&input)?;
    log::debug!("request: {} areas on {}", request.areas.len(), request.template);

    let stdout = io::stdout();
    let mut out = stdout.lock();
    render_to(&request, &config, &mut out)?;
    Ok(())
}

/// Config file (if any) with command line flags applied on top
fn build_config(cli: &Cli) -> anyhow::Result<RenderConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read config {}", path.display()))?;
            RenderConfig::from_json(&json).with_context(|| format!("invalid config {}", path.display()))?
        }
        None => RenderConfig::default(),
    };

    config.font_dirs.extend(cli.font_dirs.iter().cloned());
    if cli.no_system_fonts {
        config.system_fonts = false;
    }
    Ok(config)
}

/// Exit code for the first overlay error in the chain; other failures are input errors
fn exit_code(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<OverlayError>())
        .map(OverlayError::kind)
        .unwrap_or(ErrorKind::Input)
        .exit_code()
}
