use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use smoke_pipeline_core::{FiresManager, ModuleRegistry, RunConfig};

/// Smoke pipeline demo runner
#[derive(Parser, Debug)]
#[command(name = "smoke-pipeline-demo")]
#[command(about = "Run fire data through the smoke pipeline core", long_about = None)]
struct Args {
    /// Input fire data JSON file (reads stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Run configuration JSON file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output file (writes stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Module list override, e.g. -m filter -m merge -m export
    #[arg(short, long)]
    module: Vec<String>,

    /// Pretty-print the output JSON
    #[arg(short, long)]
    pretty: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "run failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config: RunConfig = match &args.config {
        Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
        None => RunConfig::default(),
    };

    let raw = match &args.input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buf = String::new();
            io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let mut fires_manager = FiresManager::new(config);
    fires_manager.load(serde_json::from_str(&raw)?)?;
    if !args.module.is_empty() {
        fires_manager.set_modules(args.module.clone());
    }

    let registry = ModuleRegistry::with_builtins();
    let run_result = fires_manager.run(&registry);

    // output is dumped even after a failed run so partial results and the
    // recorded error survive
    let dump = fires_manager.dump();
    let rendered = if args.pretty {
        serde_json::to_string_pretty(&dump)?
    } else {
        serde_json::to_string(&dump)?
    };
    match &args.output {
        Some(path) => fs::write(path, rendered)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.write_all(b"\n")?;
        }
    }

    run_result?;
    Ok(())
}
