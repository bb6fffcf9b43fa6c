// FabIRQ - Fabric Interrupt Runtime
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fabirq_config::{DeviceDescription, RuntimeConfig};
use fabirq_core::intc::Upstream;
use fabirq_core::proc_interrupts::IrqLine;
use fabirq_core::sim::SimBoard;
use fabirq_core::{
    EventLoop, Interrupt, IrqError, LinuxPlatform, ProcInterrupts, ResolutionContext, Target,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

const EXIT_OK: u8 = 0;
const EXIT_NOT_FOUND: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;
const EXIT_RUNTIME_ERROR: u8 = 3;

#[derive(Parser, Debug)]
#[command(author, version, about = "FabIRQ fabric interrupt tool", long_about = None)]
struct Cli {
    /// Runtime configuration (YAML) with kernel interface paths
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List fabric interrupt lines and the UIO device serving each.
    Irqs(IrqsArgs),

    /// Print the UIO device bound to a raw IRQ.
    Uio(UioArgs),

    /// Resolve an interrupt pin through its controller chain.
    Resolve(ResolveArgs),

    /// Wait on real hardware for an interrupt pin to fire.
    Wait(WaitArgs),
}

#[derive(Parser, Debug)]
struct IrqsArgs {
    /// Read this file instead of the configured /proc/interrupts
    #[arg(long)]
    proc_interrupts: Option<PathBuf>,

    /// Print JSON instead of a table
    #[arg(long)]
    json: bool,
}

#[derive(Parser, Debug)]
struct UioArgs {
    /// CPU-level interrupt number
    raw_irq: u32,
}

#[derive(Parser, Debug)]
struct ResolveArgs {
    /// Device description (YAML or JSON)
    #[arg(short = 'd', long)]
    description: PathBuf,

    /// Interrupt pin name
    pin: String,

    /// Resolve against the running kernel instead of a simulated board
    #[arg(long)]
    hardware: bool,
}

#[derive(Parser, Debug)]
struct WaitArgs {
    /// Device description (YAML or JSON)
    #[arg(short = 'd', long)]
    description: PathBuf,

    /// Interrupt pin name
    pin: String,

    /// Number of interrupts to wait for
    #[arg(long, default_value = "1")]
    count: u32,

    /// Give up if a single interrupt takes longer than this
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Serialize)]
struct FabricLine<'a> {
    #[serde(flatten)]
    line: &'a IrqLine,
    uio: PathBuf,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.trace {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let config = match load_runtime_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match cli.command {
        Commands::Irqs(args) => run_irqs(args, config),
        Commands::Uio(args) => run_uio(args, config),
        Commands::Resolve(args) => run_resolve(args, config),
        Commands::Wait(args) => run_wait(args, config),
    }
}

fn load_runtime_config(path: Option<&Path>) -> Result<RuntimeConfig> {
    match path {
        Some(path) => RuntimeConfig::from_file(path),
        None => Ok(RuntimeConfig::default()),
    }
}

fn load_description(path: &Path) -> Result<DeviceDescription> {
    let description = DeviceDescription::from_file(path)?;
    description
        .validate()
        .with_context(|| format!("Invalid device description {:?}", path))?;
    Ok(description)
}

fn irq_failure(err: &IrqError) -> ExitCode {
    error!("{}", err);
    if err.is_resolution() {
        ExitCode::from(EXIT_NOT_FOUND)
    } else {
        ExitCode::from(EXIT_RUNTIME_ERROR)
    }
}

fn run_irqs(args: IrqsArgs, config: RuntimeConfig) -> ExitCode {
    let path = args
        .proc_interrupts
        .unwrap_or_else(|| config.proc_interrupts.clone());
    let table = match ProcInterrupts::read(&path) {
        Ok(table) => table,
        Err(e) => {
            error!("Failed to read {:?}: {}", path, e);
            return ExitCode::from(EXIT_RUNTIME_ERROR);
        }
    };

    let lines: Vec<FabricLine> = table
        .named(&config.uio_line_name)
        .enumerate()
        .map(|(index, line)| FabricLine {
            line,
            uio: config.uio_device_path(index),
        })
        .collect();

    if args.json {
        match serde_json::to_string_pretty(&lines) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                error!("Failed to encode JSON: {}", e);
                return ExitCode::from(EXIT_RUNTIME_ERROR);
            }
        }
    } else {
        for entry in &lines {
            let hwirq = entry
                .line
                .hwirq
                .map_or_else(|| "-".to_string(), |n| n.to_string());
            println!("{:>5}  {:>5}  {}", entry.line.virq, hwirq, entry.uio.display());
        }
    }
    info!("{} {} line(s) in {:?}", lines.len(), config.uio_line_name, path);
    ExitCode::from(EXIT_OK)
}

fn run_uio(args: UioArgs, config: RuntimeConfig) -> ExitCode {
    use fabirq_core::Platform;

    match LinuxPlatform::new(config).uio_path(args.raw_irq) {
        Ok(Some(path)) => {
            println!("{}", path.display());
            ExitCode::from(EXIT_OK)
        }
        Ok(None) => {
            warn!("No UIO device is bound to raw IRQ {}", args.raw_irq);
            ExitCode::from(EXIT_NOT_FOUND)
        }
        Err(e) => {
            error!("Failed to read interrupt table: {}", e);
            ExitCode::from(EXIT_RUNTIME_ERROR)
        }
    }
}

/// Each hop from the pin's target down to the UIO device.
fn describe_chain(target: &Target) -> Vec<String> {
    let mut hops = vec![target.to_string()];
    let mut next = match target {
        Target::Direct { .. } => None,
        Target::Chained { controller, .. } => Some(controller.upstream().clone()),
    };
    while let Some(upstream) = next.take() {
        match upstream {
            Upstream::Controller { controller, line } => {
                hops.push(format!("{} line {}", controller.name(), line));
                next = Some(controller.upstream().clone());
            }
            Upstream::Uio(uio) => hops.push(format!(
                "raw IRQ {} ({})",
                uio.raw_irq(),
                uio.path().display()
            )),
        }
    }
    hops
}

fn run_resolve(args: ResolveArgs, config: RuntimeConfig) -> ExitCode {
    let description = match load_description(&args.description) {
        Ok(description) => description,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let ctx = if args.hardware {
        ResolutionContext::new(LinuxPlatform::new(config), description)
    } else {
        let board = match SimBoard::from_description(&description) {
            Ok(board) => board,
            Err(e) => {
                error!("{:#}", e);
                return ExitCode::from(EXIT_CONFIG_ERROR);
            }
        };
        ResolutionContext::new(board.platform(), description)
    };

    let interrupt = match Interrupt::new(&ctx, &args.pin) {
        Ok(interrupt) => interrupt,
        Err(e) => return irq_failure(&e),
    };

    println!("{}", interrupt.pin());
    for hop in describe_chain(interrupt.target()) {
        println!("  -> {}", hop);
    }
    ExitCode::from(EXIT_OK)
}

fn run_wait(args: WaitArgs, config: RuntimeConfig) -> ExitCode {
    let description = match load_description(&args.description) {
        Ok(description) => description,
        Err(e) => {
            error!("{:#}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let ctx = ResolutionContext::new(LinuxPlatform::new(config), description);
    let interrupt = match Interrupt::new(&ctx, &args.pin) {
        Ok(interrupt) => interrupt,
        Err(e) => return irq_failure(&e),
    };
    info!("Waiting on '{}' via {}", args.pin, interrupt.target());

    let event_loop = EventLoop::new(&ctx);
    for n in 1..=args.count {
        let outcome = match args.timeout_ms {
            Some(ms) => event_loop.block_on_timeout(interrupt.wait(), Duration::from_millis(ms)),
            None => event_loop.block_on(interrupt.wait()).map(Some),
        };
        match outcome {
            Ok(Some(Ok(()))) => {
                info!("Interrupt '{}' fired ({}/{})", args.pin, n, args.count);
                println!("{} {}", args.pin, n);
            }
            Ok(None) => {
                warn!("Timed out waiting for '{}'", args.pin);
                return ExitCode::from(EXIT_NOT_FOUND);
            }
            Ok(Some(Err(e))) | Err(e) => return irq_failure(&e),
        }
    }
    ExitCode::from(EXIT_OK)
}
