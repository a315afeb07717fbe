mod generator;
mod hil;
mod serve;
mod stats;
mod throughput;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use hil::BridgeLink;
use log::info;
use mxu_core::sim::SimAccelerator;
use mxu_core::{MatmulTransport, OffloadConfig, OffloadDriver, SerialTransport};
use mxu_io::batch::{REQUEST_PATH_ENV, RESULT_PATH_ENV};
use mxu_io::loader::load_request_file;
use mxu_io::{BatchFileTransport, CommandStep};
use serve::Backend;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(about = "Matrix-multiply offload host tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TransportKind {
    /// Serial protocol against the in-process behavioral model.
    Sim,
    /// Serial protocol against an RTL simulation behind the TCP bridge.
    Bridge,
    /// File hand-off to an external step.
    Batch,
}

/// Bounds shared by every command that offloads.
#[derive(Args, Debug)]
struct OffloadArgs {
    /// Clock units polled per handshake flag.
    #[arg(long, default_value_t = mxu_common::timing::DEFAULT_FLAG_BUDGET)]
    flag_budget: u32,
    /// Clock units polled across all handshakes of one request.
    #[arg(long)]
    request_budget: Option<u64>,
    /// Result artifact poll interval in ms.
    #[arg(long, default_value_t = mxu_common::timing::DEFAULT_POLL_INTERVAL_MS)]
    poll_interval_ms: u64,
    /// Maximum wait for the result artifact in ms.
    #[arg(long, default_value_t = mxu_common::timing::DEFAULT_MAX_WAIT_MS)]
    max_wait_ms: u64,
    /// Maximum run time of the batch external step in ms.
    #[arg(long, default_value_t = mxu_common::timing::DEFAULT_STEP_TIMEOUT_MS)]
    step_timeout_ms: u64,
    /// Keep request and result artifacts after a batch request.
    #[arg(long)]
    keep_artifacts: bool,
}

impl OffloadArgs {
    fn to_config(&self) -> OffloadConfig {
        let mut config = OffloadConfig::default()
            .with_flag_budget(self.flag_budget)
            .with_poll_interval(Duration::from_millis(self.poll_interval_ms))
            .with_max_wait(Duration::from_millis(self.max_wait_ms))
            .with_step_timeout(Duration::from_millis(self.step_timeout_ms))
            .with_keep_artifacts(self.keep_artifacts);
        if let Some(units) = self.request_budget {
            config = config.with_request_budget(units);
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a random request artifact.
    Gen {
        #[arg(long, default_value = "request.txt")]
        out: String,
        #[arg(short, default_value_t = 4)]
        m: usize,
        #[arg(short, default_value_t = 4)]
        k: usize,
        #[arg(short, default_value_t = 4)]
        n: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Offload one request and check it against the reference product.
    Run {
        #[arg(short, long)]
        request: PathBuf,
        #[arg(short, long, value_enum, default_value_t = TransportKind::Sim)]
        transport: TransportKind,
        /// Bridge address for the bridge transport.
        #[arg(long, default_value = "127.0.0.1:8000")]
        bridge: String,
        /// Artifact directory for the batch transport.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        /// External step for the batch transport; defaults to this
        /// binary's `serve` command.
        #[arg(long, num_args = 1.., allow_hyphen_values = true)]
        step: Option<Vec<String>>,
        #[arg(long, default_value_t = 1e-3)]
        tolerance: f32,
        #[command(flatten)]
        offload: OffloadArgs,
    },
    /// Serve one batch request: read the request artifact, offload it over
    /// the serial protocol, write the result artifact.
    Serve {
        #[arg(long, env = REQUEST_PATH_ENV)]
        request: PathBuf,
        #[arg(long, env = RESULT_PATH_ENV)]
        result: PathBuf,
        /// Use the RTL bridge at this address instead of the model.
        #[arg(long)]
        bridge: Option<String>,
        #[command(flatten)]
        offload: OffloadArgs,
    },
    /// Run many independent requests in parallel on simulated accelerators.
    Bench {
        #[arg(long, default_value_t = 1_000)]
        requests: usize,
        #[arg(short, default_value_t = 8)]
        m: usize,
        #[arg(short, default_value_t = 8)]
        k: usize,
        #[arg(short, default_value_t = 8)]
        n: usize,
        #[arg(long)]
        seed: Option<u64>,
        #[command(flatten)]
        offload: OffloadArgs,
    },
}

/// Round-trip bound for a single bridge command.
const BRIDGE_IO_TIMEOUT: Duration = Duration::from_secs(10);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Gen { out, m, k, n, seed } => {
            generator::generate_request(&out, m, k, n, seed)?;
        }
        Commands::Run {
            request,
            transport,
            bridge,
            dir,
            step,
            tolerance,
            offload,
        } => {
            run_request(request, transport, bridge, dir, step, tolerance, offload.to_config())?;
        }
        Commands::Serve {
            request,
            result,
            bridge,
            offload,
        } => {
            let backend = match bridge {
                Some(addr) => Backend::Bridge {
                    addr,
                    io_timeout: BRIDGE_IO_TIMEOUT,
                },
                None => Backend::Simulated,
            };
            serve::serve_request(&request, &result, &backend, offload.to_config())?;
        }
        Commands::Bench {
            requests,
            m,
            k,
            n,
            seed,
            offload,
        } => {
            throughput::run_benchmark(requests, (m, k, n), seed, offload.to_config())?;
        }
    }
    Ok(())
}

fn run_request(
    request_path: PathBuf,
    kind: TransportKind,
    bridge: String,
    dir: PathBuf,
    step: Option<Vec<String>>,
    tolerance: f32,
    config: OffloadConfig,
) -> Result<()> {
    let request = load_request_file(&request_path)?;
    let driver = OffloadDriver::new(config);

    let mut transport: Box<dyn MatmulTransport> = match kind {
        TransportKind::Sim => Box::new(SerialTransport::new(SimAccelerator::new())),
        TransportKind::Bridge => {
            let link = BridgeLink::connect(bridge.as_str(), BRIDGE_IO_TIMEOUT)
                .with_context(|| format!("Failed to connect to bridge at {bridge}"))?;
            let mut serial = SerialTransport::new(link);
            driver.reset(&mut serial).context("accelerator reset failed")?;
            Box::new(serial)
        }
        TransportKind::Batch => {
            let command = match step {
                Some(argv) => {
                    let Some((program, args)) = argv.split_first() else {
                        bail!("--step needs a program");
                    };
                    CommandStep::new(program).args(args)
                }
                None => {
                    let exe = std::env::current_exe().context("cannot locate own executable")?;
                    CommandStep::new(exe).arg("serve")
                }
            };
            Box::new(BatchFileTransport::new(dir, command))
        }
    };

    let start = Instant::now();
    let c = driver.multiply(&request.a, &request.b, &mut transport)?;
    let elapsed = start.elapsed();

    let expected = request.a.matmul_reference(&request.b)?;
    let diff = c.max_abs_diff(&expected).unwrap_or(f32::INFINITY);
    println!("Product: {}x{} via {}", c.rows(), c.cols(), transport.name());
    println!("Time: {elapsed:?}");
    println!("Max abs diff vs reference: {diff:e}");

    if !(diff <= tolerance) {
        bail!("product differs from reference by {diff} (tolerance {tolerance})");
    }
    info!("product verified");
    Ok(())
}
