use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use ::time::{format_description::well_known, OffsetDateTime};
use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use portsweep::liveness::{
    IcmpReachability, LivenessProber, Reachability, TcpFallbackReachability,
};
use portsweep::probe::TcpProber;
use portsweep::scheduler::{self, Scheduler, WorkerLauncher};
use portsweep::sink::{ResultSink, DEFAULT_OUTPUT};
use portsweep::{ports, targets, worker};

/// portsweep: multi-process async TCP connect scanner with optional host discovery.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "portsweep",
    version,
    about = "Multi-process async TCP connect scanner with optional host discovery.",
    long_about = None,
    after_help = "Examples:\n  \
        portsweep --ip 192.168.1.0/24 --port 1-65535 -p 6 -d\n  \
        portsweep --ip 192.168.1.0/24 --port 80,8080,81 -d\n  \
        portsweep --ip-file hosts.txt --port-file ports.txt"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Hosts to scan, e.g. `10.0.0.5,192.168.1.0/24`.
    #[arg(long)]
    ip: Option<String>,

    /// File with one address or network per line (used when --ip is absent).
    #[arg(long = "ip-file")]
    ip_file: Option<PathBuf>,

    /// Ports to scan, e.g. `80,443,8000-8080`.
    #[arg(long)]
    port: Option<String>,

    /// File holding a port spec (used when --port is absent).
    #[arg(long = "port-file")]
    port_file: Option<PathBuf>,

    /// Worker processes to run (capped at the number of CPU cores).
    #[arg(short = 'p', long = "process", default_value_t = 1)]
    process: usize,

    /// Max concurrent TCP connect attempts per worker.
    #[arg(short = 'c', long = "coroutine", default_value_t = 1000)]
    coroutine: usize,

    /// Ping and probe common ports first, then scan only hosts that answered.
    #[arg(short = 'd', long = "host-discovery", default_value_t = false)]
    host_discovery: bool,

    /// CSV file results are appended to.
    #[arg(short = 'o', long, default_value = DEFAULT_OUTPUT)]
    output: PathBuf,

    /// Socket connect timeout in milliseconds.
    #[arg(long = "timeout-ms", default_value_t = 1000)]
    timeout_ms: u64,

    /// Reachability signal tried before the common-port probes during discovery.
    #[arg(long, value_enum, default_value_t = ReachabilityKind::Icmp)]
    reachability: ReachabilityKind,

    /// Timeout in milliseconds for the reachability signal.
    #[arg(long = "ping-timeout-ms", default_value_t = 1000)]
    ping_timeout_ms: u64,

    /// Port used by `--reachability tcp`; a refusal also counts as alive.
    #[arg(long = "reachability-port", default_value_t = 80)]
    reachability_port: u16,

    /// Log filter used when RUST_LOG is unset (trace, debug, info, warn, error).
    #[arg(long = "log-level", global = true, default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReachabilityKind {
    /// System `ping`, one echo request.
    Icmp,
    /// TCP connect to `--reachability-port`.
    Tcp,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Internal: scan one assignment read from stdin.
    #[command(hide = true)]
    Worker,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Some(Command::Worker) = cli.command {
        return match worker::serve(tokio::io::stdin(), tokio::io::stdout()).await {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "worker failed");
                ExitCode::FAILURE
            }
        };
    }

    let cancel = CancellationToken::new();

    // Ctrl-C cancels discovery; dropping the run below kills worker processes.
    let cancel_ctrlc = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        cancel_ctrlc.cancel();
    });

    let res = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        res = run(cli, &cancel) => Some(res),
    };
    exit_code(res, cancel.is_cancelled())
}

/// An interrupt exits 130 whatever the run returned; `None` means the run was
/// dropped before finishing.
fn exit_code(res: Option<Result<ExitCode>>, interrupted: bool) -> ExitCode {
    match res {
        Some(Err(e)) if interrupted => {
            debug!(error = %e, "run stopped after interrupt");
            eprintln!("interrupted");
            ExitCode::from(130)
        }
        None | Some(Ok(_)) if interrupted => {
            eprintln!("interrupted");
            ExitCode::from(130)
        }
        Some(Ok(code)) => code,
        Some(Err(e)) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
        None => ExitCode::from(130),
    }
}

fn init_tracing(level: &str) {
    // stdout belongs to the worker report, so logs always go to stderr
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, cancel: &CancellationToken) -> Result<ExitCode> {
    let mut hosts = match (&cli.ip, &cli.ip_file) {
        (Some(spec), _) => targets::parse_ip_spec(spec)?,
        (None, Some(path)) => targets::parse_ip_file(path)?,
        (None, None) => return print_usage(),
    };
    let ports = match (&cli.port, &cli.port_file) {
        (Some(spec), _) => ports::parse_port_spec(spec)?,
        (None, Some(path)) => ports::parse_port_file(path)?,
        (None, None) => return print_usage(),
    };

    let timeout = Duration::from_millis(cli.timeout_ms);
    let started = Instant::now();

    println!("portsweep configuration:");
    println!("  hosts        : {}", hosts.len());
    println!("  ports        : {}", ports.len());
    println!("  processes    : {}", cli.process);
    println!("  concurrency  : {}", cli.coroutine);
    println!("  timeout_ms   : {}", cli.timeout_ms);
    println!("  discovery    : {}", cli.host_discovery);
    println!("  output       : {}", cli.output.display());

    if cli.host_discovery {
        println!("\nDetecting live hosts...");
        let ping_timeout = Duration::from_millis(cli.ping_timeout_ms);
        let prober = TcpProber::new(timeout);
        hosts = match cli.reachability {
            ReachabilityKind::Icmp => {
                discover(IcmpReachability::new(ping_timeout), prober, &hosts, cancel).await?
            }
            ReachabilityKind::Tcp => {
                let reach = TcpFallbackReachability::new(cli.reachability_port, ping_timeout);
                discover(reach, prober, &hosts, cancel).await?
            }
        };
        println!("Live hosts: {}", hosts.len());
    }

    let plan = scheduler::plan(
        &hosts,
        &ports,
        cli.process,
        num_cpus::get(),
        cli.coroutine,
    )?;
    println!(
        "\nScanning with {} worker(s), partition: {:?}",
        plan.config.worker_count, plan.partition
    );

    let launcher = WorkerLauncher::current_exe()?
        .with_args(["--log-level".to_string(), cli.log_level.clone()]);
    let scheduler = Scheduler::new(timeout, launcher);

    let (sink, writer) = ResultSink::spawn(&cli.output);
    let summary = scheduler.run(plan, &sink).await?;
    drop(sink);
    let written = writer.await.context("result writer panicked")??;

    println!(
        "\nScan complete: {} open of {} probed across {} worker(s)",
        summary.open, summary.probed, summary.workers
    );
    println!("Appended {} row(s) to {}", written, cli.output.display());
    println!(
        "Finished at {} after {:.2}s",
        now_iso_like(),
        started.elapsed().as_secs_f64()
    );
    Ok(ExitCode::SUCCESS)
}

async fn discover<R: Reachability>(
    reachability: R,
    prober: TcpProber,
    hosts: &[IpAddr],
    cancel: &CancellationToken,
) -> Result<Vec<IpAddr>> {
    let liveness = LivenessProber::new(reachability, prober);
    Ok(liveness.find_living_hosts(hosts, cancel).await?)
}

fn print_usage() -> Result<ExitCode> {
    Cli::command().print_help()?;
    println!();
    Ok(ExitCode::SUCCESS)
}

fn now_iso_like() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
