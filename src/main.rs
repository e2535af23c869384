use std::io::Read;
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use stampede::client::{Attacker, AttackerConfig};
use stampede::codec;
use stampede::report::{self, Reporter};
use stampede::runner::{Runner, RunnerConfig};
use stampede::sample;

/// Scripted HTTP load generator.
#[derive(Parser)]
#[command(name = "stampede", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play every user script in a directory and write the result log
    Users(UsersArgs),
    /// Render a report from result logs
    Report(ReportArgs),
}

#[derive(Args)]
struct UsersArgs {
    /// Directory with user scripts (*.txt)
    #[arg(long = "users")]
    users_dir: PathBuf,

    /// Output file, or "stdout"
    #[arg(long, default_value = "stdout")]
    output: String,

    /// Extra x509 root certificate (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Number of redirects to follow; 0 disables following
    #[arg(long, default_value_t = 10)]
    redirects: usize,

    /// Local IP address to bind outgoing connections to
    #[arg(long)]
    laddr: Option<IpAddr>,

    /// Use persistent connections
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    keepalive: bool,

    /// Per-request timeout
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    timeout: Duration,

    /// How long shutdown waits for in-flight results
    #[arg(long, default_value = "5s", value_parser = humantime::parse_duration)]
    drain_grace: Duration,
}

#[derive(Args)]
struct ReportArgs {
    /// Reporter: text, json, plot, dump, or hist[b1,b2,…]
    #[arg(long, default_value = "text")]
    reporter: String,

    /// Input files (comma separated, or a glob), or "stdin"
    #[arg(long, default_value = "stdin")]
    inputs: String,

    /// Output file, or "stdout"
    #[arg(long, default_value = "stdout")]
    output: String,

    /// Space-separated filters: Method=<M>, URL=<substring>, Time=[+-]<dur>
    #[arg(long, default_value = "")]
    filters: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Command::Users(args) => users(args).await,
        Command::Report(args) => run_report(args).await,
    }
}

async fn users(args: UsersArgs) -> Result<()> {
    let root_cert_pem = match &args.cert {
        Some(path) => Some(
            std::fs::read(path).with_context(|| format!("error reading {}", path.display()))?,
        ),
        None => None,
    };
    let attacker_config = AttackerConfig {
        timeout: args.timeout,
        redirects: args.redirects,
        keepalive: args.keepalive,
        local_addr: args.laddr,
        root_cert_pem,
    };

    let mut scripts = Vec::new();
    let entries = std::fs::read_dir(&args.users_dir)
        .with_context(|| format!("error reading user directory {}", args.users_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "txt") {
            scripts.push(path);
        }
    }
    scripts.sort();
    if scripts.is_empty() {
        bail!("no *.txt user scripts in {}", args.users_dir.display());
    }

    let mut runner = Runner::new(RunnerConfig {
        drain_grace: args.drain_grace,
        ..RunnerConfig::default()
    });
    for path in scripts {
        let script = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("error reading user file {}", path.display()))?;
        let attacker = Attacker::new(&attacker_config)?;
        runner.add_user(path.display().to_string(), script, attacker);
    }

    let out: Box<dyn tokio::io::AsyncWrite + Unpin> = match args.output.as_str() {
        "stdout" => Box::new(tokio::io::stdout()),
        path => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("error opening {path}"))?,
        ),
    };

    let interrupt = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    let written = runner.run(out, interrupt).await?;
    info!(samples = written, "run complete");
    Ok(())
}

async fn run_report(args: ReportArgs) -> Result<()> {
    let reporter: Reporter = args.reporter.parse()?;
    let filters = report::parse_filters(&args.filters)?;

    let mut sources: Vec<Box<dyn Read>> = Vec::new();
    if args.inputs == "stdin" {
        sources.push(Box::new(std::io::stdin()));
    } else {
        let files = if args.inputs.contains('*') {
            let mut files = Vec::new();
            for path in glob::glob(&args.inputs)
                .with_context(|| format!("bad glob {}", args.inputs))?
            {
                files.push(path?);
            }
            files
        } else {
            args.inputs.split(',').map(PathBuf::from).collect()
        };
        for path in files {
            let file = std::fs::File::open(&path)
                .with_context(|| format!("error opening {}", path.display()))?;
            sources.push(Box::new(file));
        }
    }

    let mut samples = codec::collect(sources)?;
    sample::sort_by_timestamp(&mut samples);
    let samples = report::apply_filters(&filters, samples);
    let rendered = reporter.report(&samples)?;

    match args.output.as_str() {
        "stdout" => {
            use std::io::Write;
            std::io::stdout().write_all(&rendered)?;
        }
        path => std::fs::write(path, &rendered)
            .with_context(|| format!("error writing {path}"))?,
    }
    Ok(())
}
