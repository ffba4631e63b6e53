//! Binary entry point for `rcav2`.
//!
//! This module provides the command-line interface for rcav2 with options
//! for configuration file paths and logging verbosity. It initializes the
//! necessary components and runs the requested command.

use clap::{Parser, Subcommand};
use opentelemetry::trace::TracerProvider;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use rcav2::{
    base::{config::Config, types::Void},
    workflow::Workflow,
};
use tracing_subscriber::{fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// RCAv2 – root cause analysis of failed Zuul builds.
///
/// Configuration can come from `config.toml` or `RCAV2_` environment variables.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Override the config file path (optional).
    ///
    /// By default, the config file is looked for at `.hidden/config.toml`
    /// in the current directory.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
    /// Increase log verbosity (-v, -vv, etc.).
    ///
    /// Use multiple times to increase verbosity:
    /// - No flag: INFO level
    /// - -v: DEBUG level
    /// - -vv or more: TRACE level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Export the traces with OTLP over HTTP.
    ///
    /// The exporter honors the `OTEL_EXPORTER_OTLP_*` environment variables.
    #[arg(long)]
    otlp: bool,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API, and eodbot when the Slack tokens are configured (default).
    Serve,
    /// Analyze a build and print the events.
    Analyze {
        /// The Zuul build URL.
        url: String,
        /// The workflow: `react` or `predict`.
        #[arg(short, long, default_value = "react")]
        workflow: String,
    },
    /// Print the definition URL of a job, and of its parents.
    ZuulUrl {
        /// The job name.
        job: String,
    },
}

/// Main entry point for the rcav2 binary.
///
/// Sets up logging based on verbosity, loads configuration, and runs the command.
#[tokio::main]
async fn main() -> Void {
    let args = Args::parse();

    // Construct the level filter.

    let level = match args.verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let level_filter = tracing_subscriber::filter::LevelFilter::from_level(level);

    // Prepare the log layer.

    let stdout = tracing_subscriber::fmt::layer()
        .without_time()
        .with_ansi(true)
        .with_level(true)
        .with_file(false)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    // Prepare the otlp layer.

    let otel = if args.otlp {
        let exporter = opentelemetry_otlp::SpanExporter::builder().with_http().with_protocol(Protocol::HttpBinary).build()?;
        let tracer = opentelemetry_sdk::trace::SdkTracerProvider::builder().with_simple_exporter(exporter).build().tracer("rcav2");
        Some(tracing_opentelemetry::layer().with_tracer(tracer))
    } else {
        None
    };

    tracing_subscriber::registry().with(otel).with(level_filter).with(stdout).init();

    let config = Config::load(args.config.as_deref())?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => rcav2::start(config).await,
        Command::Analyze { url, workflow } => {
            let workflow: Workflow = workflow.parse()?;
            for event in rcav2::analyze(config, &url, workflow).await? {
                println!("{}", serde_json::to_string(&event)?);
            }
            Ok(())
        }
        Command::ZuulUrl { job } => {
            for (name, url) in rcav2::zuul_urls(config, &job).await? {
                println!("{name}: {url}");
            }
            Ok(())
        }
    }
}
