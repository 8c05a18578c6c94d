use clap::Parser;
use scan_ports::cli::Cli;
use scan_ports::config::AppSettings;
use scan_ports::output;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let settings = match &cli.config {
        Some(path) => AppSettings::load_from(path)?,
        None => AppSettings::load()?,
    };

    cli.scan.execute(&settings, cli.quiet).await
}

/// Logs go to stderr so JSON and CSV on stdout stay clean. `RUST_LOG` wins
/// over `-v`/`-q`.
fn init_logging(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
