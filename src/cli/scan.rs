//! Scan command implementation.
//!
//! Turns command-line options and user settings into a validated
//! [`ScanConfig`] and [`PortSpec`], runs the coordinator, and renders the
//! reports.

use crate::cli::OutputFormat;
use crate::config::{AppSettings, Capability, DetectionTier, PortList, ScanConfig};
use crate::error::{ConfigError, ConfigResult};
use crate::output;
use crate::scanner::Coordinator;
use crate::types::PortSpec;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Connect timeout used by `--fast`, in milliseconds.
const FAST_TIMEOUT_MS: u64 = 1000;

/// Scan hosts for open ports and identify their services.
#[derive(Args, Debug)]
pub struct ScanCommand {
    /// Hosts to scan (IP, hostname, or CIDR notation)
    ///
    /// Examples:
    ///   192.168.1.1        Single IP address
    ///   example.com        Hostname
    ///   192.168.1.0/28     CIDR range
    #[arg(value_name = "HOST", default_value = "localhost")]
    pub hosts: Vec<String>,

    /// Ports to scan (e.g., "80", "80,443", "1-1000", "22,80,443,8000-9000")
    #[arg(short, long, conflicts_with = "lists")]
    pub ports: Option<String>,

    /// Named port lists to scan (e.g., "web,database"); defaults to all
    #[arg(short, long, value_delimiter = ',')]
    pub lists: Vec<String>,

    /// Connection timeout in milliseconds
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Use a short connection timeout (1000 ms)
    #[arg(long, conflicts_with = "timeout")]
    pub fast: bool,

    /// Maximum number of ports probed at once
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,

    /// Service detection tier
    #[arg(long, value_enum)]
    pub tier: Option<DetectionTier>,

    /// Only report port states, skip service detection
    #[arg(long)]
    pub no_service_detection: bool,

    /// Show closed ports in output
    #[arg(long)]
    pub show_closed: bool,

    /// Stop dispatching new ports after this many seconds
    #[arg(long, value_name = "SECS")]
    pub deadline: Option<u64>,

    /// Extra connect attempts after a timeout
    #[arg(long, default_value = "0")]
    pub retries: u8,

    /// Output format for results
    #[arg(short, long, value_enum, default_value = "plain")]
    pub output: OutputFormat,

    /// List the named port lists and exit
    #[arg(long)]
    pub show_lists: bool,

    /// Show which detection components are available and exit
    #[arg(long)]
    pub check_deps: bool,
}

impl ScanCommand {
    /// Execute the command.
    pub async fn execute(&self, settings: &AppSettings, quiet: bool) -> anyhow::Result<()> {
        let capability = Capability::available();
        if self.check_deps {
            output::print_capabilities(capability)?;
            return Ok(());
        }

        let lists = settings.port_lists();
        if self.show_lists {
            output::print_port_lists(&lists)?;
            return Ok(());
        }

        let ports = self.port_spec(&lists)?;
        let config = self.scan_config(settings)?;
        debug!(ports = ports.count(), hosts = self.hosts.len(), "scan configured");

        let cancel = CancellationToken::new();
        let cancel_ctrlc = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel_ctrlc.cancel();
            }
        });

        let mut coordinator =
            Coordinator::new(config, capability).with_cancellation(cancel.clone());
        let spinner = if !quiet && self.output == OutputFormat::Plain {
            Some(spinner()?)
        } else {
            None
        };
        if let Some(pb) = &spinner {
            coordinator = coordinator.with_progress(pb.clone());
        }

        let reports = coordinator.scan_hosts(&self.hosts, &ports).await?;

        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        if cancel.is_cancelled() && !quiet {
            output::print_warning("scan interrupted, showing partial results");
        }

        output::print_reports(&reports, self.output)?;
        Ok(())
    }

    /// Ports from `-p`, else from the named lists (all of them by default).
    fn port_spec(&self, lists: &BTreeMap<String, PortList>) -> ConfigResult<PortSpec> {
        let spec = match &self.ports {
            Some(ports) => ports.parse::<PortSpec>()?,
            None if self.lists.is_empty() => {
                let all: &[&str] = &["all"];
                PortSpec::from_lists(all, lists)?
            }
            None => PortSpec::from_lists(&self.lists, lists)?,
        };

        if spec.is_empty() {
            return Err(ConfigError::EmptyPortSet);
        }
        Ok(spec)
    }

    /// Command-line options layered over user settings.
    fn scan_config(&self, settings: &AppSettings) -> ConfigResult<ScanConfig> {
        let timeout_ms = if self.fast {
            FAST_TIMEOUT_MS
        } else {
            self.timeout.unwrap_or(settings.default_timeout_ms)
        };

        ScanConfig::builder()
            .timeout(Duration::from_millis(timeout_ms))
            .concurrency(self.concurrency.unwrap_or(settings.default_concurrency))
            .detection_tier(self.tier.unwrap_or(settings.default_tier))
            .show_closed(self.show_closed)
            .detect_services(settings.detect_services && !self.no_service_detection)
            .deadline(self.deadline.map(Duration::from_secs))
            .timeout_retries(self.retries)
            .build()
    }
}

fn spinner() -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(0);
    pb.set_style(ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] {pos}/{len} ports {msg}",
    )?);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

#[cfg(test)]
mod tests {
    use crate::cli::Cli;
    use crate::config::{AppSettings, DetectionTier};
    use crate::error::ConfigError;
    use crate::types::Port;
    use clap::Parser;
    use std::time::Duration;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("scan-ports").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_config_falls_back_to_settings() {
        let settings = AppSettings {
            default_timeout_ms: 750,
            default_concurrency: 12,
            default_tier: DetectionTier::Basic,
            ..AppSettings::default()
        };
        let config = parse(&[]).scan.scan_config(&settings).unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(750));
        assert_eq!(config.concurrency(), 12);
        assert_eq!(config.detection_tier(), DetectionTier::Basic);
        assert!(config.detect_services());
    }

    #[test]
    fn test_flags_override_settings() {
        let config = parse(&["--fast", "-c", "3", "--no-service-detection", "--deadline", "5"])
            .scan
            .scan_config(&AppSettings::default())
            .unwrap();
        assert_eq!(config.timeout(), Duration::from_millis(1000));
        assert_eq!(config.concurrency(), 3);
        assert!(!config.detect_services());
        assert_eq!(config.deadline(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = parse(&["-c", "0"]).scan.scan_config(&AppSettings::default());
        assert!(matches!(result, Err(ConfigError::ZeroConcurrency)));

        let result = parse(&["-c", "18446744073709551615"])
            .scan
            .scan_config(&AppSettings::default());
        assert!(matches!(result, Err(ConfigError::ConcurrencyTooHigh { .. })));

        let result = parse(&["--deadline", "18446744073709551615"])
            .scan
            .scan_config(&AppSettings::default());
        assert!(matches!(result, Err(ConfigError::DeadlineTooFar(_))));
    }

    #[test]
    fn test_default_ports_are_all_lists() {
        let lists = AppSettings::default().port_lists();
        let spec = parse(&[]).scan.port_spec(&lists).unwrap();
        let redis = Port::new(6379).unwrap();
        assert!(spec.to_ports().contains(&redis));
        assert_eq!(spec.label(redis), Some("Redis"));
    }

    #[test]
    fn test_explicit_ports_and_unknown_list() {
        let lists = AppSettings::default().port_lists();
        let spec = parse(&["-p", "22,8000-8002"]).scan.port_spec(&lists).unwrap();
        assert_eq!(spec.count(), 4);

        let err = parse(&["-l", "web,nope"]).scan.port_spec(&lists).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPortList { ref name, .. } if name == "nope"));
    }
}
