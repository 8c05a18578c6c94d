//! Plain text output formatting.
//!
//! Produces human-readable output with colors and formatting.

use crate::config::{Capability, PortList};
use crate::scanner::{Confidence, PortResult, PortState, ScanReport};
use console::{style, Style};
use std::collections::BTreeMap;
use std::io::{self, Write};

const HEAVY_RULE: &str = "═══════════════════════════════════════════════════════════════════════════";
const LIGHT_RULE: &str = "───────────────────────────────────────────────────────────────────────────";

/// Write reports in human-readable plain text format.
pub fn write_plain<W: Write>(mut out: W, reports: &[ScanReport]) -> io::Result<()> {
    for report in reports {
        write_report(&mut out, report)?;
    }
    Ok(())
}

fn write_report<W: Write>(out: &mut W, report: &ScanReport) -> io::Result<()> {
    // Header
    writeln!(out)?;
    writeln!(out, "{}", style(HEAVY_RULE).cyan())?;
    writeln!(out, "  {} {}", style("Target:").bold(), style(&report.target).bold())?;
    if let Some(address) = report.address {
        writeln!(out, "  {} {}", style("Address:").bold(), address)?;
    }
    writeln!(out, "  {} {}", style("Detection:").bold(), report.tier)?;
    writeln!(out, "{}", style(HEAVY_RULE).cyan())?;

    if let Some(err) = &report.error {
        writeln!(out, "  {} {}", style("Unresolved:").red().bold(), err)?;
        writeln!(out)?;
        return Ok(());
    }

    writeln!(out)?;

    let visible: Vec<&PortResult> = report.visible().collect();
    if visible.is_empty() {
        writeln!(out, "  {}", style("No ports to display.").dim())?;
    } else {
        writeln!(out, "  {}", style(LIGHT_RULE).dim())?;
        writeln!(
            out,
            "  {:>6}  {:<12}  {:<18}  {:<22}  {}",
            style("PORT").bold(),
            style("STATE").bold(),
            style("EXPECTED").bold(),
            style("DETECTED").bold(),
            style("CONFIDENCE").bold()
        )?;
        writeln!(out, "  {}", style(LIGHT_RULE).dim())?;

        for result in visible {
            write_row(out, result)?;
        }

        writeln!(out, "  {}", style(LIGHT_RULE).dim())?;
    }

    // Statistics
    writeln!(out)?;
    writeln!(
        out,
        "  {} {} ports in {:.2}s",
        style("Statistics:").bold(),
        report.results.len(),
        report.duration.as_secs_f64()
    )?;
    writeln!(
        out,
        "              {} open, {} closed, {} filtered, {} not scanned",
        style(report.open_count()).green().bold(),
        style(report.closed_count()).red(),
        style(report.filtered_count()).yellow(),
        style(report.not_scanned_count()).dim()
    )?;

    if report.interrupted {
        writeln!(
            out,
            "  {} scan stopped early; {} ports were not scanned",
            style("Interrupted:").yellow().bold(),
            report.not_scanned_count()
        )?;
    }

    writeln!(out)?;
    Ok(())
}

fn write_row<W: Write>(out: &mut W, result: &PortResult) -> io::Result<()> {
    let state_style = match result.state {
        PortState::Open => Style::new().green().bold(),
        PortState::Closed => Style::new().red(),
        PortState::Filtered => Style::new().yellow(),
        PortState::NotScanned => Style::new().dim(),
    };

    let expected = result.expected.as_deref().map(|e| truncate_string(e, 18)).unwrap_or_default();
    let (detected, confidence) = match &result.service {
        Some(service) => {
            let name = match &service.version {
                Some(version) => format!("{} {}", service.name, version),
                None => service.name.clone(),
            };
            (
                truncate_string(&name, 22),
                confidence_style(service.confidence).apply_to(service.confidence.to_string()),
            )
        }
        None => (String::new(), Style::new().apply_to(String::new())),
    };

    writeln!(
        out,
        "  {:>6}  {:<12}  {:<18}  {:<22}  {}",
        result.port.as_u16(),
        state_style.apply_to(result.state.to_string()),
        expected,
        detected,
        confidence
    )?;

    if let Some(service) = &result.service {
        for (key, value) in &service.detail {
            writeln!(
                out,
                "          {} {}",
                style(format!("{key}:")).dim(),
                truncate_string(value, 60)
            )?;
        }
        if let Some(banner) = &service.banner {
            writeln!(
                out,
                "          {} {}",
                style("banner:").dim(),
                style(truncate_string(banner, 60)).dim()
            )?;
        }
    }
    if let Some(note) = &result.note {
        writeln!(out, "          {} {}", style("note:").dim(), note)?;
    }

    Ok(())
}

fn confidence_style(confidence: Confidence) -> Style {
    match confidence {
        Confidence::High => Style::new().green(),
        Confidence::Medium => Style::new().cyan(),
        Confidence::Low => Style::new().dim(),
    }
}

/// Write the available port lists with their ports.
pub fn write_port_lists<W: Write>(
    mut out: W,
    lists: &BTreeMap<String, PortList>,
) -> io::Result<()> {
    writeln!(out, "{}", style("Available port lists:").bold())?;
    for (name, list) in lists {
        writeln!(out)?;
        writeln!(
            out,
            "  {} {}",
            style(name).cyan().bold(),
            style(format!("({} ports)", list.ports.len())).dim()
        )?;
        if !list.description.is_empty() {
            writeln!(out, "    {}", list.description)?;
        }
        let ports: Vec<String> = list
            .ports
            .iter()
            .map(|(port, service)| format!("{port} {service}"))
            .collect();
        writeln!(out, "    {}", style(ports.join(", ")).dim())?;
    }
    Ok(())
}

/// Write which detection components this build provides.
pub fn write_capabilities<W: Write>(mut out: W, capability: Capability) -> io::Result<()> {
    writeln!(out, "{}", style("Detection components:").bold())?;
    for (component, present) in capability.components() {
        let mark = if present {
            style("✓").green().bold()
        } else {
            style("✗").red().bold()
        };
        writeln!(out, "  {mark} {component}")?;
    }
    writeln!(
        out,
        "\n  {} {}",
        style("Best available tier:").bold(),
        capability.best_tier()
    )
}

/// Print the available port lists to stdout.
pub fn print_port_lists(lists: &BTreeMap<String, PortList>) -> io::Result<()> {
    write_port_lists(io::stdout().lock(), lists)
}

/// Print detection capabilities to stdout.
pub fn print_capabilities(capability: Capability) -> io::Result<()> {
    write_capabilities(io::stdout().lock(), capability)
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), msg);
}

/// Print a warning message.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), msg);
}

/// Truncate a string to at most `max_len` characters, adding ellipsis if truncated.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{builtin_port_lists, DetectionTier};
    use crate::scanner::ServiceInfo;
    use crate::types::Port;
    use std::time::Duration;

    fn render(reports: &[ScanReport]) -> String {
        let mut buf = Vec::new();
        write_plain(&mut buf, reports).unwrap();
        console::strip_ansi_codes(&String::from_utf8(buf).unwrap()).into_owned()
    }

    fn sample_report() -> ScanReport {
        let mut report = ScanReport::unresolved("web01", DetectionTier::Enhanced, "x");
        report.error = None;
        report.address = Some("192.168.1.20".parse().unwrap());
        report.results = vec![
            PortResult::closed(Port::new(22).unwrap(), Duration::from_millis(1)),
            PortResult::open(Port::new(8080).unwrap(), Duration::from_millis(9))
                .with_expected(Some("HTTP-Proxy".to_string()))
                .with_service(Some(
                    ServiceInfo::new("HTTP", Confidence::High, DetectionTier::Enhanced)
                        .with_version(Some("nginx/1.25".to_string()))
                        .with_detail("status", Some(200)),
                )),
            PortResult::not_scanned(Port::new(9000).unwrap()),
        ];
        report.interrupted = true;
        report
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("hello", 10), "hello");
        assert_eq!(truncate_string("hello world", 8), "hello...");
        assert_eq!(truncate_string("ééééééééé", 6), "ééé...");
    }

    #[test]
    fn test_plain_hides_closed_by_default() {
        let text = render(&[sample_report()]);
        assert!(text.contains("web01"));
        assert!(text.contains("8080"));
        assert!(text.contains("HTTP nginx/1.25"));
        assert!(text.contains("status: 200"));
        assert!(text.contains("not scanned"));
        assert!(text.contains("Interrupted:"));
        assert!(!text.lines().any(|l| l.trim_start().starts_with("22 ")));
    }

    #[test]
    fn test_plain_shows_closed_when_asked() {
        let mut report = sample_report();
        report.show_closed = true;
        let text = render(&[report]);
        assert!(text.lines().any(|l| l.trim_start().starts_with("22 ")));
    }

    #[test]
    fn test_plain_unresolved_target() {
        let report =
            ScanReport::unresolved("nowhere.invalid", DetectionTier::Basic, "no such host");
        let text = render(&[report]);
        assert!(text.contains("Unresolved: no such host"));
        assert!(!text.contains("Statistics:"));
    }

    #[test]
    fn test_port_lists_listing() {
        let mut buf = Vec::new();
        write_port_lists(&mut buf, &builtin_port_lists()).unwrap();
        let text = console::strip_ansi_codes(&String::from_utf8(buf).unwrap()).into_owned();
        assert!(text.contains("database"));
        assert!(text.contains("6379 Redis"));
    }

    #[test]
    fn test_capabilities_listing() {
        let mut buf = Vec::new();
        write_capabilities(&mut buf, Capability::basic_only()).unwrap();
        let text = console::strip_ansi_codes(&String::from_utf8(buf).unwrap()).into_owned();
        assert!(text.contains("Best available tier: basic"));
    }
}
