//! CSV output formatting.

use crate::scanner::ScanReport;
use std::io::{self, Write};

const HEADER: [&str; 12] = [
    "target",
    "address",
    "port",
    "state",
    "expected",
    "service",
    "version",
    "confidence",
    "method",
    "banner",
    "probe_duration_ms",
    "note",
];

/// Write one row per visible port across all reports.
pub fn write_csv<W: Write>(out: W, reports: &[ScanReport]) -> io::Result<()> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(HEADER)?;

    for report in reports {
        let address = report.address.map(|a| a.to_string()).unwrap_or_default();
        for result in report.visible() {
            let service = result.service.as_ref();
            wtr.write_record([
                report.target.as_str(),
                &address,
                &result.port.to_string(),
                &result.state.to_string(),
                result.expected.as_deref().unwrap_or(""),
                service.map_or("", |s| s.name.as_str()),
                service.and_then(|s| s.version.as_deref()).unwrap_or(""),
                &service.map(|s| s.confidence.to_string()).unwrap_or_default(),
                &service.map(|s| s.method.to_string()).unwrap_or_default(),
                service.and_then(|s| s.banner.as_deref()).unwrap_or(""),
                &result.probe_duration.as_millis().to_string(),
                result.note.as_deref().unwrap_or(""),
            ])?;
        }
    }

    wtr.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionTier;
    use crate::scanner::{Confidence, PortResult, ServiceInfo};
    use crate::types::Port;
    use std::time::Duration;

    #[test]
    fn test_csv_rows_follow_visibility() {
        let mut report = ScanReport::unresolved("db01", DetectionTier::Enhanced, "x");
        report.error = None;
        report.address = Some("10.0.0.7".parse().unwrap());
        report.results = vec![
            PortResult::closed(Port::new(22).unwrap(), Duration::from_millis(1)),
            PortResult::open(Port::new(6379).unwrap(), Duration::from_millis(4))
                .with_expected(Some("Redis".to_string()))
                .with_service(Some(
                    ServiceInfo::new("Redis", Confidence::Medium, DetectionTier::Enhanced)
                        .with_version(Some("7.2.4".to_string())),
                )),
        ];

        let mut buf = Vec::new();
        write_csv(&mut buf, &[report]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("target,address,port,state"));
        assert_eq!(lines[1], "db01,10.0.0.7,6379,open,Redis,Redis,7.2.4,medium,enhanced,,4,");
    }
}
