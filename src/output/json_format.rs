//! JSON output formatting.

use crate::scanner::ScanReport;
use std::io::{self, Write};

/// Write reports as a pretty-printed JSON array, one element per target.
///
/// Every port is included regardless of `show_closed`; consumers filter on
/// `state` themselves.
pub fn write_json<W: Write>(mut out: W, reports: &[ScanReport]) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut out, reports).map_err(io::Error::other)?;
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionTier;

    #[test]
    fn test_json_is_array_of_reports() {
        let report =
            ScanReport::unresolved("nowhere.invalid", DetectionTier::Basic, "no such host");
        let mut buf = Vec::new();
        write_json(&mut buf, &[report]).unwrap();

        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value[0]["target"], "nowhere.invalid");
        assert_eq!(value[0]["error"], "no such host");
        assert_eq!(value[0]["tier"], "basic");
    }
}
