//! Verification reports: the per-record listing and the run summary.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;

use crate::error::{CustodyError, Result};
use crate::verification::{VerificationResult, VerificationSummary};

/// One exported row. Field names double as the CSV header.
#[derive(Debug, Serialize)]
struct ReportRow {
    #[serde(rename = "Record ID")]
    record_id: i64,
    #[serde(rename = "Status")]
    status: &'static str,
    #[serde(rename = "Reason")]
    reason: &'static str,
}

impl From<&VerificationResult> for ReportRow {
    fn from(result: &VerificationResult) -> Self {
        Self {
            record_id: result.record_id,
            status: result.status.as_str(),
            reason: result.reason_label(),
        }
    }
}

fn table_line(record_id: &str, status: &str, reason: &str) -> String {
    format!("{:<10} {:<8} {:<20}\n", record_id, status, reason)
}

/// Fixed-width listing, one row per record.
pub fn render_table(results: &[VerificationResult]) -> String {
    let mut out = table_line("Record ID", "Status", "Reason");
    out.push_str(&"-".repeat(40));
    out.push('\n');
    for result in results {
        out.push_str(&table_line(
            &result.record_id.to_string(),
            result.status.as_str(),
            result.reason_label(),
        ));
    }
    out
}

fn write_rows<W: Write>(writer: W, results: &[VerificationResult]) -> Result<W> {
    let mut csv = csv::Writer::from_writer(writer);
    for result in results {
        csv.serialize(ReportRow::from(result))?;
    }
    csv.into_inner()
        .map_err(|e| CustodyError::StorageError(format!("CSV flush failed: {}", e)))
}

pub fn render_csv(results: &[VerificationResult]) -> Result<String> {
    let bytes = write_rows(Vec::new(), results)?;
    String::from_utf8(bytes)
        .map_err(|e| CustodyError::StorageError(format!("CSV is not UTF-8: {}", e)))
}

pub fn render_summary(summary: &VerificationSummary) -> String {
    let mut out = format!(
        "Summary:\n  Total records: {}\n  Verified OK  : {}\n  Failed       : {}\n",
        summary.total(),
        summary.ok_count,
        summary.fail_count
    );
    for (reason, count) in &summary.fail_by_reason {
        out.push_str(&format!("    {:<20} {}\n", reason.as_str(), count));
    }
    out
}

pub fn write_csv(path: &Path, results: &[VerificationResult]) -> Result<()> {
    write_rows(fs::File::create(path)?, results)?.sync_all()?;
    Ok(())
}

pub fn write_txt(path: &Path, results: &[VerificationResult]) -> Result<()> {
    fs::write(path, render_table(results))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verification::{summarize, FailureReason};

    fn results() -> Vec<VerificationResult> {
        vec![
            VerificationResult::ok(1),
            VerificationResult::fail(2, FailureReason::DecryptionFailed),
        ]
    }

    #[test]
    fn test_table_rows() {
        let table = render_table(&results());
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("Record ID  Status"));
        assert_eq!(lines[2].trim_end(), "1          OK");
        assert_eq!(lines[3].trim_end(), "2          FAIL     decryption_failed");
    }

    #[test]
    fn test_csv_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("verify_summary.csv");
        write_csv(&path, &results()).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "Record ID,Status,Reason\n1,OK,\n2,FAIL,decryption_failed\n");
        assert_eq!(render_csv(&results()).unwrap(), text);
    }

    #[test]
    fn test_csv_export_reads_back() {
        let text = render_csv(&results()).unwrap();
        let mut reader = csv::Reader::from_reader(text.as_bytes());

        let headers: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(headers, ["Record ID", "Status", "Reason"]);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[1][2], "decryption_failed");
    }

    #[test]
    fn test_summary_lists_reasons() {
        let text = render_summary(&summarize(&results()));
        assert!(text.contains("Total records: 2"));
        assert!(text.contains("decryption_failed"));
    }
}
