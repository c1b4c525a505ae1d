//! Run report export (JSON).

use super::report::RunReport;
use serde::Serialize;
use std::io;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct ReportManifest<'a> {
    #[serde(flatten)]
    pub report: &'a RunReport,
    pub exit_code: i32,
}

impl<'a> ReportManifest<'a> {
    pub fn new(report: &'a RunReport) -> Self {
        Self {
            report,
            exit_code: report.exit_code(),
        }
    }
}

pub fn write_manifest(path: &Path, report: &RunReport) -> io::Result<()> {
    let json = serde_json::to_string_pretty(&ReportManifest::new(report))
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, json)
}
