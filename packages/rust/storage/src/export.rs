//! CSV export of classification results.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use tracing::info;

use sitesort_shared::{ClassificationResult, Result, SitesortError};

use crate::{ResultFilter, Storage};

/// Header row of exported files.
pub const CSV_COLUMNS: [&str; 8] = [
    "domain",
    "classification_label",
    "summary",
    "confidence_level",
    "snippet",
    "extraction_method",
    "processed_at",
    "batch_id",
];

/// Write `results` as CSV, header first. Returns the number of data rows.
pub fn write_results_csv<W: Write>(results: &[ClassificationResult], writer: W) -> Result<usize> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(CSV_COLUMNS).map_err(csv_error)?;

    for r in results {
        let confidence = r.confidence_level.to_string();
        let processed_at = r.processed_at.to_rfc3339();
        csv.write_record([
            r.domain.as_str(),
            r.classification_label.as_str(),
            r.summary.as_str(),
            confidence.as_str(),
            r.snippet.as_str(),
            r.extraction_method.as_str(),
            processed_at.as_str(),
            r.batch_id.as_str(),
        ])
        .map_err(csv_error)?;
    }

    csv.flush()
        .map_err(|e| SitesortError::Storage(format!("CSV write failed: {e}")))?;
    Ok(results.len())
}

/// Write `results` to a new CSV file at `path`, replacing any existing file.
pub fn export_results_csv(results: &[ClassificationResult], path: &Path) -> Result<usize> {
    let file = File::create(path).map_err(|e| SitesortError::io(path, e))?;
    let rows = write_results_csv(results, file)?;
    info!(path = %path.display(), rows, "exported results");
    Ok(rows)
}

fn csv_error(e: csv::Error) -> SitesortError {
    SitesortError::Storage(format!("CSV write failed: {e}"))
}

impl Storage {
    /// Export the results matching `filter` to a CSV file.
    pub async fn export_csv(&self, filter: &ResultFilter, path: &Path) -> Result<usize> {
        let results = self.get_results(filter).await?;
        export_results_csv(&results, path)
    }
}
