//! Plain-text rendering for command output.

use sitesort_core::BatchSummary;
use sitesort_shared::{BatchId, ClassificationLabel, ClassificationResult};
use sitesort_storage::{DatabaseInfo, Statistics};

pub(crate) fn print_batch_summary(summary: &BatchSummary) {
    println!();
    println!("  {}", summary.message);
    println!("  Batch:     {}", summary.batch_id);
    println!("  Processed: {}", summary.total_processed);
    println!("  Succeeded: {}", summary.succeeded);
    println!("  Errors:    {}", summary.errors);
    println!("  Skipped:   {}", summary.skipped);
    if !summary.rejected.is_empty() {
        println!("  Rejected:  {}", summary.rejected.len());
        for entry in &summary.rejected {
            println!("    {:<40} {}", entry.domain, entry.reason);
        }
    }
    println!();

    for label in ClassificationLabel::ALL {
        let count = summary
            .results
            .iter()
            .filter(|r| r.classification_label == label)
            .count();
        if count > 0 {
            println!("  {:<10} {count}", label.as_str());
        }
    }
    println!();
}

pub(crate) fn print_results(results: &[ClassificationResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    println!(
        "{:<40} {:<10} {:>5}  {:<6} {}",
        "DOMAIN", "LABEL", "CONF", "METHOD", "SUMMARY"
    );
    for r in results {
        println!(
            "{:<40} {:<10} {:>5.2}  {:<6} {}",
            r.domain.as_str(),
            r.classification_label.as_str(),
            r.confidence_level,
            r.extraction_method.as_str(),
            truncate(&r.summary, 80)
        );
    }
}

pub(crate) fn print_statistics(stats: &Statistics, batch: Option<&BatchId>) {
    match batch {
        Some(id) => println!("Results in {id}: {}", stats.total),
        None => println!("Results: {}", stats.total),
    }
    for (label, count) in &stats.by_label {
        let share = if stats.total == 0 {
            0.0
        } else {
            *count as f64 / stats.total as f64 * 100.0
        };
        println!("  {label:<10} {count:>6}  {share:>5.1}%");
    }
}

pub(crate) fn print_batches(batches: &[sitesort_storage::BatchSummary]) {
    if batches.is_empty() {
        println!("No batches.");
        return;
    }

    println!(
        "{:<40} {:<10} {:<20} {:>9} {:>7} {:>6} {:>7}",
        "BATCH", "STATUS", "STARTED", "PROCESSED", "FAILED", "SKIP", "RESULTS"
    );
    for b in batches {
        let r = &b.record;
        println!(
            "{:<40} {:<10} {:<20} {:>9} {:>7} {:>6} {:>7}",
            r.batch_id.as_str(),
            r.status.as_str(),
            r.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            format!("{}/{}", r.processed, r.total_domains),
            r.failed,
            r.skipped,
            b.result_count
        );
    }
}

pub(crate) fn print_database_info(info: &DatabaseInfo) {
    println!("  Path:     {}", info.path.display());
    println!("  Size:     {}", format_bytes(info.size_bytes));
    println!("  Results:  {}", info.total_results);
    println!("  Batches:  {}", info.total_batches);
    println!("  Schema:   v{}", info.schema_version);
}

pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let cut: String = s.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}
