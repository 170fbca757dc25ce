//! Human-readable rendering of events and reports.

use deficiency_core::{AnalysisEvent, Classification, DeficiencyItem, DeficiencyReport};

const RATIONALE_WIDTH: usize = 96;

// ── Events ──

/// One line per event, for stderr progress output.
pub fn event_line(event: &AnalysisEvent) -> Option<String> {
    match event {
        AnalysisEvent::AnalysisStarted {
            session_id,
            production_id,
            total_requests,
        } => Some(format!(
            "  Started {session_id} on {production_id}: {total_requests} requests"
        )),
        // Stage changes are too chatty for the terminal; logs carry them.
        AnalysisEvent::ItemProgress { .. } => None,
        AnalysisEvent::ItemAnalyzed {
            request_number,
            classification,
            confidence,
            progress,
            ..
        } => Some(format!(
            "  [{progress}] Request {request_number}: {classification} ({confidence:.2})"
        )),
        AnalysisEvent::ItemError {
            request_number,
            error_kind,
            ..
        } => Some(format!(
            "  Request {request_number}: error ({})",
            error_kind.as_str()
        )),
        AnalysisEvent::AnalysisCompleted { report_id, .. } => {
            Some(format!("  Completed, report {report_id}"))
        }
        AnalysisEvent::AnalysisCancelled { report_id, .. } => {
            Some(format!("  Cancelled, partial report {report_id}"))
        }
        AnalysisEvent::AnalysisFailed { reason, .. } => Some(format!("  Failed: {reason}")),
    }
}

// ── Reports ──

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let cut: String = text.chars().take(width.saturating_sub(3)).collect();
    format!("{cut}...")
}

fn marker(item: &DeficiencyItem) -> &'static str {
    if item.requires_attention() {
        "!"
    } else if item.effective_classification().is_deficient() {
        "*"
    } else {
        " "
    }
}

/// Print a report as a summary block followed by one row per request.
///
/// `!` marks items needing human attention, `*` marks deficiencies.
pub fn print_report(report: &DeficiencyReport) {
    println!("=== {} ===", report.report_id);
    println!(
        "{} / {} / generated {}",
        report.production_id,
        report.status.as_str(),
        report.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    println!();

    println!("Summary");
    let stats = &report.summary_statistics;
    for classification in Classification::ALL {
        println!(
            "  {:<26} {}",
            classification.as_str(),
            stats.count(classification)
        );
    }
    if stats.errored > 0 {
        println!("  {:<26} {}", "(of which errored)", stats.errored);
    }
    println!("  {:<26} {}", "total", report.total_requests);
    println!();

    println!("Requests");
    for item in &report.items {
        let result = &item.result;
        let classification = item.effective_classification();
        let revised = if item.revisions.is_empty() { "" } else { " (revised)" };
        println!(
            "{} {:<8} {:<20} {:>4.2}{}",
            marker(item),
            item.request.number,
            classification.as_str(),
            result.confidence(),
            revised
        );
        println!("           {}", truncate(result.rationale(), RATIONALE_WIDTH));
        for chunk in result.evidence() {
            let page = chunk
                .page_number
                .map(|p| format!(" p.{p}"))
                .unwrap_or_default();
            println!(
                "           - {}{} ({:.2})",
                chunk.evidence_id(),
                page,
                chunk.relevance_score
            );
        }
        if let Some(revision) = item.revisions.last() {
            println!(
                "           reviewer {}: {}",
                revision.modified_by,
                truncate(&revision.reviewer_notes, RATIONALE_WIDTH)
            );
        }
    }
}
