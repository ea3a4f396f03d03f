//! Human-readable event summaries, length-capped for the store.

/// The store rejects event summaries longer than this.
const EVENT_SUMMARY_MAX_LENGTH: usize = 1024;

const TRUNCATION_MARKER: &str = "...";

/// Summary for an attach event. When the document-number list would push
/// the summary past the cap, the list is cut and suffixed with `...`.
pub fn attach_event_summary(case_id: i64, exception_record_id: i64, dcns: &[String]) -> String {
    let prefix = format!(
        "Attaching exception record({exception_record_id}) to case:{case_id}, document numbers:"
    );

    let mut rendered = format!("[{}]", dcns.join(", "));
    let budget = EVENT_SUMMARY_MAX_LENGTH.saturating_sub(prefix.len());
    if rendered.len() > budget {
        rendered.truncate(budget.saturating_sub(TRUNCATION_MARKER.len()));
        rendered.push_str(TRUNCATION_MARKER);
    }

    format!("{prefix}{rendered}")
}
