//! Terminal styling for the report.

use console::Style;

use repomigrate_core::models::Outcome;
use repomigrate_core::report::ReportLine;

/// Prefix a report line with a coloured outcome marker.
pub fn report_line(entry: &ReportLine) -> String {
    let (style, marker) = match entry.outcome {
        Outcome::Done => (Style::new().green(), "✓"),
        Outcome::Failed => (Style::new().red(), "✗"),
        Outcome::Skipped => (Style::new().yellow(), "⚠"),
    };
    format!("{} {}", style.apply_to(marker), entry.text)
}

/// Create a header-styled string (bold).
pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

/// Create an error-styled string (red with cross).
pub fn error(msg: &str) -> String {
    format!("{} {}", Style::new().red().apply_to("✗"), msg)
}
