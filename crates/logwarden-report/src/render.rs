use chrono::{DateTime, Local, Utc};

use logwarden_types::Frequency;

use crate::report::Report;

const STYLE: &str = r#"
    body { font-family: Arial, sans-serif; line-height: 1.6; color: #333; max-width: 900px; margin: 0 auto; padding: 20px; }
    h1, h2, h3 { color: #2563eb; }
    .header { background-color: #f3f4f6; padding: 15px; border-radius: 5px; margin-bottom: 20px; border-left: 5px solid #3b82f6; }
    .module { margin-bottom: 30px; padding: 15px; background-color: #f9fafb; border-radius: 5px; }
    .module-header { display: flex; justify-content: space-between; align-items: center; border-bottom: 1px solid #e5e7eb; padding-bottom: 10px; margin-bottom: 15px; }
    .module-count { background-color: #dbeafe; color: #1e40af; padding: 5px 10px; border-radius: 20px; font-size: 14px; }
    .log-entry { background-color: #fff; border-left: 3px solid #ef4444; padding: 10px; margin-bottom: 10px; font-family: monospace; white-space: pre-wrap; word-break: break-word; font-size: 13px; }
    .timestamp { color: #6b7280; font-size: 12px; }
    .empty-state { text-align: center; padding: 40px 20px; background-color: #f9fafb; border-radius: 8px; margin: 30px 0; }
    .summary { margin-top: 30px; padding: 15px; background-color: #ecfdf5; border-radius: 5px; }
    .date-range { font-size: 14px; color: #4b5563; margin-top: 5px; }
"#;

/// Mail subject for a scheduled report
pub fn subject(frequency: Frequency, now: &DateTime<Local>) -> String {
    format!(
        "Scheduled Error Report ({}) - {}",
        frequency,
        now.format("%Y-%m-%d")
    )
}

/// Human description of the period a report covers
pub fn period_description(report: &Report) -> String {
    let start = report.window.start.with_timezone(&Local);
    let end = report.window.end.with_timezone(&Local);
    match report.frequency {
        Frequency::Hourly => format!(
            "Report covers the past hour ({} - {})",
            start.format("%b %e, %Y %H:%M"),
            end.format("%b %e, %Y %H:%M")
        ),
        Frequency::Daily => format!("Report covers today ({})", start.format("%b %e, %Y")),
        Frequency::Weekly => format!(
            "Report covers this week ({} - {})",
            start.format("%b %e"),
            end.format("%b %e, %Y")
        ),
        Frequency::Monthly => format!("Report covers this month ({})", start.format("%b %Y")),
    }
}

/// Render a report as a standalone HTML document
pub fn render_html(report: &Report, generated_at: DateTime<Utc>) -> String {
    let period = escape(&period_description(report));
    let mut html = String::with_capacity(4096);

    html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<style>");
    html.push_str(STYLE);
    html.push_str("</style>\n</head>\n<body>\n");
    html.push_str(&format!(
        "<div class=\"header\">\n<h1>System Error Log Report</h1>\n<p>Generated on {}</p>\n<p class=\"date-range\">{}</p>\n</div>\n",
        generated_at.with_timezone(&Local).format("%A, %B %e, %Y"),
        period
    ));

    if report.is_empty() {
        html.push_str(
            "<div class=\"empty-state\">\n<h2>No Error Logs Found</h2>\n\
             <p>There are no error logs for the selected period.</p>\n</div>\n",
        );
    } else {
        html.push_str(
            "<p>This report contains the most recent system error logs grouped by module.</p>\n\
             <h2>Error Logs by Module</h2>\n",
        );
        for section in &report.modules {
            html.push_str(&format!(
                "<div class=\"module\">\n<div class=\"module-header\">\n<h3>{}</h3>\n\
                 <span class=\"module-count\">{} errors</span>\n</div>\n\
                 <p>Recent error logs ({} of {}):</p>\n",
                escape(&section.module),
                section.count,
                section.samples.len(),
                section.count
            ));
            for record in &section.samples {
                html.push_str(&format!(
                    "<div class=\"log-entry\">\n<div class=\"timestamp\">{}</div>\n{}\n</div>\n",
                    record.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
                    escape(&record.log_message)
                ));
            }
            html.push_str("</div>\n");
        }
    }

    html.push_str(&format!(
        "<div class=\"summary\">\n<h2>Summary</h2>\n\
         <p><strong>Total Errors:</strong> {}</p>\n\
         <p><strong>Modules Affected:</strong> {}</p>\n\
         <p><strong>Report Period:</strong> {}</p>\n</div>\n",
        report.total(),
        report.modules.len(),
        period
    ));
    html.push_str("</body>\n</html>\n");
    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
