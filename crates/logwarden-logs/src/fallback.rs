use chrono::Utc;
use regex::Regex;
use std::sync::LazyLock;

use logwarden_types::{Breakdown, LlmAnalysis};

use crate::classify::classify_module;

static TIMESTAMP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}(?:[.,]\d+)?|\b(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\b",
    )
    .unwrap()
});
static TIMEZONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\d{2}:\d{2}:\d{2}(?:[.,]\d+)?\s?(Z|[+-]\d{2}:?\d{2})\b|\b(UTC|GMT)\b").unwrap()
});
// PCI address (optionally with domain), USB vendor:product, or MAC
static DEVICE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:[0-9a-fA-F]{4}:)?[0-9a-fA-F]{2}:[0-9a-fA-F]{2}\.[0-9a-fA-F]\b|\b[0-9a-fA-F]{4}:[0-9a-fA-F]{4}\b|\b(?:[0-9a-fA-F]{2}:){5}[0-9a-fA-F]{2}\b",
    )
    .unwrap()
});

const NOT_AVAILABLE: &str = "N/A";

/// Per-module cause and remediation used when no LLM analysis is available
const MODULE_HINTS: [(&str, &str, &[&str]); 6] = [
    (
        "kernel",
        "a kernel subsystem or driver reported a fault",
        &[
            "Inspect `dmesg` around the reported time for related driver messages",
            "Check for pending kernel or firmware updates",
            "Reboot if the affected device stays unusable",
        ],
    ),
    (
        "network",
        "a network interface or service could not complete an operation",
        &[
            "Check link state with `ip link` and `ip addr`",
            "Verify DHCP and DNS configuration",
            "Restart the network service if the interface is stuck",
        ],
    ),
    (
        "desktop-shell",
        "the desktop shell or one of its extensions hit an error",
        &[
            "Disable recently installed shell extensions",
            "Check the user journal for the shell process",
            "Restart the session if the shell is unresponsive",
        ],
    ),
    (
        "ipc-bus",
        "a message bus client or service failed to communicate",
        &[
            "Check that the service named in the message is running",
            "Review the bus policy configuration for denied calls",
        ],
    ),
    (
        "bluetooth",
        "the Bluetooth stack could not complete an operation with a device",
        &[
            "Remove and re-pair the device",
            "Restart the Bluetooth service",
            "Check that the adapter firmware is loaded",
        ],
    ),
    (
        "wifi",
        "the wireless interface lost or failed to establish a connection",
        &[
            "Check signal strength and access point availability",
            "Verify the stored credentials for the network",
            "Reload the wireless driver if the interface disappeared",
        ],
    ),
];

/// Deterministic, local analysis used when the LLM is unavailable
pub struct FallbackAnalyzer;

impl FallbackAnalyzer {
    /// Analyse a raw log line. Always returns every field, whatever the input.
    pub fn analyze(raw: &str) -> LlmAnalysis {
        let module = classify_module(raw);
        let (timestamp, without_timestamp) = Self::extract_timestamp(raw);

        let breakdown = Breakdown {
            timestamp: timestamp.unwrap_or_else(|| Utc::now().to_rfc3339()),
            timezone: Self::extract_timezone(raw).unwrap_or_else(|| "UTC".to_string()),
            module: module.to_string(),
            device: Self::extract_device(&without_timestamp)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            error_message: Self::extract_error_message(raw),
        };

        let (cause, steps) = MODULE_HINTS
            .iter()
            .find(|(m, _, _)| *m == module)
            .map(|(_, cause, steps)| (*cause, *steps))
            .unwrap_or(("an unclassified component reported an error", &[]));

        LlmAnalysis {
            breakdown,
            possible_cause: format!("Heuristic analysis (AI analysis unavailable): {}.", cause),
            actionable_steps: steps.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Find the first timestamp and return it with the line minus that span,
    /// so the time is not mistaken for a device address
    fn extract_timestamp(raw: &str) -> (Option<String>, String) {
        match TIMESTAMP.find(raw) {
            Some(m) => {
                let mut rest = String::with_capacity(raw.len());
                rest.push_str(&raw[..m.start()]);
                rest.push(' ');
                rest.push_str(&raw[m.end()..]);
                (Some(m.as_str().to_string()), rest)
            }
            None => (None, raw.to_string()),
        }
    }

    fn extract_timezone(raw: &str) -> Option<String> {
        let caps = TIMEZONE.captures(raw)?;
        let zone = caps.get(1).or_else(|| caps.get(2))?.as_str();
        Some(if zone == "Z" { "UTC".to_string() } else { zone.to_string() })
    }

    fn extract_device(text: &str) -> Option<String> {
        DEVICE.find(text).map(|m| m.as_str().to_string())
    }

    /// Text after `error:` or `ERROR`, else from `failed` onwards, else the
    /// whole line
    fn extract_error_message(raw: &str) -> String {
        let line = raw.trim();

        let candidates = [
            find_ignore_case(line, "error:").map(|idx| &line[idx + "error:".len()..]),
            line.find("ERROR")
                .map(|idx| line[idx + "ERROR".len()..].trim_start().trim_start_matches(':')),
            find_ignore_case(line, "failed").map(|idx| &line[idx..]),
        ];

        candidates
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if line.is_empty() {
                    "No error message found".to_string()
                } else {
                    line.to_string()
                }
            })
    }
}

/// Byte offset of an ASCII needle in `haystack`, ignoring ASCII case
fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    let needle = needle.as_bytes();
    haystack
        .as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle))
}
