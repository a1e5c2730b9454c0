use regex::Regex;
use std::sync::LazyLock;

/// The fixed module vocabulary. Every line is assigned one of these.
pub const MODULES: [&str; 6] = [
    "kernel",
    "network",
    "desktop-shell",
    "ipc-bus",
    "bluetooth",
    "wifi",
];

/// Process names that identify a module when they appear in a structured
/// field, prefix or bracket token
const ALIASES: [(&str, &[&str]); 6] = [
    ("kernel", &["kernel"]),
    ("network", &["network"]),
    ("desktop-shell", &["desktop-shell", "gnome-shell"]),
    ("ipc-bus", &["ipc-bus", "dbus"]),
    ("bluetooth", &["bluetooth"]),
    ("wifi", &["wifi"]),
];

/// Synonyms searched across the whole (lowercased) line, in priority order
const SYNONYMS: [(&str, &[&str]); 6] = [
    ("kernel", &["kernel", "syslogd"]),
    ("network", &["network", "eth", "tcp", "ip ", "dhcp", "interface"]),
    ("desktop-shell", &["gnome", "gnome-shell", "desktop"]),
    ("ipc-bus", &["dbus", "dbus-daemon", "message bus"]),
    ("bluetooth", &["bluetooth", "bt ", "btusb"]),
    ("wifi", &["wifi", "wlan", "wireless", "wpa"]),
];

/// Hardware words that send an otherwise unclassified line to the kernel
const HARDWARE_KEYWORDS: [&str; 5] = ["usb", "pci", "memory", "cpu", "device"];

static STRUCTURED_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)"module":\s*"([^"]+)""#).unwrap());
static NAME_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([A-Za-z0-9_-]+):").unwrap());
static BRACKET_TOKEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\[([^\]]+)\]").unwrap());

/// Map a free-form module name onto the vocabulary, if it names one
pub fn normalize_module(candidate: &str) -> Option<&'static str> {
    let candidate = candidate.to_lowercase();
    ALIASES
        .iter()
        .find(|(_, aliases)| aliases.iter().any(|a| candidate.contains(a)))
        .map(|(module, _)| *module)
}

/// Assign a module to a log line. Pure: the same line always gets the same
/// module, and there is no "unknown" result.
pub fn classify_module(line: &str) -> &'static str {
    let candidates = [&*STRUCTURED_FIELD, &*NAME_PREFIX, &*BRACKET_TOKEN];
    for re in candidates {
        if let Some(module) = re
            .captures(line)
            .and_then(|c| c.get(1))
            .and_then(|m| normalize_module(m.as_str()))
        {
            return module;
        }
    }

    let lower = line.to_lowercase();
    if let Some((module, _)) = SYNONYMS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
    {
        return *module;
    }

    if HARDWARE_KEYWORDS.iter().any(|w| lower.contains(w)) {
        return "kernel";
    }

    let hash = lower
        .chars()
        .fold(0u64, |acc, c| acc.wrapping_add(c as u64));
    MODULES[(hash % MODULES.len() as u64) as usize]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_field_wins() {
        let line = r#"wifi: {"module": "Bluetooth-HCI", "msg": "error"}"#;
        assert_eq!(classify_module(line), "bluetooth");
    }

    #[test]
    fn test_prefix_then_bracket() {
        assert_eq!(classify_module("bluetooth: Failed to pair device"), "bluetooth");
        assert_eq!(classify_module("Jan 1 10:00:00 host [gnome-shell] error"), "desktop-shell");
        assert_eq!(classify_module("dbus-daemon: fail"), "ipc-bus");
    }

    #[test]
    fn test_unmatched_prefix_falls_through() {
        // "systemd" is not in the vocabulary, so the synonym scan decides
        assert_eq!(classify_module("systemd: dhcp lease failed"), "network");
    }

    #[test]
    fn test_synonym_scan() {
        assert_eq!(classify_module("Jan 1 wpa_supplicant failure"), "wifi");
        assert_eq!(classify_module("the message bus reported an error"), "ipc-bus");
    }

    #[test]
    fn test_hardware_defaults_to_kernel() {
        assert_eq!(classify_module("usb 1-1: Failed to suspend"), "kernel");
        assert_eq!(classify_module("out of memory: killed process"), "kernel");
    }

    #[test]
    fn test_hash_fallback_is_deterministic() {
        let line = "zzz qqq failure";
        let first = classify_module(line);
        assert!(MODULES.contains(&first));
        for _ in 0..10 {
            assert_eq!(classify_module(line), first);
        }
        assert_eq!(classify_module(""), "kernel");
    }

    #[test]
    fn test_normalize_module() {
        assert_eq!(normalize_module("NetworkManager"), Some("network"));
        assert_eq!(normalize_module("gnome-shell"), Some("desktop-shell"));
        assert_eq!(normalize_module("systemd"), None);
    }
}
