//! Small parsing helpers shared by the probes

use std::collections::BTreeMap;

const MB: u64 = 1024 * 1024;

pub(crate) fn kb_to_mb(kb: u64) -> u64 {
    kb / 1024
}

pub(crate) fn bytes_to_mb(bytes: u64) -> u64 {
    bytes / MB
}

pub(crate) fn pages_to_mb(pages: u64, page_size: u64) -> u64 {
    pages.saturating_mul(page_size) / MB
}

/// `key<sep>value` lines into a map; keys and values trimmed, surrounding
/// quotes stripped from values. Later duplicates win.
pub(crate) fn key_values(content: &str, sep: char) -> BTreeMap<String, String> {
    content
        .lines()
        .filter_map(|line| line.split_once(sep))
        .map(|(k, v)| {
            (
                k.trim().to_string(),
                v.trim().trim_matches('"').trim_matches('\'').to_string(),
            )
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Leading unsigned integer of a string, ignoring leading whitespace.
pub(crate) fn leading_u64(value: &str) -> Option<u64> {
    let digits: String = value
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Word following `key` in a whitespace-separated line.
pub(crate) fn word_after<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let mut words = line.split_whitespace();
    while let Some(word) = words.next() {
        if word == key {
            return words.next();
        }
    }
    None
}

/// Human readable size the way the legacy facts rendered block devices.
pub(crate) fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["bytes", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} bytes")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

/// Zero-pads MAC octets (`0:c:29:a:b:c` → `00:0c:29:0a:0b:0c`) and lowercases.
pub(crate) fn normalize_mac(mac: &str) -> String {
    mac.split(':')
        .map(|octet| format!("{:0>2}", octet.to_lowercase()))
        .collect::<Vec<_>>()
        .join(":")
}

/// Major part of a dotted version.
pub(crate) fn major_version(version: &str) -> Option<String> {
    let major: String = version
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!major.is_empty()).then_some(major)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_conversions_floor() {
        assert_eq!(kb_to_mb(1_048_576), 1024);
        assert_eq!(kb_to_mb(2047), 1);
        assert_eq!(bytes_to_mb(1_572_864), 1);
        assert_eq!(pages_to_mb(262_144, 4096), 1024);
    }

    #[test]
    fn test_key_values_strips_quotes() {
        let map = key_values("ID=\"centos\"\nVERSION_ID='7'\n\nbad line\n", '=');
        assert_eq!(map.get("ID").map(String::as_str), Some("centos"));
        assert_eq!(map.get("VERSION_ID").map(String::as_str), Some("7"));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_normalize_mac_pads_octets() {
        assert_eq!(normalize_mac("0:C:29:a:b:c"), "00:0c:29:0a:0b:0c");
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(512), "512 bytes");
        assert_eq!(human_size(10 * 1024 * 1024 * 1024), "10.00 GB");
    }

    #[test]
    fn test_helpers() {
        assert_eq!(leading_u64("  1500 bytes"), Some(1500));
        assert_eq!(word_after("a mtu 9000 b", "mtu"), Some("9000"));
        assert_eq!(major_version("22.04"), Some("22".to_string()));
    }
}
