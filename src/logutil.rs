//! Logging utilities for keeping radio payloads on a single log line.
//! Telemetry frames usually end in `\r\n` and may carry binary noise.

use std::fmt::Write;

/// Longest payload preview written to the log.
const MAX_PREVIEW: usize = 120;

/// Escape a string for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Long strings are cut at `MAX_PREVIEW` characters with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex dump of the first `max` bytes.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = String::with_capacity(max.min(data.len()) * 2 + 1);
    for b in data.iter().take(max) {
        let _ = write!(&mut out, "{:02x}", b);
    }
    if data.len() > max {
        out.push('…');
    }
    out
}

/// Escaped text for UTF-8 payloads, hex otherwise.
pub fn payload_preview(data: &[u8]) -> String {
    match std::str::from_utf8(data) {
        Ok(text) => escape_log(text),
        Err(_) => format!("0x{}", hex_snippet(data, MAX_PREVIEW / 2)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_line_endings() {
        assert_eq!(escape_log("21,40,900\r\n"), "21,40,900\\r\\n");
    }

    #[test]
    fn truncates_long_frames() {
        let long = "9,".repeat(200);
        let esc = escape_log(&long);
        assert!(esc.ends_with('…'));
        assert_eq!(esc.chars().count(), MAX_PREVIEW + 1);
    }

    #[test]
    fn binary_payloads_preview_as_hex() {
        assert_eq!(payload_preview(&[0xff, 0x00, 0x10]), "0xff0010");
        assert_eq!(payload_preview(b"1,2"), "1,2");
        assert_eq!(hex_snippet(&[1, 2, 3], 2), "0102…");
    }
}
