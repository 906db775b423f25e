//! Log-safe rendering of untrusted mesh data.
//!
//! Node names, topics and payload bytes all come straight off the radio network;
//! these helpers keep each log record on a single line and bounded in size.

const MAX_PREVIEW_CHARS: usize = 120;

/// Escape a string for single-line logging.
///
/// Newlines, carriage returns, tabs and other control characters are rendered
/// as escapes; output is capped at a fixed preview length with an ellipsis.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW_CHARS) + 4);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW_CHARS {
            out.push('…');
            break;
        }
        match ch {
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => out.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Hex preview of the first `max` bytes of a buffer.
pub fn hex_preview(data: &[u8], max: usize) -> String {
    let mut out: String = data
        .iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect();
    if data.len() > max {
        out.push_str("..");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_characters_are_escaped() {
        assert_eq!(escape_log("a\nb\tc\\"), "a\\nb\\tc\\\\");
        assert_eq!(escape_log("bell\u{7}"), "bell\\u{7}");
    }

    #[test]
    fn long_names_are_capped() {
        let long = "x".repeat(500);
        let escaped = escape_log(&long);
        assert_eq!(escaped.chars().count(), MAX_PREVIEW_CHARS + 1);
        assert!(escaped.ends_with('…'));
    }

    #[test]
    fn hex_preview_marks_truncation() {
        assert_eq!(hex_preview(&[0xde, 0xad, 0xbe, 0xef], 2), "dead..");
        assert_eq!(hex_preview(&[0x01], 8), "01");
    }
}
