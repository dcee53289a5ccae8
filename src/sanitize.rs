//! Header sanitization for user-supplied metadata (§4.2). Applied to every
//! string before it becomes an object-store metadata header, to avoid
//! header injection and to conform to the transport's 7-bit constraint.

/// Runs the five mandatory steps in order:
/// 1. collapse CR/LF/TAB to a single space
/// 2. strip remaining control characters (and DEL)
/// 3. map common typographic code points to ASCII
/// 4. map any remaining non-ASCII code point to `-`
/// 5. collapse runs of whitespace and trim
///
/// CR/LF/TAB must be mapped to a space before control characters are
/// stripped -- they are themselves code points below 0x20, so stripping
/// first would delete them outright instead of preserving the word
/// boundary they mark.
pub fn sanitize_header_value(input: &str) -> String {
    let step1: String = input
        .chars()
        .map(|c| match c {
            '\r' | '\n' | '\t' => ' ',
            other => other,
        })
        .collect();

    let step2: String = step1
        .chars()
        .filter(|&c| (c as u32) >= 0x20 && c != '\u{7f}')
        .collect();

    let step3: String = step2
        .chars()
        .flat_map(|c| {
            let mapped: &str = match c {
                '\u{2013}' | '\u{2014}' => "-",  // en dash, em dash
                '\u{2018}' | '\u{2019}' => "'",  // curly single quotes
                '\u{201c}' | '\u{201d}' => "\"", // curly double quotes
                '\u{2026}' => "...",             // ellipsis
                _ => return vec![c],
            };
            mapped.chars().collect()
        })
        .collect();

    let step4: String = step3
        .chars()
        .map(|c| if c.is_ascii() { c } else { '-' })
        .collect();

    let collapsed = step4.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.trim().to_string()
}

/// Runs `sanitize_header_value` over every value in a metadata map,
/// preserving keys.
pub fn sanitize_headers(
    headers: std::collections::HashMap<String, String>,
) -> std::collections::HashMap<String, String> {
    headers
        .into_iter()
        .map(|(k, v)| (k, sanitize_header_value(&v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_control_characters() {
        let input = "hello\u{0001}world\u{007f}";
        assert_eq!(sanitize_header_value(input), "helloworld");
    }

    #[test]
    fn collapses_crlf_and_tab_to_space() {
        let input = "line1\r\nline2\tindented";
        assert_eq!(sanitize_header_value(input), "line1 line2 indented");
    }

    #[test]
    fn maps_typographic_code_points() {
        let input = "em\u{2014}dash and \u{2018}quoted\u{2019} and\u{2026}";
        assert_eq!(sanitize_header_value(input), "em-dash and 'quoted' and...");
    }

    #[test]
    fn maps_remaining_non_ascii_to_dash() {
        let input = "caf\u{00e9} na\u{00ef}ve";
        // stray non-ascii bytes map to '-'
        let sanitized = sanitize_header_value(input);
        assert!(sanitized.is_ascii());
    }

    #[test]
    fn collapses_whitespace_and_trims() {
        let input = "  too   many    spaces  ";
        assert_eq!(sanitize_header_value(input), "too many spaces");
    }

    #[test]
    fn result_is_always_seven_bit_ascii() {
        let input = "\u{0001}control\r\n\u{2014}\u{00e9}\u{2026}  spaced  ";
        let sanitized = sanitize_header_value(input);
        assert!(sanitized.chars().all(|c| c.is_ascii()));
    }
}
