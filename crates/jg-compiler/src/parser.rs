/// Parse a newline-delimited pattern list.
///
/// One pattern per line. Blank lines and lines starting with `#` or `!` are
/// ignored, trailing `# comments` are stripped, and patterns are lowercased.
/// Alphabet validation is left to the builder so malformed entries are
/// reported in one place.
pub fn parse_pattern_list(text: &str) -> Vec<String> {
    let mut patterns = Vec::new();

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || is_comment_line(line) {
            continue;
        }

        let line = strip_inline_comment(line);
        if line.is_empty() {
            continue;
        }

        patterns.push(line.to_ascii_lowercase());
    }

    patterns
}

fn is_comment_line(line: &str) -> bool {
    line.starts_with('#') || line.starts_with('!')
}

fn strip_inline_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => line[..idx].trim_end(),
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_blank_and_comment_lines() {
        let text = "# header\n\n! also a comment\nABCDEF\n   \n0123  \n";
        assert_eq!(parse_pattern_list(text), vec!["abcdef", "0123"]);
    }

    #[test]
    fn strips_inline_comments() {
        let text = "deadbeef # known C2\nfeed#x\n";
        assert_eq!(parse_pattern_list(text), vec!["deadbeef", "feed"]);
    }

    #[test]
    fn keeps_malformed_entries_for_the_builder() {
        let text = "abc!1234\n";
        assert_eq!(parse_pattern_list(text), vec!["abc!1234"]);
    }

    #[test]
    fn handles_crlf_line_endings() {
        let text = "aaaa\r\nbbbb\r\n";
        assert_eq!(parse_pattern_list(text), vec!["aaaa", "bbbb"]);
    }
}
