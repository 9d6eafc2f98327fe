//! "relaxed" header and body canonicalization (RFC 6376 §3.4.2, §3.4.4).

/// Collapse every run of spaces and tabs into a single space.
fn collapse_whitespace(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut in_space = false;
    for c in input.chars() {
        if c == ' ' || c == '\t' {
            if !in_space {
                out.push(' ');
            }
            in_space = true;
        } else {
            out.push(c);
            in_space = false;
        }
    }
    out
}

/// Canonicalize one header field, without the trailing CRLF.
///
/// The name is lowercased, continuation lines are unfolded, whitespace runs
/// in the value become one space and the value is trimmed.
pub fn relaxed_header(name: &str, value: &str) -> String {
    let unfolded: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    let value = collapse_whitespace(&unfolded);
    format!(
        "{}:{}",
        name.trim().to_ascii_lowercase(),
        value.trim_matches(|c| c == ' ' || c == '\t')
    )
}

/// Canonicalize a message body.
///
/// Line endings become CRLF, whitespace runs inside a line become one space,
/// trailing whitespace on each line is dropped and trailing empty lines are
/// removed. A non-empty result always ends in exactly one CRLF; an empty body
/// stays empty.
pub fn relaxed_body(body: &str) -> String {
    let mut lines: Vec<String> = body
        .split('\n')
        .map(|line| {
            let line = line.strip_suffix('\r').unwrap_or(line);
            collapse_whitespace(line).trim_end_matches(' ').to_string()
        })
        .collect();

    while lines.last().is_some_and(String::is_empty) {
        lines.pop();
    }

    let mut out = String::with_capacity(body.len() + lines.len());
    for line in lines {
        out.push_str(&line);
        out.push_str("\r\n");
    }
    out
}
