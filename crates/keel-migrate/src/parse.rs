//! Quote-aware helpers for reading SQL text back from catalogs and
//! migration files.

/// Tracks whether the scanner is inside a quoted literal or identifier.
#[derive(Debug, Default)]
struct QuoteState {
    quote: Option<char>,
}

impl QuoteState {
    /// Feeds one character. Returns true if it is outside any quote and
    /// is not itself a quote character.
    fn feed(&mut self, c: char) -> bool {
        match self.quote {
            Some(quote) => {
                if c == quote {
                    self.quote = None;
                }
                false
            }
            None if matches!(c, '\'' | '"' | '`') => {
                self.quote = Some(c);
                false
            }
            None => true,
        }
    }
}

/// Splits `text` on `separator` at parenthesis depth zero, outside
/// quotes. Parts are trimmed; empty parts are dropped.
pub fn split_top_level(text: &str, separator: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut state = QuoteState::default();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if !state.feed(c) {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            c if c == separator && depth == 0 => {
                parts.push(text[start..i].trim());
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(text[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

/// Byte offset of the last `pattern` at parenthesis depth zero, outside
/// quotes.
pub fn rfind_top_level(text: &str, pattern: &str) -> Option<usize> {
    let mut state = QuoteState::default();
    let mut depth = 0usize;
    let mut found = None;
    for (i, c) in text.char_indices() {
        if !state.feed(c) {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth == 0 && text[i..].starts_with(pattern) => found = Some(i),
            _ => {}
        }
    }
    found
}

/// Returns the text between the parenthesis at byte `open` and its
/// matching close, plus the byte offset just past the close.
pub fn parenthesized(text: &str, open: usize) -> Option<(&str, usize)> {
    if !text.get(open..)?.starts_with('(') {
        return None;
    }
    let mut state = QuoteState::default();
    let mut depth = 0usize;
    for (i, c) in text[open..].char_indices() {
        if !state.feed(c) {
            continue;
        }
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((&text[open + 1..open + i], open + i + 1));
                }
            }
            _ => {}
        }
    }
    None
}

/// Extracts every single-quoted literal, unescaping doubled quotes.
pub fn string_literals(text: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\'' {
            continue;
        }
        let mut value = String::new();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    value.push('\'');
                } else {
                    break;
                }
            } else {
                value.push(c);
            }
        }
        values.push(value);
    }
    values
}

/// Removes identifier quoting (`"x"`, `` `x` ``, `[x]`).
pub fn unquote_identifier(text: &str) -> String {
    let text = text.trim();
    for (open, close) in [('"', '"'), ('`', '`'), ('[', ']')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            let inner = &text[1..text.len() - 1];
            return if open == close {
                inner.replace(&format!("{open}{open}"), &open.to_string())
            } else {
                inner.to_string()
            };
        }
    }
    text.to_string()
}

/// Splits a leading (possibly quoted) identifier from the rest of a
/// definition.
pub fn leading_identifier(text: &str) -> (String, &str) {
    let text = text.trim_start();
    let end = match text.chars().next() {
        Some(quote @ ('"' | '`')) => {
            let mut state = QuoteState::default();
            let mut end = text.len();
            for (i, c) in text.char_indices() {
                state.feed(c);
                if i > 0 && c == quote && state.quote.is_none() {
                    let doubled = text[i + 1..].starts_with(quote);
                    if !doubled {
                        end = i + 1;
                        break;
                    }
                }
            }
            end
        }
        _ => text.find(char::is_whitespace).unwrap_or(text.len()),
    };
    (unquote_identifier(&text[..end]), &text[end..])
}

/// Splits a script into statements on `;`, skipping quoted text and
/// comments. Comments are removed from the returned statements.
pub fn split_statements(sql: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut state = QuoteState::default();
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        if state.quote.is_none() {
            if c == '-' && chars.peek() == Some(&'-') {
                for c in chars.by_ref() {
                    if c == '\n' {
                        current.push('\n');
                        break;
                    }
                }
                continue;
            }
            if c == '/' && chars.peek() == Some(&'*') {
                chars.next();
                let mut previous = ' ';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    previous = c;
                }
                current.push(' ');
                continue;
            }
            if c == ';' {
                push_statement(&mut statements, &current);
                current.clear();
                continue;
            }
        }
        state.feed(c);
        current.push(c);
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(statements: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        statements.push(text.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_top_level_respects_nesting_and_quotes() {
        let parts = split_top_level(
            "\"id\" integer, \"price\" decimal(10,2), CHECK (\"s\" IN ('a,b', 'c')), ",
            ',',
        );
        assert_eq!(
            parts,
            vec![
                "\"id\" integer",
                "\"price\" decimal(10,2)",
                "CHECK (\"s\" IN ('a,b', 'c'))"
            ]
        );
    }

    #[test]
    fn parenthesized_finds_matching_close() {
        let text = "AS ((a + b) * ')') STORED";
        let (inner, end) = parenthesized(text, 3).unwrap();
        assert_eq!(inner, "(a + b) * ')'");
        assert_eq!(&text[end..], " STORED");
        assert!(parenthesized(text, 0).is_none());
        assert_eq!(rfind_top_level("'a::b'::text", "::"), Some(6));
        assert_eq!(rfind_top_level("f(x::int)", "::"), None);
    }

    #[test]
    fn literals_and_identifiers_are_unescaped() {
        assert_eq!(string_literals("'A', 'it''s', 'C'"), vec!["A", "it's", "C"]);
        assert_eq!(unquote_identifier("\"say \"\"hi\"\"\""), "say \"hi\"");
        assert_eq!(unquote_identifier("`name`"), "name");

        let (name, rest) = leading_identifier("\"first name\" varchar(50) NOT NULL");
        assert_eq!(name, "first name");
        assert_eq!(rest, " varchar(50) NOT NULL");
        let (name, rest) = leading_identifier("id integer");
        assert_eq!(name, "id");
        assert_eq!(rest, " integer");
    }

    #[test]
    fn split_statements_skips_comments_and_quotes() {
        let script = "-- create\nCREATE TABLE \"a;b\" (\"x\" text DEFAULT ';');\n\
                      /* block; comment */ INSERT INTO t VALUES ('--not a comment');\n\n";
        assert_eq!(
            split_statements(script),
            vec![
                "CREATE TABLE \"a;b\" (\"x\" text DEFAULT ';')",
                "INSERT INTO t VALUES ('--not a comment')",
            ]
        );
        assert!(split_statements("-- nothing here\n").is_empty());
    }
}
