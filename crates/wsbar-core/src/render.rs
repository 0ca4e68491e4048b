use crate::workspace::RenderSnapshot;

pub const ENCLOSING_OPEN: &str = "<span>";
pub const ENCLOSING_CLOSE: &str = "</span>";

/// Renders the workspace strip: the focused workspace in brackets, the rest
/// padded with single spaces, in snapshot order.
pub fn workspace_markup(snapshot: &RenderSnapshot) -> String {
    let mut text = String::from(ENCLOSING_OPEN);
    for entry in snapshot.entries() {
        let name = escape_markup(&entry.name);
        if entry.focused {
            text.push('[');
            text.push_str(&name);
            text.push(']');
        } else {
            text.push(' ');
            text.push_str(&name);
            text.push(' ');
        }
    }
    text.push_str(ENCLOSING_CLOSE);
    text
}

pub fn escape_markup(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Drops tags and resolves the entities `escape_markup` produces, for
/// surfaces that only show plain text.
pub fn strip_markup(input: &str) -> String {
    let mut plain = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            other if !in_tag => plain.push(other),
            _ => {}
        }
    }
    plain
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
