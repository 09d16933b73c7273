/// The prefix of every record's type URI.
pub const TYPE_URI_PREFIX: &str = "//refin.io/";

/// The sentinel attribute that marks an ID-object frame.
///
/// No canonical record ever carries this attribute, which is what keeps the
/// identity-hash namespace disjoint from the content-hash namespace.
pub const ID_OBJECT_SENTINEL: &str = "data-id-object=\"true\"";

/// Escapes text content for embedding in canonical markup.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            other => out.push(other),
        }
    }
    out
}

/// Reverses [`escape`]. Unknown entities are left untouched — the strict
/// parser never produces them because `&` only appears escaped in canonical
/// text.
pub fn unescape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(index) = rest.find('&') {
        out.push_str(&rest[..index]);
        rest = &rest[index..];
        for (entity, replacement) in [("&amp;", '&'), ("&lt;", '<'), ("&gt;", '>')] {
            if let Some(tail) = rest.strip_prefix(entity) {
                out.push(replacement);
                rest = tail;
                break;
            }
        }
        if rest.starts_with('&') {
            out.push('&');
            rest = &rest[1..];
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_escapes_and_unescapes_markup_characters() {
        let input = "a < b && b > c";
        let escaped = escape(input);
        assert_eq!(escaped, "a &lt; b &amp;&amp; b &gt; c");
        assert_eq!(unescape(&escaped), input);
    }
}
