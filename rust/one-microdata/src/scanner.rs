use crate::OneMicrodataError;

/// A byte cursor over canonical text.
///
/// The canonical grammar escapes `<` inside all content, so every literal
/// `<` in the input opens or closes a tag. That property is what lets the
/// scanner find element extents with a plain depth counter, and what lets
/// ID extraction splice field bytes without understanding them.
pub(crate) struct Scanner<'a> {
    pub(crate) input: &'a str,
    pub(crate) pos: usize,
}

impl<'a> Scanner<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    pub(crate) fn err(&self, reason: &'static str) -> OneMicrodataError {
        OneMicrodataError::MicrodataMalformed {
            at: self.pos,
            reason,
        }
    }

    pub(crate) fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    pub(crate) fn at_end(&self) -> bool {
        self.pos == self.input.len()
    }

    pub(crate) fn peek(&self, literal: &str) -> bool {
        self.rest().starts_with(literal)
    }

    pub(crate) fn expect(&mut self, literal: &'static str) -> Result<(), OneMicrodataError> {
        if self.peek(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(self.err(literal))
        }
    }

    /// Like [`Scanner::expect`], for literals assembled at runtime.
    pub(crate) fn expect_exact(
        &mut self,
        literal: &str,
        reason: &'static str,
    ) -> Result<(), OneMicrodataError> {
        if self.peek(literal) {
            self.pos += literal.len();
            Ok(())
        } else {
            Err(self.err(reason))
        }
    }

    /// Consumes up to (and including) the next occurrence of `delimiter`,
    /// returning the bytes before it.
    pub(crate) fn take_until(
        &mut self,
        delimiter: &'static str,
    ) -> Result<&'a str, OneMicrodataError> {
        match self.rest().find(delimiter) {
            Some(index) => {
                let taken = &self.rest()[..index];
                self.pos += index + delimiter.len();
                Ok(taken)
            }
            None => Err(self.err(delimiter)),
        }
    }

    /// Consumes up to (but not including) the next occurrence of
    /// `delimiter`, returning the bytes before it.
    pub(crate) fn take_before(
        &mut self,
        delimiter: &'static str,
    ) -> Result<&'a str, OneMicrodataError> {
        match self.rest().find(delimiter) {
            Some(index) => {
                let taken = &self.rest()[..index];
                self.pos += index;
                Ok(taken)
            }
            None => Err(self.err(delimiter)),
        }
    }

    /// Parses the opening tag at the cursor without consuming it.
    pub(crate) fn open_tag(&self) -> Result<OpenTag<'a>, OneMicrodataError> {
        let rest = self.rest();
        if !rest.starts_with('<') || rest.starts_with("</") {
            return Err(self.err("opening tag"));
        }
        let close = rest.find('>').ok_or_else(|| self.err("'>'"))?;
        let inside = &rest[1..close];
        let (name, attrs) = match inside.find(' ') {
            Some(space) => (&inside[..space], &inside[space + 1..]),
            None => (inside, ""),
        };
        Ok(OpenTag {
            name,
            attrs,
            end: self.pos + close + 1,
        })
    }

    /// Consumes one complete element (opening tag through matching close)
    /// and returns its full byte range.
    pub(crate) fn element_extent(&mut self) -> Result<&'a str, OneMicrodataError> {
        let start = self.pos;
        if !self.peek("<") {
            return Err(self.err("element"));
        }
        let mut depth = 0usize;
        let mut cursor = self.pos;
        loop {
            let rest = &self.input[cursor..];
            let open = match rest.find('<') {
                Some(index) => cursor + index,
                None => return Err(self.err("closing tag")),
            };
            let close = match self.input[open..].find('>') {
                Some(index) => open + index,
                None => return Err(self.err("'>'")),
            };
            if self.input[open..].starts_with("</") {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| self.err("balanced tags"))?;
                cursor = close + 1;
                if depth == 0 {
                    self.pos = cursor;
                    return Ok(&self.input[start..cursor]);
                }
            } else {
                depth += 1;
                cursor = close + 1;
            }
        }
    }
}

/// The parsed pieces of an opening tag.
pub(crate) struct OpenTag<'a> {
    pub(crate) name: &'a str,
    pub(crate) attrs: &'a str,
    /// Byte offset just past the closing `>`.
    pub(crate) end: usize,
}

impl<'a> OpenTag<'a> {
    /// Looks up an attribute value inside the tag.
    pub(crate) fn attr(&self, name: &str) -> Option<&'a str> {
        let mut rest = self.attrs;
        let pattern = format!("{name}=\"");
        loop {
            let index = rest.find(&pattern)?;
            // Reject suffix matches like finding type=" inside data-type=".
            let preceded_ok = index == 0 || rest.as_bytes()[index - 1] == b' ';
            let value_start = index + pattern.len();
            let value_len = rest[value_start..].find('"')?;
            if preceded_ok {
                return Some(&rest[value_start..value_start + value_len]);
            }
            rest = &rest[value_start + value_len..];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_measures_nested_element_extents() {
        let input = "<div a=\"1\"><span>x</span><ol><li>y</li></ol></div><span>z</span>";
        let mut scanner = Scanner::new(input);
        let extent = scanner.element_extent().unwrap();
        assert_eq!(extent, "<div a=\"1\"><span>x</span><ol><li>y</li></ol></div>");
        assert_eq!(scanner.rest(), "<span>z</span>");
    }

    #[test]
    fn it_reads_attributes_without_suffix_confusion() {
        let scanner = Scanner::new("<a itemprop=\"p\" data-type=\"set\" href=\"ff\"></a>");
        let tag = scanner.open_tag().unwrap();
        assert_eq!(tag.name, "a");
        assert_eq!(tag.attr("itemprop"), Some("p"));
        assert_eq!(tag.attr("data-type"), Some("set"));
        assert_eq!(tag.attr("type"), None);
    }
}
