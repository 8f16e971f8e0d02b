//! Recursive descent parser.
//!
//! Grammar accepted here:
//!
//! * tree ::= subtree ';'
//! * subtree ::= ['(' subtree (',' subtree)* ')'] [label] annotation* [':' length annotation*]
//! * annotation ::= '[&' key '=' value (',' key '=' value)* ']'
//!
//! Brackets not starting with `&` are comments and skipped. Whitespace may appear between any
//! two tokens, but not inside unquoted labels or lengths.

use crate::{DELIMITERS, Error, FlatNode, FlatTree, Result};

pub(crate) fn parse(input: &str) -> Result<FlatTree> {
    let mut parser = Parser::new(input);
    let mut tree = FlatTree::new(FlatNode::new());
    parser.parse_subtree(&mut tree, 0)?;
    parser.skip_whitespace();
    parser.expect(b';', "';'")?;
    parser.skip_whitespace();
    if parser.pos < parser.bytes.len() {
        return Err(Error::TrailingInput {
            position: parser.pos,
        });
    }
    Ok(tree)
}

struct Parser<'a> {
    input: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn consume_if(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, ch: u8, expected: &'static str) -> Result<()> {
        match self.peek() {
            Some(b) if b == ch => {
                self.pos += 1;
                Ok(())
            }
            Some(_) => Err(self.unexpected(expected)),
            None => Err(Error::UnexpectedEof { expected }),
        }
    }

    fn unexpected(&self, expected: &'static str) -> Error {
        match self.input[self.pos..].chars().next() {
            Some(found) => Error::UnexpectedChar {
                found,
                position: self.pos,
                expected,
            },
            None => Error::UnexpectedEof { expected },
        }
    }

    /// Parse the subtree of `node`, which is already in the arena.
    fn parse_subtree(&mut self, tree: &mut FlatTree, node: usize) -> Result<()> {
        self.skip_comments()?;
        if self.consume_if(b'(') {
            loop {
                let child = tree.add_child(node, FlatNode::new());
                self.parse_subtree(tree, child)?;
                self.skip_whitespace();
                match self.peek() {
                    Some(b',') => self.pos += 1,
                    Some(b')') => {
                        self.pos += 1;
                        break;
                    }
                    _ => return Err(self.unexpected("',' or ')'")),
                }
            }
        }

        let flat = tree.node_mut(node);
        self.skip_comments()?;
        flat.label = self.parse_label()?;
        self.parse_annotations(flat)?;
        if self.consume_if(b':') {
            self.skip_whitespace();
            flat.length = Some(self.parse_length()?);
            self.parse_annotations(flat)?;
        }
        Ok(())
    }

    /// Skip whitespace and brackets which are not annotations.
    fn skip_comments(&mut self) -> Result<()> {
        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'[') || self.bytes.get(self.pos + 1) == Some(&b'&') {
                return Ok(());
            }
            let start = self.pos;
            let Some(offset) = self.input[start..].find(']') else {
                return Err(Error::UnclosedBracket { position: start });
            };
            self.pos = start + offset + 1;
        }
    }

    fn parse_label(&mut self) -> Result<Option<String>> {
        if self.peek() == Some(b'\'') {
            return self.parse_quoted_label().map(Some);
        }
        let token = self.take_token();
        Ok((!token.is_empty()).then(|| token.to_owned()))
    }

    /// Quoted label, where `''` stands for a single quote.
    fn parse_quoted_label(&mut self) -> Result<String> {
        let start = self.pos;
        self.pos += 1;
        let mut label = String::new();
        loop {
            let Some(offset) = self.input[self.pos..].find('\'') else {
                return Err(Error::UnclosedQuote { position: start });
            };
            label.push_str(&self.input[self.pos..self.pos + offset]);
            self.pos += offset + 1;
            if self.consume_if(b'\'') {
                label.push('\'');
            } else {
                return Ok(label);
            }
        }
    }

    fn parse_length(&mut self) -> Result<f64> {
        let position = self.pos;
        let token = self.take_token();
        token.parse::<f64>().map_err(|_| Error::InvalidLength {
            text: token.to_owned(),
            position,
        })
    }

    /// Consume bytes up to the next delimiter or whitespace.
    fn take_token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if DELIMITERS.contains(&b) || b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        &self.input[start..self.pos]
    }

    fn parse_annotations(&mut self, node: &mut FlatNode) -> Result<()> {
        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'[') {
                return Ok(());
            }
            let start = self.pos;
            let Some(offset) = self.input[start..].find(']') else {
                return Err(Error::UnclosedBracket { position: start });
            };
            let content = &self.input[start + 1..start + offset];
            self.pos = start + offset + 1;

            // Plain comments are skipped
            if let Some(pairs) = content.strip_prefix('&') {
                for pair in split_top_level(pairs) {
                    let (key, value) =
                        pair.split_once('=')
                            .ok_or_else(|| Error::InvalidAnnotation {
                                text: pair.to_owned(),
                                position: start,
                            })?;
                    let key = key.trim();
                    if key.is_empty() {
                        return Err(Error::InvalidAnnotation {
                            text: pair.to_owned(),
                            position: start,
                        });
                    }
                    node.annotations
                        .push((key.to_owned(), value.trim().to_owned()));
                }
            }
        }
    }
}

/// Split on commas not nested inside `{}`, as in `rate=0.5,set={1,2}`.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&s[start..]);
    parts
}
