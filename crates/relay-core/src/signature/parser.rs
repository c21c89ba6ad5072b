//! Recursive-descent parser for the signature grammar.
//!
//! ```text
//! signature := type name '(' arglist ')'
//! arglist   := (arg ','?)*
//! arg       := type name?
//! type      := scalar ('[]')*
//! scalar    := '{' arglist '}' | string | int | double | boolean | byte | complex | void
//! ```

use super::types::{ScalarType, SignatureElement, SignatureType};
use crate::{RelayError, Result};

const DELIMITERS: &[char] = &['{', '}', '[', ']', '(', ')', ','];

/// Parse a complete type, rejecting trailing text.
pub fn parse_type(text: &str) -> Result<SignatureType> {
    let mut parser = Parser::new(text);
    let ty = parser.parse_type()?;
    parser.expect_end()?;
    Ok(ty)
}

pub(crate) fn parse_signature_parts(
    text: &str,
) -> Result<(SignatureType, String, Vec<SignatureElement>)> {
    let mut parser = Parser::new(text);
    let return_type = parser.parse_type()?;
    let name = parser.name();
    if name.is_empty() {
        return Err(parser.error("method name"));
    }
    parser.consume("(")?;
    let arguments = parser.element_list(')')?;
    parser.consume(")")?;
    parser.expect_end()?;
    Ok((return_type, name, arguments))
}

pub(crate) struct Parser<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self { text, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    pub(crate) fn is_at_end(&mut self) -> bool {
        self.skip_whitespace();
        self.pos >= self.text.len()
    }

    /// Read a name: everything up to a delimiter or whitespace. May be empty.
    pub(crate) fn name(&mut self) -> String {
        self.skip_whitespace();
        let rest = self.rest();
        let end = rest
            .find(|c: char| c.is_whitespace() || DELIMITERS.contains(&c))
            .unwrap_or(rest.len());
        self.pos += end;
        rest[..end].to_string()
    }

    pub(crate) fn consume(&mut self, expected: &str) -> Result<()> {
        self.skip_whitespace();
        if self.rest().starts_with(expected) {
            self.pos += expected.len();
            Ok(())
        } else {
            Err(self.error(expected))
        }
    }

    fn expect_end(&mut self) -> Result<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(self.error("end of signature"))
        }
    }

    pub(crate) fn error(&self, expected: &str) -> RelayError {
        let got = match self.rest().trim_start() {
            "" => "end of signature",
            rest => rest,
        };
        RelayError::signature_syntax(
            format!("syntax error expecting {expected} got {got}"),
            self.text,
        )
    }

    pub(crate) fn parse_type(&mut self) -> Result<SignatureType> {
        self.skip_whitespace();
        let base = if self.peek() == Some('{') {
            self.pos += 1;
            let elements = self.element_list('}')?;
            self.consume("}")?;
            SignatureType::List(elements)
        } else {
            let start = self.pos;
            let keyword = self.name();
            match keyword.as_str() {
                "void" => SignatureType::Void,
                other => match ScalarType::from_keyword(other) {
                    Some(scalar) => SignatureType::Scalar(scalar),
                    None => {
                        self.pos = start;
                        return Err(self.error("type"));
                    }
                },
            }
        };

        let mut dimensions = 0;
        loop {
            self.skip_whitespace();
            if self.peek() != Some('[') {
                break;
            }
            self.pos += 1;
            self.consume("]")?;
            dimensions += 1;
        }
        if dimensions == 0 {
            return Ok(base);
        }
        if base == SignatureType::Void {
            return Err(self.error("non-void array element"));
        }
        Ok(SignatureType::Array {
            inner: Box::new(base),
            dimensions,
        })
    }

    /// Elements up to (not including) `close`. Commas between elements are optional.
    pub(crate) fn element_list(&mut self, close: char) -> Result<Vec<SignatureElement>> {
        let mut elements = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => break,
                Some(c) if c == close => break,
                _ => {}
            }
            let ty = self.parse_type()?;
            let name = self.name();
            elements.push(SignatureElement::new(
                ty,
                (!name.is_empty()).then_some(name),
            ));
            self.skip_whitespace();
            if self.peek() == Some(',') {
                self.pos += 1;
            }
        }
        Ok(elements)
    }
}
