//! Overload resolution of candidate signature strings.
//!
//! A candidate matches a registered signature when, in order:
//!
//! 1. the strings are identical;
//! 2. the candidate parses as a full signature whose name and argument list
//!    match structurally (the return type is not compared);
//! 3. otherwise the candidate's leading name matches and it either stops
//!    there (a bare name) or is followed by an explicit `(arglist)` that
//!    matches structurally.

use super::parser::Parser;
use super::types::{elements_match, Signature, SignatureElement};
use crate::{ErrorCode, RelayError, Result};

/// The shape a candidate string was recognised as.
#[derive(Debug, Clone, PartialEq)]
pub enum Candidate {
    Full(Signature),
    Name(String),
    NameWithArguments(String, Vec<SignatureElement>),
}

impl Candidate {
    /// Classify a candidate. Fails only when the text after a bare name is
    /// not a well-formed `(arglist)`.
    pub fn parse(text: &str) -> Result<Self> {
        if let Ok(signature) = Signature::parse(text) {
            return Ok(Candidate::Full(signature));
        }
        let mut parser = Parser::new(text);
        let name = parser.name();
        if parser.is_at_end() {
            return Ok(Candidate::Name(name));
        }
        parser.consume("(")?;
        let arguments = parser.element_list(')')?;
        parser.consume(")")?;
        Ok(Candidate::NameWithArguments(name, arguments))
    }

    /// Structural comparison against one registered signature.
    pub fn matches(&self, registered: &Signature) -> bool {
        match self {
            Candidate::Full(signature) => {
                signature.name() == registered.name()
                    && elements_match(signature.arguments(), registered.arguments())
            }
            Candidate::Name(name) => name == registered.name(),
            Candidate::NameWithArguments(name, arguments) => {
                name == registered.name() && elements_match(arguments, registered.arguments())
            }
        }
    }
}

/// Does `candidate` select `registered`?
pub fn matches_candidate(registered: &Signature, candidate: &str) -> Result<bool> {
    if registered.text() == candidate {
        return Ok(true);
    }
    Ok(Candidate::parse(candidate)?.matches(registered))
}

/// Index of the single registered signature selected by `candidate`.
pub fn resolve<'a, I>(registered: I, candidate: &str) -> Result<usize>
where
    I: IntoIterator<Item = &'a Signature>,
{
    let mut parsed: Option<Candidate> = None;
    let mut found = None;
    for (index, signature) in registered.into_iter().enumerate() {
        let hit = if signature.text() == candidate {
            true
        } else {
            if parsed.is_none() {
                parsed = Some(Candidate::parse(candidate)?);
            }
            parsed
                .as_ref()
                .is_some_and(|parsed| parsed.matches(signature))
        };
        if hit {
            if found.is_some() {
                return Err(RelayError::new(
                    ErrorCode::MethodAmbiguous,
                    "more than one method matches the signature given",
                    candidate,
                ));
            }
            found = Some(index);
        }
    }
    found.ok_or_else(|| RelayError::new(ErrorCode::MethodNotFound, "method not found", candidate))
}
