//! Parsed signature tree and structural matching.

use super::parser;
use crate::Result;
use std::fmt;
use std::str::FromStr;

/// Scalar keywords of the signature grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    String,
    Integer,
    Double,
    Boolean,
    Byte,
    Complex,
}

impl ScalarType {
    pub fn keyword(self) -> &'static str {
        match self {
            ScalarType::String => "string",
            ScalarType::Integer => "int",
            ScalarType::Double => "double",
            ScalarType::Boolean => "boolean",
            ScalarType::Byte => "byte",
            ScalarType::Complex => "complex",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(ScalarType::String),
            "int" => Some(ScalarType::Integer),
            "double" => Some(ScalarType::Double),
            "boolean" => Some(ScalarType::Boolean),
            "byte" => Some(ScalarType::Byte),
            "complex" => Some(ScalarType::Complex),
            _ => None,
        }
    }
}

/// Argument or return type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignatureType {
    Scalar(ScalarType),
    Void,
    Array {
        inner: Box<SignatureType>,
        dimensions: usize,
    },
    /// `{...}`. An empty list matches any list.
    List(Vec<SignatureElement>),
}

impl SignatureType {
    /// Structural match used by overload resolution.
    ///
    /// Array dimension counts are not compared.
    pub fn matches(&self, other: &SignatureType) -> bool {
        match (self, other) {
            (SignatureType::Scalar(a), SignatureType::Scalar(b)) => a == b,
            (SignatureType::Void, SignatureType::Void) => true,
            (SignatureType::Array { inner: a, .. }, SignatureType::Array { inner: b, .. }) => {
                a.matches(b)
            }
            (SignatureType::List(a), SignatureType::List(b)) => {
                a.is_empty() || b.is_empty() || elements_match(a, b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for SignatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignatureType::Scalar(scalar) => f.write_str(scalar.keyword()),
            SignatureType::Void => f.write_str("void"),
            SignatureType::Array { inner, dimensions } => {
                write!(f, "{inner}")?;
                for _ in 0..*dimensions {
                    f.write_str("[]")?;
                }
                Ok(())
            }
            SignatureType::List(elements) => {
                f.write_str("{")?;
                write_elements(f, elements)?;
                f.write_str("}")
            }
        }
    }
}

/// A type with an optional name, as found in argument lists and list types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SignatureElement {
    pub ty: SignatureType,
    pub name: Option<String>,
}

impl SignatureElement {
    pub fn new(ty: SignatureType, name: Option<String>) -> Self {
        Self { ty, name }
    }
}

/// Positional match of two element sequences. Lengths must agree.
pub fn elements_match(a: &[SignatureElement], b: &[SignatureElement]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.ty.matches(&y.ty))
}

fn write_elements(f: &mut fmt::Formatter<'_>, elements: &[SignatureElement]) -> fmt::Result {
    for (index, element) in elements.iter().enumerate() {
        if index > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", element.ty)?;
        if let Some(name) = &element.name {
            write!(f, " {name}")?;
        }
    }
    Ok(())
}

/// A parsed method signature. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    text: String,
    name: String,
    arguments: Vec<SignatureElement>,
    return_type: SignatureType,
}

impl Signature {
    /// Parse `type name(arglist)`.
    pub fn parse(text: &str) -> Result<Self> {
        let (return_type, name, arguments) = parser::parse_signature_parts(text)?;
        Ok(Self {
            text: text.to_string(),
            name,
            arguments,
            return_type,
        })
    }

    /// The text the signature was registered with.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[SignatureElement] {
        &self.arguments
    }

    pub fn return_type(&self) -> &SignatureType {
        &self.return_type
    }

    /// Canonical rendering, independent of the original spacing.
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_type, self.name)?;
        write_elements(f, &self.arguments)?;
        f.write_str(")")
    }
}

impl FromStr for Signature {
    type Err = crate::RelayError;

    fn from_str(text: &str) -> Result<Self> {
        Signature::parse(text)
    }
}
