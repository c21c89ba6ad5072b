//! Method signatures: parsing, structural type matching and overload resolution.

mod parser;
mod resolve;
mod types;

pub use parser::parse_type;
pub use resolve::{matches_candidate, resolve, Candidate};
pub use types::{elements_match, ScalarType, Signature, SignatureElement, SignatureType};
