//! Service category paths.
//!
//! Categories are slash separated paths such as `/Analysis/Simulation`.
//! Stored and compared in normalised form: one leading slash, no empty
//! segments, no trailing slash. The root category is `/`.

use crate::{ErrorCode, RelayError, Result};
use std::collections::BTreeSet;

/// Normalise a category path.
///
/// Backslashes count as separators. A segment made only of whitespace is
/// rejected with `IncorrectCategorySyntax`.
pub fn normalize(category: &str) -> Result<String> {
    let mut path = String::new();
    for segment in category.trim().split(['/', '\\']) {
        if segment.is_empty() {
            continue;
        }
        let trimmed = segment.trim();
        if trimmed.is_empty() {
            return Err(RelayError::new(
                ErrorCode::IncorrectCategorySyntax,
                "incorrect category syntax",
                format!("category '{category}' contains an empty path segment"),
            ));
        }
        path.push('/');
        path.push_str(trimmed);
    }
    if path.is_empty() {
        path.push('/');
    }
    Ok(path)
}

/// Both arguments must already be normalised.
pub fn matches(category: &str, wanted: &str, recursive: bool) -> bool {
    if category == wanted {
        return true;
    }
    if !recursive {
        return false;
    }
    if wanted == "/" {
        return true;
    }
    category
        .strip_prefix(wanted)
        .is_some_and(|rest| rest.starts_with('/'))
}

/// Paths of `categories` strictly below `parent`, relative to it, sorted and
/// without duplicates.
pub fn subcategories<'a>(
    categories: impl IntoIterator<Item = &'a str>,
    parent: &str,
) -> Result<Vec<String>> {
    let parent = normalize(parent)?;
    let mut found = BTreeSet::new();
    for category in categories {
        let category = normalize(category)?;
        let relative = if parent == "/" {
            category.strip_prefix('/')
        } else {
            category
                .strip_prefix(parent.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
        };
        if let Some(relative) = relative.filter(|relative| !relative.is_empty()) {
            found.insert(relative.to_string());
        }
    }
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("Analysis/Simulation/").unwrap(), "/Analysis/Simulation");
        assert_eq!(normalize("//a\\b").unwrap(), "/a/b");
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(
            normalize("/a/  /b").unwrap_err().kind(),
            ErrorCode::IncorrectCategorySyntax
        );
    }

    #[test]
    fn test_recursive_and_shallow_matching() {
        assert!(matches("/Analysis", "/Analysis", false));
        assert!(!matches("/Analysis/Steady", "/Analysis", false));
        assert!(matches("/Analysis/Steady", "/Analysis", true));
        assert!(!matches("/AnalysisTools", "/Analysis", true));
        assert!(matches("/Anything", "/", true));
        assert!(!matches("/Anything", "/", false));
    }

    #[test]
    fn test_subcategories_are_relative() {
        let categories = ["/Analysis/Steady", "/Analysis/Time/Course", "/Plot", "/Analysis"];
        assert_eq!(
            subcategories(categories, "/Analysis").unwrap(),
            vec!["Steady".to_string(), "Time/Course".to_string()]
        );
        assert_eq!(
            subcategories(categories, "/").unwrap(),
            vec![
                "Analysis".to_string(),
                "Analysis/Steady".to_string(),
                "Analysis/Time/Course".to_string(),
                "Plot".to_string()
            ]
        );
    }
}
