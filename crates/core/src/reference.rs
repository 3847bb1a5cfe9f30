use once_cell::sync::Lazy;
use regex::Regex;

use crate::highlight::{AnnotationSet, Highlight};

static REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(\((.*?)\)\)").expect("reference marker regex"));

/// Id of the first `((id))` marker in `line`. An empty marker `(())` counts
/// as no reference.
pub fn find_reference_id(line: &str) -> Option<&str> {
    let captures = REFERENCE.captures(line)?;
    let id = captures.get(1)?.as_str();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Looks up the highlight referenced from `line`.
pub fn resolve_reference<'a>(line: &str, annotations: &'a AnnotationSet) -> Option<&'a Highlight> {
    find_reference_id(line).and_then(|id| annotations.find(id))
}
