use std::fmt;
use std::str::FromStr;

use crate::error::PathError;
use crate::value::ID_FIELD;

/// A dot-separated path into a document, e.g. `address.city` or `tags.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        if path.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: Vec<String> = path.split('.').map(str::to_owned).collect();
        for segment in &segments {
            if segment.is_empty() {
                return Err(PathError::EmptySegment(path.to_owned()));
            }
            if segment.starts_with('$') {
                return Err(PathError::OperatorSegment(path.to_owned()));
            }
        }
        Ok(Self { segments })
    }

    pub fn id() -> Self { Self { segments: vec![ID_FIELD.to_owned()] } }

    pub fn segments(&self) -> &[String] { &self.segments }

    /// Number of segments; always at least one.
    pub fn depth(&self) -> usize { self.segments.len() }

    pub fn is_id(&self) -> bool { self.segments.len() == 1 && self.segments[0] == ID_FIELD }

    pub fn is_rooted_at_id(&self) -> bool { self.segments[0] == ID_FIELD }
}

/// Whether a path segment addresses an array position.
pub fn is_index(segment: &str) -> bool { !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()) }

impl FromStr for FieldPath {
    type Err = PathError;
    fn from_str(s: &str) -> Result<Self, Self::Err> { Self::parse(s) }
}

impl TryFrom<&str> for FieldPath {
    type Error = PathError;
    fn try_from(s: &str) -> Result<Self, Self::Error> { Self::parse(s) }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.segments.join(".")) }
}
