//! VSS path parsing and normalisation.
//!
//! VSS paths are dot-separated strings like "Vehicle.Acceleration.Vertical".
//! Requests may also arrive in the slash dialect
//! ("Vehicle/Acceleration/Vertical"); both normalise to the same canonical
//! dotted form. A `*` segment matches all direct children at that position,
//! with expansion recursing through matched branches.

use crate::error::CoreError;
use regex::Regex;
use std::sync::OnceLock;

/// The single-level wildcard segment.
pub const WILDCARD: &str = "*";

fn segment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_*]+$").expect("segment regex is valid"))
}

/// A parsed, canonicalised VSS path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    raw: String,
    segments: Vec<String>,
}

impl Path {
    /// Parse a path in either the dotted or the slashed dialect.
    ///
    /// Rejects empty input, empty segments (consecutive separators, trailing
    /// dots) and characters outside `[A-Za-z0-9_*]`.
    pub fn parse(input: &str) -> Result<Self, CoreError> {
        if input.is_empty() {
            return Err(CoreError::MalformedPath("empty path".to_string()));
        }
        let dotted = input.replace('/', ".");
        let mut segments = Vec::new();
        for segment in dotted.split('.') {
            if segment.is_empty() {
                return Err(CoreError::MalformedPath(format!(
                    "empty segment in \"{input}\""
                )));
            }
            if !segment_re().is_match(segment) {
                return Err(CoreError::MalformedPath(format!(
                    "invalid characters in segment \"{segment}\""
                )));
            }
            segments.push(segment.to_string());
        }
        Ok(Self::from_segments(segments))
    }

    /// Build a path from already-validated segments.
    pub fn from_segments(segments: Vec<String>) -> Self {
        Self {
            raw: segments.join("."),
            segments,
        }
    }

    /// The canonical dotted form with no trailing dot.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The path segments.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when any segment is the `*` wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.segments.iter().any(|s| s == WILDCARD)
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dotted() {
        let path = Path::parse("Vehicle.Acceleration.Vertical").unwrap();
        assert_eq!(path.segments(), &["Vehicle", "Acceleration", "Vertical"]);
        assert_eq!(path.as_str(), "Vehicle.Acceleration.Vertical");
        assert!(!path.is_wildcard());
    }

    #[test]
    fn test_parse_slashed_dialect() {
        let path = Path::parse("Vehicle/Acceleration/Vertical").unwrap();
        assert_eq!(path.as_str(), "Vehicle.Acceleration.Vertical");
    }

    #[test]
    fn test_wildcard_detection() {
        assert!(Path::parse("Vehicle.Acceleration.*").unwrap().is_wildcard());
        assert!(Path::parse("Vehicle.*.Vertical").unwrap().is_wildcard());
        assert!(!Path::parse("Vehicle").unwrap().is_wildcard());
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(matches!(Path::parse(""), Err(CoreError::MalformedPath(_))));
    }

    #[test]
    fn test_rejects_empty_segments() {
        assert!(Path::parse("Vehicle..Speed").is_err());
        assert!(Path::parse("Vehicle.Speed.").is_err());
        assert!(Path::parse(".Vehicle").is_err());
    }

    #[test]
    fn test_rejects_invalid_characters() {
        assert!(Path::parse("Vehicle.Spe ed").is_err());
        assert!(Path::parse("Vehicle.Spe-ed").is_err());
    }

    #[test]
    fn test_underscore_and_digits_allowed() {
        let path = Path::parse("Vehicle.OBD.O2_Sensor1").unwrap();
        assert_eq!(path.segments().len(), 3);
    }
}
