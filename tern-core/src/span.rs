//! Source positions, ranges and module identities.
//!
//! Positions are stored zero-indexed and rendered one-indexed, so that
//! `Location::to_string()` matches the `line:col-line:col` form used in
//! diagnostics.

use std::fmt;

/// Extension of Tern source files.
pub const SOURCE_EXTENSION: &str = ".tern";

/// Identity of a module: an ordered list of name segments.
///
/// `a.b` lives in `a/b.tern`; the root module (no segments) maps to
/// just `.tern`.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ModuleReference(Vec<String>);

impl ModuleReference {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ModuleReference(segments.into_iter().map(Into::into).collect())
    }

    pub fn root() -> Self {
        ModuleReference(Vec::new())
    }

    /// Pseudo module holding the `Builtins` class.
    pub fn builtins() -> Self {
        ModuleReference(vec!["__builtins__".to_string()])
    }

    /// Parses the dotted form `a.b.c`.
    pub fn from_dotted(text: &str) -> Self {
        if text.is_empty() {
            return Self::root();
        }
        ModuleReference::new(text.split('.'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_path(&self) -> String {
        format!("{}{}", self.0.join("/"), SOURCE_EXTENSION)
    }

    /// Symbol-safe encoding used in generated function names.
    pub fn encoded(&self) -> String {
        self.0
            .iter()
            .map(|segment| segment.replace(|c: char| !c.is_ascii_alphanumeric(), "_"))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl fmt::Display for ModuleReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// A zero-indexed line/column pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: u32,
    pub col: u32,
}

impl Position {
    pub const fn new(line: u32, col: u32) -> Self {
        Position { line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line + 1, self.col + 1)
    }
}

/// A half-open source range `[start, end)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub start: Position,
    pub end: Position,
}

impl Location {
    pub const DUMMY: Location = Location {
        start: Position::new(0, 0),
        end: Position::new(0, 0),
    };

    pub const fn new(start: Position, end: Position) -> Self {
        Location { start, end }
    }

    /// Smallest range covering both `self` and `other`.
    pub fn union(self, other: Location) -> Location {
        Location {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    /// Inclusive on both ends, so a cursor right after a token still
    /// belongs to it.
    pub fn contains_position(&self, position: Position) -> bool {
        self.start <= position && position <= self.end
    }

    pub fn contains(&self, other: &Location) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_reference_paths() {
        assert_eq!(ModuleReference::root().to_path(), ".tern");
        assert_eq!(ModuleReference::new(["a", "b"]).to_path(), "a/b.tern");
        assert_eq!(ModuleReference::from_dotted("a.b").to_string(), "a.b");
        assert_eq!(ModuleReference::new(["my-lib", "x"]).encoded(), "my_lib_x");
    }

    #[test]
    fn module_references_are_totally_ordered() {
        let mut refs = vec![
            ModuleReference::new(["b"]),
            ModuleReference::root(),
            ModuleReference::new(["a", "c"]),
            ModuleReference::new(["a"]),
        ];
        refs.sort();
        let rendered: Vec<_> = refs.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, vec!["", "a", "a.c", "b"]);
    }

    #[test]
    fn locations_render_one_indexed() {
        let location = Location::new(Position::new(0, 0), Position::new(2, 4));
        assert_eq!(location.to_string(), "1:1-3:5");
    }

    #[test]
    fn containment() {
        let outer = Location::new(Position::new(1, 0), Position::new(30, 0));
        let inner = Location::new(Position::new(2, 0), Position::new(3, 0));
        assert!(outer.contains(&inner));
        assert!(!inner.contains(&outer));
        assert!(inner.contains_position(Position::new(2, 5)));
        assert!(!inner.contains_position(Position::new(4, 0)));
        assert_eq!(inner.union(outer), outer);
    }
}
