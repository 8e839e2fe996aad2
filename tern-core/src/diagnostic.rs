//! Diagnostics produced by the parser and the type checker.

use std::fmt;

use crate::span::{Location, ModuleReference};

/// Category of a user-facing problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorKind {
    SyntaxError,
    Collision,
    UnresolvedName,
    UnresolvedType,
    TypeMismatch,
    ArityMismatch,
    InsufficientTypeInferenceContext,
    IllegalOtherClassMatch,
    NonExhaustiveMatch,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::SyntaxError => "SyntaxError",
            ErrorKind::Collision => "Collision",
            ErrorKind::UnresolvedName => "UnresolvedName",
            ErrorKind::UnresolvedType => "UnresolvedType",
            ErrorKind::TypeMismatch => "TypeMismatch",
            ErrorKind::ArityMismatch => "ArityMismatch",
            ErrorKind::InsufficientTypeInferenceContext => "InsufficientTypeInferenceContext",
            ErrorKind::IllegalOtherClassMatch => "IllegalOtherClassMatch",
            ErrorKind::NonExhaustiveMatch => "NonExhaustiveMatch",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single problem attached to a source range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub module: ModuleReference,
    pub location: Location,
    pub message: String,
}

impl Diagnostic {
    pub fn new(
        kind: ErrorKind,
        module: ModuleReference,
        location: Location,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            kind,
            module,
            location,
            message: message.into(),
        }
    }
}

/// Renders as `<module-path>:<range> <message>`.
impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {}",
            self.module.to_path(),
            self.location,
            self.message
        )
    }
}

/// Append-only, order-preserving diagnostic accumulator.
///
/// Passed explicitly into every checking routine; there is no global
/// collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn report(
        &mut self,
        kind: ErrorKind,
        module: &ModuleReference,
        location: Location,
        message: impl Into<String>,
    ) {
        self.push(Diagnostic::new(kind, module.clone(), location, message));
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.diagnostics.extend(other.diagnostics);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn for_module<'a>(
        &'a self,
        module: &'a ModuleReference,
    ) -> impl Iterator<Item = &'a Diagnostic> + 'a {
        self.diagnostics.iter().filter(move |d| &d.module == module)
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::span::Position;

    #[test]
    fn renders_path_range_and_message() {
        let diagnostic = Diagnostic::new(
            ErrorKind::TypeMismatch,
            ModuleReference::new(["a", "b"]),
            Location::new(Position::new(0, 2), Position::new(0, 7)),
            "Expected `int`, found `string`.",
        );
        assert_eq!(
            diagnostic.to_string(),
            "a/b.tern:1:3-1:8 Expected `int`, found `string`."
        );
    }

    #[test]
    fn keeps_insertion_order() {
        let module = ModuleReference::root();
        let mut diagnostics = Diagnostics::new();
        diagnostics.report(ErrorKind::Collision, &module, Location::DUMMY, "first");
        diagnostics.report(ErrorKind::SyntaxError, &module, Location::DUMMY, "second");
        let messages: Vec<_> = diagnostics.iter().map(|d| d.message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second"]);
        assert_eq!(diagnostics.for_module(&module).count(), 2);
        assert_eq!(diagnostics.for_module(&ModuleReference::builtins()).count(), 0);
    }
}
