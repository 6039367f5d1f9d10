use std::fmt;

use thiserror::Error;

use crate::tokenizer::Line;

pub type Result<T> = std::result::Result<T, DipError>;

/// A line in some source text, used to point errors at the offending input.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    /// Name of the source the line came from (a file path or `<string>`)
    pub source: String,
    /// 1-based line number
    pub line: usize,
    /// The logical line as it was read
    pub code: String,
}

impl From<&Line> for Location {
    fn from(line: &Line) -> Self {
        Location {
            source: line.source.clone(),
            line: line.number,
            code: line.text.clone(),
        }
    }
}

/// Error categories. Every category aborts the compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Syntax,
    Type,
    Scope,
    Reference,
    Constraint,
    Unit,
}

impl ErrorKind {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Syntax => "dip-syntax-error",
            ErrorKind::Type => "dip-type-error",
            ErrorKind::Scope => "dip-scope-error",
            ErrorKind::Reference => "dip-reference-error",
            ErrorKind::Constraint => "dip-constraint-error",
            ErrorKind::Unit => "dip-unit-error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Scope => "ScopeError",
            ErrorKind::Reference => "ReferenceError",
            ErrorKind::Constraint => "ConstraintError",
            ErrorKind::Unit => "UnitError",
        };
        f.write_str(name)
    }
}

/// A compile error with the lines it was raised on.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}{}", render_context(.context))]
pub struct DipError {
    pub kind: ErrorKind,
    pub message: String,
    /// Offending lines, innermost first
    pub context: Vec<Location>,
}

impl DipError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        DipError {
            kind,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Syntax, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn scope(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Scope, message)
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Reference, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Constraint, message)
    }

    pub fn unit(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unit, message)
    }

    /// Attach a line to the error unless it is already cited.
    pub fn at(mut self, line: &Line) -> Self {
        let location = Location::from(line);
        if !self.context.contains(&location) {
            self.context.push(location);
        }
        self
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }
}

fn render_context(context: &[Location]) -> String {
    let mut out = String::new();
    for loc in context {
        out.push_str(&format!("\n  --> {}:{}\n   | {}", loc.source, loc.line, loc.code));
    }
    out
}
