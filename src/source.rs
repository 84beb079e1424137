use std::fmt::{self, Display};
use std::rc::Rc;

/// A position within a source file, as reported by the external lexer.
///
/// Locations are attached to IR nodes during lowering and travel with
/// solidified instructions so runtime errors can produce a backtrace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    file: Rc<str>,
    line: u32,
    column: u32,
}

impl SourceLocation {
    #[must_use]
    pub fn new(file: impl Into<Rc<str>>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Returns a placeholder location for code that did not originate
    /// in a source file, such as host-defined functions.
    #[must_use]
    pub fn unknown() -> Self {
        Self::new("<unknown>", 0, 0)
    }

    #[must_use]
    pub fn file(&self) -> &str {
        &self.file
    }

    #[must_use]
    pub const fn line(&self) -> u32 {
        self.line
    }

    #[must_use]
    pub const fn column(&self) -> u32 {
        self.column
    }
}

impl Default for SourceLocation {
    fn default() -> Self {
        Self::unknown()
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}
