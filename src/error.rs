use std::fmt;

use thiserror::Error;

use crate::program::Location;

/// One step of a counterexample: an instruction the failing path went through.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TraceEntry {
    pub location: Location,
    pub instruction: String,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.location, self.instruction)
    }
}

/// A safety violation of the analysed program.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProgramError {
    pub message: String,
    pub location: Option<Location>,
    /// Path leading to the violation, oldest step first.
    pub trace: Vec<TraceEntry>,
}

impl ProgramError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            location: None,
            trace: Vec::new(),
        }
    }

    /// Attach the location, unless one is already known.
    pub fn at(mut self, location: &Location) -> Self {
        self.location.get_or_insert_with(|| location.clone());
        self
    }

    pub fn with_trace(mut self, trace: Vec<TraceEntry>) -> Self {
        self.trace = trace;
        self
    }
}

impl fmt::Display for ProgramError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} error: {}", location, self.message),
            None => write!(f, "error: {}", self.message),
        }
    }
}

impl std::error::Error for ProgramError {}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Program(#[from] ProgramError),

    #[error("feature not implemented: {0}")]
    NotImplemented(String),

    #[error("type {0} not found")]
    TypeNotFound(String),

    #[error("type {0} already exists")]
    TypeExists(String),

    #[error("unknown function {0}")]
    UnknownFunction(String),

    #[error("invalid box {name}: {reason}")]
    BoxDefinition { name: String, reason: String },

    #[error("gave up after {0} restarts")]
    RestartLimit(usize),
}

impl Error {
    pub(crate) fn box_definition(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::BoxDefinition {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn program(message: impl Into<String>) -> Self {
        Error::Program(ProgramError::new(message))
    }

    pub(crate) fn not_implemented(what: impl Into<String>) -> Self {
        Error::NotImplemented(what.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    #[test]
    fn test_display() {
        let e = ProgramError::new("releasing non-pointer value").at(&Location::new("list.c", 12));
        assert_eq!(e.to_string(), "list.c:12: error: releasing non-pointer value");
        let e: Error = e.into();
        assert_eq!(e.to_string(), "list.c:12: error: releasing non-pointer value");
        assert_eq!(
            Error::NotImplemented("call to foo".into()).to_string(),
            "feature not implemented: call to foo"
        );
    }

    #[test]
    fn test_location_kept() {
        let e = ProgramError::new("x")
            .at(&Location::new("a.c", 1))
            .at(&Location::new("b.c", 2));
        assert_eq!(e.location, Some(Location::new("a.c", 1)));
    }

    #[test]
    fn test_box_definition() {
        let e = Error::box_definition("dll", "covers no selector");
        assert_eq!(e.to_string(), "invalid box dll: covers no selector");
    }
}
