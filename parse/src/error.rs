use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// A malformed token. Carries the absolute byte offset in the file the
/// fragment came from.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("offset {offset}: {message}")]
pub struct LexError {
    pub offset: usize,
    pub message: String,
}

impl LexError {
    pub fn new(offset: usize, message: impl Into<String>) -> LexError {
        LexError {
            offset,
            message: message.into(),
        }
    }
}

/// A malformed statement. The parser step turns lexer errors into these, so
/// everything above the lexer deals with a single diagnostic shape.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("offset {offset}: {message}")]
pub struct ParseError {
    pub offset: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(offset: usize, message: impl Into<String>) -> ParseError {
        ParseError {
            offset,
            message: message.into(),
        }
    }
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> ParseError {
        ParseError {
            offset: err.offset,
            message: err.message,
        }
    }
}

fn in_file(file: &Option<PathBuf>) -> String {
    match file {
        Some(path) => path.display().to_string(),
        None => "<input>".to_owned(),
    }
}

/// Everything the pipeline can fail with. A file name is attached wherever
/// the failing layer knows it; fail-fast means the first observed error
/// aborts the whole run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{}: {source}", in_file(.file))]
    Parse {
        file: Option<PathBuf>,
        #[source]
        source: ParseError,
    },
    #[error("{}: offset {offset}: include path expanded to an empty string", in_file(.file))]
    EmptyPath {
        file: Option<PathBuf>,
        offset: usize,
    },
    #[error("{}: {source}", in_file(.file))]
    Io {
        file: Option<PathBuf>,
        #[source]
        source: io::Error,
    },
    #[error("parsing was interrupted")]
    Interrupted,
}

impl Error {
    /// Attaches a file path to an error produced below the level where the
    /// path was known. Existing context is kept.
    pub fn with_file(self, path: &Path) -> Error {
        match self {
            Error::Parse { file: None, source } => Error::Parse {
                file: Some(path.to_owned()),
                source,
            },
            Error::EmptyPath { file: None, offset } => Error::EmptyPath {
                file: Some(path.to_owned()),
                offset,
            },
            Error::Io { file: None, source } => Error::Io {
                file: Some(path.to_owned()),
                source,
            },
            other => other,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

impl From<ParseError> for Error {
    fn from(source: ParseError) -> Error {
        Error::Parse { file: None, source }
    }
}

impl From<LexError> for Error {
    fn from(source: LexError) -> Error {
        Error::Parse {
            file: None,
            source: source.into(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(source: io::Error) -> Error {
        Error::Io { file: None, source }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_with_file() {
        let err = Error::from(ParseError::new(12, "expected '='"))
            .with_file(Path::new("sub/build.ninja"));
        assert_eq!(err.to_string(), "sub/build.ninja: offset 12: expected '='");
    }

    #[test]
    fn test_with_file_keeps_existing_context() {
        let err = Error::EmptyPath {
            file: Some(PathBuf::from("a.ninja")),
            offset: 3,
        };
        let err = err.with_file(Path::new("b.ninja"));
        assert!(err.to_string().starts_with("a.ninja:"));
    }
}
