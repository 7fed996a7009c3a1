use std::fmt;

use crate::types::UnitAddress;

/// Response body that could not be turned into JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub message: String,
    /// First 100 characters of the (recovered) text, for diagnostics.
    pub snippet: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (input starts with {:?})", self.message, self.snippet)
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    HttpStatus { path: &'static str, code: u16 },
    GatewayStatus { path: &'static str, status: String },
    Decode(DecodeError),
    Topology(Box<Error>),
    /// A concurrent caller's fetch failed while this one waited for it.
    SharedFailure(String),
    Fetch(Box<Error>),
    Command(Box<Error>),
    UnknownUnit(UnitAddress),
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::HttpStatus { path, code } => write!(f, "HTTP {code} from {path}"),
            Error::GatewayStatus { path, status } => {
                write!(f, "gateway reported status {status:?} for {path}")
            }
            Error::Decode(e) => write!(f, "decode error: {e}"),
            Error::Topology(e) => write!(f, "topology unavailable: {e}"),
            Error::SharedFailure(msg) => write!(f, "shared fetch failed: {msg}"),
            Error::Fetch(e) => write!(f, "unit data fetch failed: {e}"),
            Error::Command(e) => write!(f, "command failed: {e}"),
            Error::UnknownUnit(addr) => write!(f, "unknown unit: {addr}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Topology(e) | Error::Fetch(e) | Error::Command(e) => Some(e.as_ref()),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
