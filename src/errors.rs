use std::fmt;
use std::io;
use std::num::{ParseFloatError, ParseIntError};
use std::str::Utf8Error;
use std::string::FromUtf8Error;

use quick_xml::events::attributes::AttrError;

#[derive(Debug)]
pub struct Error {
    pub message: String,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for Error {}

/// Errors of other crates only travel as their message.
macro_rules! error_from {
    ($($source:ty),* $(,)?) => {
        $(
            impl From<$source> for Error {
                fn from(value: $source) -> Self {
                    Error {
                        message: value.to_string(),
                    }
                }
            }
        )*
    };
}

error_from!(
    io::Error,
    quick_xml::Error,
    AttrError,
    ParseFloatError,
    ParseIntError,
    Utf8Error,
    FromUtf8Error,
    chrono::ParseError,
    serde_json::Error,
    &str,
);

impl From<String> for Error {
    fn from(value: String) -> Self {
        Error { message: value }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
