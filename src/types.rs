//! Types module for the main runtime, exposing error and result types.
//!
//! Errors raised anywhere in the crate are coerced into a single string
//! backed error type, which is what ends up being printed by `main`.
use logger::SetLoggerError;
use quick_xml::events::Event;
use quick_xml::Reader;
use rusoto_core::request;

use std::fmt::{self, Debug, Display, Formatter};
use std::{io, num};

use crate::range::InvalidRangeError;

/// Public type alias for a result with a `UtilError` error type.
pub type UtilResult<T> = Result<T, UtilError>;

/// Delegating error wrapper for all errors raised while fetching.
///
/// Only the message of the source error is kept; nothing downstream
/// needs to branch on the error kind.
pub struct UtilError(String);

impl Debug for UtilError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl Display for UtilError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for UtilError {}

/// Macro to implement `From` for provided types.
macro_rules! derive_from {
    ($type:ty) => {
        impl<'a> From<$type> for UtilError {
            fn from(t: $type) -> UtilError {
                UtilError(t.to_string())
            }
        }
    };
}

derive_from!(&'a str);
derive_from!(io::Error);
derive_from!(num::ParseIntError);
derive_from!(clap::Error);
derive_from!(SetLoggerError);
derive_from!(regex::Error);
derive_from!(request::TlsError);
derive_from!(InvalidRangeError);
derive_from!(String);

/// Pulls the `<Message>` text out of an AWS XML error body.
///
/// Returns `None` when the body is not XML or carries no message.
fn xml_message(body: &str) -> Option<String> {
    if !body.starts_with("<?xml") {
        return None;
    }

    let mut reader = Reader::from_str(body);
    let mut buffer = Vec::new();

    loop {
        match reader.read_event(&mut buffer) {
            Ok(Event::Eof) | Err(_) => return None,
            Ok(Event::Start(ref e)) if e.name() == b"Message" => {
                return reader.read_text(b"Message", &mut Vec::new()).ok();
            }
            _ => (),
        }
        buffer.clear();
    }
}

/// Macro to implement `From` for Rusoto types.
macro_rules! derive_from_rusoto {
    ($type:ty) => {
        impl From<rusoto_core::RusotoError<$type>> for UtilError {
            /// Converts a Rusoto error to a `UtilError`.
            fn from(err: rusoto_core::RusotoError<$type>) -> UtilError {
                let msg = err.to_string();
                UtilError(xml_message(&msg).unwrap_or(msg))
            }
        }
    };
}

// S3 operations
derive_from_rusoto!(rusoto_s3::GetObjectError);
derive_from_rusoto!(rusoto_s3::ListObjectsV2Error);

// STS operations
derive_from_rusoto!(rusoto_sts::AssumeRoleError);
derive_from_rusoto!(rusoto_sts::GetSessionTokenError);
