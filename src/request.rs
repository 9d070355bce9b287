//! The unit of work handed to the invoker.

use serde::{Deserialize, Serialize};

/// One independent request: an identifier plus an opaque payload.
///
/// The identifier travels with the result so callers can correlate
/// failures with their inputs; it does not need to be unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request<T> {
    pub id: String,
    pub payload: T,
}

impl<T> Request<T> {
    pub fn new(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Wrap payloads into requests identified by their 1-based position.
pub fn numbered<T>(payloads: impl IntoIterator<Item = T>) -> Vec<Request<T>> {
    payloads
        .into_iter()
        .enumerate()
        .map(|(i, p)| Request::new((i + 1).to_string(), p))
        .collect()
}
