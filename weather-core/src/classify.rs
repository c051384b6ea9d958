//! Turns fetch failures into something a user can read.
//!
//! `retryable` only shapes the wording a UI offers ("try again" vs "check your
//! settings"). It never disables the retry action.

use serde::Serialize;

use crate::error::FetchError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub message: String,
    pub retryable: bool,
}

pub fn classify(failure: &FetchError) -> Classification {
    let (message, retryable) = match failure {
        FetchError::Transport(_) => ("Network unavailable. Check your connection.".to_string(), true),
        FetchError::Timeout => (
            "The weather service took too long to respond.".to_string(),
            true,
        ),
        FetchError::Status { status, .. } => classify_status(*status),
        FetchError::Malformed(_) => ("Received unreadable weather data.".to_string(), false),
    };

    Classification { message, retryable }
}

fn classify_status(status: u16) -> (String, bool) {
    match status {
        500..=599 => (
            format!("The weather service is having trouble (HTTP {status})."),
            true,
        ),
        408 | 429 => (
            format!("The weather service is busy (HTTP {status}). Try again shortly."),
            true,
        ),
        400..=499 => (
            format!("The weather request was rejected (HTTP {status})."),
            false,
        ),
        _ => (
            format!("Unexpected response from the weather service (HTTP {status})."),
            false,
        ),
    }
}
