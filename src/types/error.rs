use std::io;

use anyhow::Error;
use thiserror::Error;

/// Service error codes that are worth retrying.
const TRANSIENT_ERROR_CODES: &[&str] = &[
    "InternalError",
    "RequestTimeTooSkewed",
    "SlowDown",
    "RequestTimeout",
    "ServiceUnavailable",
    "Throttling",
    "ThrottlingException",
    "ThrottledException",
    "RequestLimitExceeded",
    "TooManyRequestsException",
    "BandwidthLimitExceeded",
    "RequestThrottled",
    "RequestThrottledException",
    "ProvisionedThroughputExceededException",
    "EC2ThrottledException",
    "PriorRequestNotComplete",
    "TransactionInProgressException",
    "IDPCommunicationError",
];

const TRANSIENT_HTTP_STATUS_CODES: &[u16] = &[429, 500, 502, 503, 504];

const TRANSIENT_IO_ERROR_KINDS: &[io::ErrorKind] = &[
    io::ErrorKind::ConnectionReset,
    io::ErrorKind::ConnectionAborted,
    io::ErrorKind::ConnectionRefused,
    io::ErrorKind::TimedOut,
    io::ErrorKind::Interrupted,
    io::ErrorKind::BrokenPipe,
    io::ErrorKind::UnexpectedEof,
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum S3bulkError {
    #[error("invalid location '{location}': {reason}")]
    InvalidLocation { location: String, reason: String },
    #[error("listing '{location}' failed: {message}")]
    ListError { location: String, message: String },
    #[error("{operation} failed with a transient error ({code}): {message}")]
    TransientApiError {
        operation: String,
        code: String,
        message: String,
    },
    #[error("{operation} failed ({code}): {message}")]
    PermanentApiError {
        operation: String,
        code: String,
        message: String,
    },
    #[error("{0}")]
    PolicyViolation(String),
    #[error(
        "multipart transfer failed after {completed_parts} of {total_parts} parts: {cause}"
    )]
    PartialTransferError {
        completed_parts: usize,
        total_parts: usize,
        cause: String,
    },
    #[error("no object found: {0}")]
    NoObjectFound(String),
    #[error("a object references a parent directory.")]
    DirectoryTraversalError,
    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Transient,
    Permanent,
}

pub fn classify_service_error(code: Option<&str>, http_status: Option<u16>) -> ErrorClass {
    if let Some(code) = code {
        if TRANSIENT_ERROR_CODES.contains(&code) {
            return ErrorClass::Transient;
        }
    }

    if let Some(status) = http_status {
        if TRANSIENT_HTTP_STATUS_CODES.contains(&status) {
            return ErrorClass::Transient;
        }
    }

    ErrorClass::Permanent
}

pub fn classify_io_error(kind: io::ErrorKind) -> ErrorClass {
    if TRANSIENT_IO_ERROR_KINDS.contains(&kind) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Walks the whole error chain. The first classified error decides.
pub fn is_transient_error(e: &Error) -> bool {
    for cause in e.chain() {
        if let Some(error) = cause.downcast_ref::<S3bulkError>() {
            return matches!(error, S3bulkError::TransientApiError { .. });
        }

        if let Some(error) = cause.downcast_ref::<io::Error>() {
            return classify_io_error(error.kind()) == ErrorClass::Transient;
        }
    }

    false
}

pub fn is_cancelled_error(e: &Error) -> bool {
    if let Some(err) = e.downcast_ref::<S3bulkError>() {
        return *err == S3bulkError::Cancelled;
    }

    false
}
