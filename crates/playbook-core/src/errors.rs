use error_stack::{Context, Report};
use std::fmt;

/// Failure kinds surfaced by the playbook engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybookError {
    /// Malformed playbook: bad selector, unknown reference, duplicate name, wrong type
    Validation,
    /// A reference could not be resolved right before a command ran
    Resolution,
    /// Node connectivity or a node-side rejection
    Network,
    /// No usable key for the sending wallet, or signing failed
    Signer,
    /// ABI encoding or decoding failed
    Codec,
    /// Solidity compilation or artifact loading failed
    Compilation,
    /// A submitted transaction did not reach a successful receipt
    Confirmation(ConfirmationFailure),
}

/// How a confirmation wait ended when it did not end in success
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationFailure {
    /// Mined with receipt status 0
    Reverted,
    /// The await deadline passed before a receipt was seen
    TimedOut,
    /// The wait was interrupted by the operator
    Cancelled,
}

impl fmt::Display for PlaybookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybookError::Validation => write!(f, "playbook validation failed"),
            PlaybookError::Resolution => write!(f, "unable to resolve value"),
            PlaybookError::Network => write!(f, "node request failed"),
            PlaybookError::Signer => write!(f, "signer operation failed"),
            PlaybookError::Codec => write!(f, "ABI encoding/decoding error"),
            PlaybookError::Compilation => write!(f, "contract compilation failed"),
            PlaybookError::Confirmation(failure) => write!(f, "{}", failure),
        }
    }
}

impl fmt::Display for ConfirmationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfirmationFailure::Reverted => write!(f, "transaction was mined but reverted"),
            ConfirmationFailure::TimedOut => {
                write!(f, "transaction was sent but confirmation timed out")
            }
            ConfirmationFailure::Cancelled => {
                write!(f, "transaction was sent but confirmation was cancelled")
            }
        }
    }
}

impl Context for PlaybookError {}

pub type PlaybookResult<T> = Result<T, Report<PlaybookError>>;

/// Where in the playbook a validation problem was found
#[derive(Debug, Clone)]
pub struct ValidationSite {
    pub section: &'static str,
    pub name: String,
}

impl fmt::Display for ValidationSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "section {}, entry '{}'", self.section, self.name)
    }
}

/// Transaction a failure relates to
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub hash: String,
}

impl fmt::Display for TransactionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transaction {}", self.hash)
    }
}

pub trait PlaybookErrorExt {
    fn with_site(self, section: &'static str, name: impl Into<String>) -> Self;

    fn with_transaction(self, hash: impl Into<String>) -> Self;
}

impl<T> PlaybookErrorExt for PlaybookResult<T> {
    fn with_site(self, section: &'static str, name: impl Into<String>) -> Self {
        self.map_err(|e| e.attach(ValidationSite { section, name: name.into() }))
    }

    fn with_transaction(self, hash: impl Into<String>) -> Self {
        self.map_err(|e| e.attach(TransactionInfo { hash: hash.into() }))
    }
}

#[macro_export]
macro_rules! playbook_error {
    ($error:expr, $($arg:tt)*) => {{
        error_stack::Report::new($error).attach_printable(format!($($arg)*))
    }};
}

/// Message lines attached to a report, outermost first
pub fn report_messages(report: &Report<PlaybookError>) -> Vec<String> {
    report
        .frames()
        .filter_map(|frame| match frame.kind() {
            error_stack::FrameKind::Attachment(error_stack::AttachmentKind::Printable(p)) => {
                Some(p.to_string())
            }
            _ => None,
        })
        .collect()
}

/// One-line rendering used in result output
pub fn report_summary(report: &Report<PlaybookError>) -> String {
    let messages = report_messages(report);
    if messages.is_empty() {
        report.current_context().to_string()
    } else {
        format!("{}: {}", report.current_context(), messages.join(": "))
    }
}
