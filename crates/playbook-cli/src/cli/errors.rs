//! Error types for the command line

use std::path::PathBuf;
use thiserror::Error;

use playbook_core::error_stack::Report;
use playbook_core::errors::{report_summary, ValidationSite};
use playbook_core::PlaybookError;

#[derive(Debug, Error)]
pub enum CliError {
    /// The playbook file could not be read or parsed
    #[error("failed to load playbook from {path}: {message}")]
    ManifestLoad { path: PathBuf, message: String },

    #[error("playbook validation failed: {0}")]
    Validation(String),

    #[error("'{0}' is neither a command nor a target")]
    UnknownCommand(String),

    #[error("'{name}' expects {expected} argument(s), {given} given")]
    ArgumentCount { name: String, expected: usize, given: usize },

    #[error("{0}")]
    Execution(String),
}

impl CliError {
    pub fn validation(report: &Report<PlaybookError>) -> CliError {
        CliError::Validation(describe(report))
    }

    pub fn execution(report: &Report<PlaybookError>) -> CliError {
        CliError::Execution(describe(report))
    }
}

/// Report summary, prefixed with the playbook location when one is attached.
pub fn describe(report: &Report<PlaybookError>) -> String {
    match report.downcast_ref::<ValidationSite>() {
        Some(site) => format!("{}: {}", site, report_summary(report)),
        None => report_summary(report),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playbook_core::errors::PlaybookErrorExt;
    use playbook_core::playbook_error;
    use playbook_core::PlaybookResult;

    #[test]
    fn test_validation_error_names_its_site() {
        let result: PlaybookResult<()> =
            Err(playbook_error!(PlaybookError::Validation, "unknown wallet 'dave'"));
        let report = result.with_site("WRITE", "pay").unwrap_err();
        let message = CliError::validation(&report).to_string();
        assert!(message.contains("section WRITE, entry 'pay'"));
        assert!(message.contains("unknown wallet 'dave'"));
    }

    #[test]
    fn test_argument_count_message() {
        let error = CliError::ArgumentCount { name: "pay".into(), expected: 2, given: 1 };
        assert_eq!(error.to_string(), "'pay' expects 2 argument(s), 1 given");
    }
}
