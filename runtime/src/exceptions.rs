//! Exception Mapping (§4.4, §9, §10): a registry from remote exception
//! *type name* to a local constructor, grounded in
//! `original_source/octue/exceptions.py`'s hierarchy. Unknown names fall back
//! to [`RuntimeError::Remote`], never a silent coercion into the wrong local
//! type.

use std::collections::HashSet;

use crate::envelope::TracebackFrame;
use crate::error::RuntimeError;

/// Exception type names the runtime recognises as "known" when reconstructing
/// a remote error (§10). This is deliberately a name registry, not a
/// constructor registry with differing payload shapes: every known exception
/// in this SDK carries the same `(message, traceback)` shape, so recognising
/// the name is enough to produce [`RuntimeError::Known`] with the right
/// `exception_type` instead of falling back to [`RuntimeError::Remote`].
#[derive(Debug, Clone)]
pub struct ExceptionMapping {
    known: HashSet<&'static str>,
}

const KNOWN_EXCEPTION_TYPES: &[&str] = &[
    "InvalidInputException",
    "InvalidManifestContents",
    "InvalidManifestTypeException",
    "ManifestNotFoundException",
    "FileNotFoundException",
    "FolderNotFoundException",
    "InvalidOctueFileTypeException",
    "InvalidFilePointerException",
    "NotImplementedYetException",
    "UnexpectedNumberOfResultsException",
    "InvalidTagException",
    "FileLocationError",
    "ServiceNotFound",
    "PushSubscriptionCannotBePulled",
    "InvalidMonitorMessage",
    "QuestionNotDelivered",
    "AnswerTimeout",
];

impl Default for ExceptionMapping {
    fn default() -> Self {
        Self {
            known: KNOWN_EXCEPTION_TYPES.iter().copied().collect(),
        }
    }
}

impl ExceptionMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an additional exception type name recognised by an
    /// embedding application, beyond the built-in set.
    pub fn register(&mut self, exception_type: &'static str) {
        self.known.insert(exception_type);
    }

    /// Reconstructs a [`RuntimeError`] from a terminal error envelope,
    /// looking `exception_type` up in the registry (§4.4.5, §9).
    pub fn reconstruct(&self, exception_type: &str, message: String, traceback: Vec<TracebackFrame>) -> RuntimeError {
        match self.known.iter().find(|&&name| name == exception_type) {
            Some(&name) => RuntimeError::Known {
                exception_type: name,
                message,
                traceback,
            },
            None => RuntimeError::Remote {
                type_name: exception_type.to_string(),
                message,
                traceback,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_exception_type_reconstructs_with_preserved_message() {
        let mapping = ExceptionMapping::new();
        let error = mapping.reconstruct(
            "InvalidManifestContents",
            "'met_mast_id' is a required property".to_string(),
            vec!["line 1".to_string()],
        );
        match error {
            RuntimeError::Known { exception_type, message, .. } => {
                assert_eq!(exception_type, "InvalidManifestContents");
                assert_eq!(message, "'met_mast_id' is a required property");
            }
            other => panic!("expected Known, got {other:?}"),
        }
    }

    #[test]
    fn unknown_exception_type_falls_back_to_generic_remote_error() {
        let mapping = ExceptionMapping::new();
        let error = mapping.reconstruct(
            "AnUnknownException",
            "This is an exception unknown to the asker.".to_string(),
            vec![],
        );
        match error {
            RuntimeError::Remote { type_name, message, .. } => {
                assert_eq!(type_name, "AnUnknownException");
                assert_eq!(message, "This is an exception unknown to the asker.");
            }
            other => panic!("expected Remote, got {other:?}"),
        }
    }
}
