//! Messages reported back to the build.

use std::fmt;
use std::sync::Mutex;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Error,
    Note,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub message: String,
    /// Binary name of the element the message is about.
    pub element: Option<String>,
    /// Descriptor of the annotation the message is about.
    pub annotation: Option<String>,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            DiagnosticKind::Error => "error",
            DiagnosticKind::Note => "note",
        };
        match &self.element {
            Some(element) => write!(f, "{kind}: {element}: {}", self.message),
            None => write!(f, "{kind}: {}", self.message),
        }
    }
}

/// Collects diagnostics from any thread.
#[derive(Debug, Default)]
pub struct Messager {
    diagnostics: Mutex<Vec<Diagnostic>>,
}

impl Messager {
    pub fn note(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("{}", message);
        self.push(Diagnostic {
            kind: DiagnosticKind::Note,
            message,
            element: None,
            annotation: None,
        });
    }

    pub fn error(&self, message: impl Into<String>, element: &str, annotation: &str) {
        let message = message.into();
        error!("{}: {}", element, message);
        self.push(Diagnostic {
            kind: DiagnosticKind::Error,
            message,
            element: Some(element.to_string()),
            annotation: Some(annotation.to_string()),
        });
    }

    /// Reports an error together with every cause beneath it.
    pub fn fatal(&self, err: &(dyn std::error::Error + 'static)) {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(cause) = source {
            message.push_str("\nCaused by: ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        error!("{}", message);
        self.push(Diagnostic {
            kind: DiagnosticKind::Error,
            message,
            element: None,
            annotation: None,
        });
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.lock().clone()
    }

    pub fn has_errors(&self) -> bool {
        self.lock()
            .iter()
            .any(|diagnostic| diagnostic.kind == DiagnosticKind::Error)
    }

    fn push(&self, diagnostic: Diagnostic) {
        self.lock().push(diagnostic);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Diagnostic>> {
        self.diagnostics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
