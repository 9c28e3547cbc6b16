use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// What produced a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum DiagnosticSource {
    PriceLookup,
    CategoryLookup,
    Coercion,
    Console,
    Script,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub level: DiagnosticLevel,
    pub source: DiagnosticSource,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.source, self.message)
    }
}

/// Ordered log of everything noteworthy that happened during one run.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: DiagnosticLevel, source: DiagnosticSource, message: impl Into<String>) {
        self.entries.push(Diagnostic {
            level,
            source,
            message: message.into(),
        });
    }

    pub fn debug(&mut self, source: DiagnosticSource, message: impl Into<String>) {
        self.push(DiagnosticLevel::Debug, source, message);
    }

    pub fn warn(&mut self, source: DiagnosticSource, message: impl Into<String>) {
        self.push(DiagnosticLevel::Warn, source, message);
    }

    pub fn error(&mut self, source: DiagnosticSource, message: impl Into<String>) {
        self.push(DiagnosticLevel::Error, source, message);
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn count_at_least(&self, level: DiagnosticLevel) -> usize {
        self.entries.iter().filter(|d| d.level >= level).count()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}
