//! Spans and line bookkeeping shared by the lexer and parser.

use crate::script::ScriptError;
use chumsky::error::RichReason;
use chumsky::prelude::*;
use std::fmt;

pub type Span = SimpleSpan;
pub type ParseError<'code, T> = Rich<'code, T, Span>;

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned<T> {
    pub span: Span,
    pub node: T,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { span, node }
    }
}

/// Byte offsets of every line start, for turning spans into `line:column`.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(source: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(source.match_indices('\n').map(|(offset, _)| offset + 1))
            .collect();
        Self { starts }
    }

    /// 1-based line containing `offset`.
    pub fn line(&self, offset: usize) -> usize {
        self.starts.partition_point(|&start| start <= offset).max(1)
    }

    /// Byte offset where the 1-based `line` begins.
    pub fn line_start(&self, line: usize) -> usize {
        self.starts
            .get(line.saturating_sub(1))
            .copied()
            .unwrap_or_default()
    }

    /// 1-based line and column (counted in characters) of `offset`.
    pub fn position(&self, source: &str, offset: usize) -> (usize, usize) {
        let line = self.line(offset);
        let start = self.line_start(line);
        let column = source
            .get(start..offset.min(source.len()))
            .map(|text| text.chars().count())
            .unwrap_or(offset.saturating_sub(start));
        (line, column + 1)
    }
}

/// Converts the earliest reported error into a [`ScriptError::Syntax`].
pub fn syntax_error<T: fmt::Display>(
    source: &str,
    lines: &LineIndex,
    errors: Vec<ParseError<'_, T>>,
) -> Option<ScriptError> {
    let error = errors.into_iter().min_by_key(|error| error.span().start)?;
    let (line, column) = lines.position(source, error.span().start);
    let message = match error.reason() {
        RichReason::Custom(message) => message.to_string(),
        _ => match error.found() {
            Some(found) => format!("Unexpected token {}", found),
            None => "Unexpected end of input".to_string(),
        },
    };
    Some(ScriptError::Syntax {
        line,
        column,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_map_to_lines_and_columns() {
        let source = "const a = 1\nconst é = 2\n";
        let lines = LineIndex::new(source);
        assert_eq!(lines.position(source, 0), (1, 1));
        assert_eq!(lines.position(source, 12), (2, 1));
        // `=` sits after a two-byte character
        let offset = source.find("= 2").unwrap_or_default();
        assert_eq!(lines.position(source, offset), (2, 9));
        assert_eq!(lines.line(source.len()), 3);
    }
}
