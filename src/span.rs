use serde::{Deserialize, Serialize};

/// Byte-offset span in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub file_id: u32,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end, file_id: 0 }
    }

    pub fn with_file(start: usize, end: usize, file_id: u32) -> Self {
        Self { start, end, file_id }
    }

    pub fn dummy() -> Self {
        Self::default()
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            file_id: self.file_id,
        }
    }

    /// 1-based (line, column) of the span start within `source`.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let offset = self.start.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let col = match before.rfind('\n') {
            Some(nl) => offset - nl,
            None => offset + 1,
        };
        (line, col)
    }
}

/// A value annotated with its source span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spanned<T> {
    pub node: T,
    pub span: Span,
}

impl<T> Spanned<T> {
    pub fn new(node: T, span: Span) -> Self {
        Self { node, span }
    }

    pub fn dummy(node: T) -> Self {
        Self { node, span: Span::dummy() }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
        Spanned { node: f(self.node), span: self.span }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_to_covers_both() {
        let a = Span::new(4, 8);
        let b = Span::new(10, 12);
        assert_eq!(a.to(b), Span::new(4, 12));
        assert_eq!(b.to(a), Span::new(4, 12));
    }

    #[test]
    fn line_col_first_line() {
        let src = "x = 1\ny = 2\n";
        assert_eq!(Span::new(0, 1).line_col(src), (1, 1));
        assert_eq!(Span::new(4, 5).line_col(src), (1, 5));
    }

    #[test]
    fn line_col_later_line() {
        let src = "x = 1\ny = 2\n";
        assert_eq!(Span::new(6, 7).line_col(src), (2, 1));
        assert_eq!(Span::new(10, 11).line_col(src), (2, 5));
    }

    #[test]
    fn line_col_clamps_past_end() {
        let src = "ab";
        assert_eq!(Span::new(99, 100).line_col(src), (1, 3));
    }

    #[test]
    fn spanned_map_keeps_span() {
        let s = Spanned::new(2, Span::new(1, 3)).map(|n| n * 10);
        assert_eq!(s.node, 20);
        assert_eq!(s.span, Span::new(1, 3));
    }

    #[test]
    fn spanned_dummy() {
        let s = Spanned::dummy("x");
        assert_eq!(s.span, Span::dummy());
    }
}
