// conduit-core/src/services/shatter.rs
//! Content boundaries and pre-buffer chunk splitting.
//!
//! The bold-span rule is a heuristic (nested emphasis can fool it), so it sits
//! behind [`BoundaryDetector`] and can be swapped for any predicate.

use std::ops::Range;
use std::sync::Arc;

use crate::entry::Record;

pub trait BoundaryDetector: Send + Sync {
    /// Byte offsets where a new section begins, ascending. Every offset is a
    /// char boundary strictly inside `text`.
    fn boundaries(&self, text: &str) -> Vec<usize>;

    /// Each boundary plus the marker that establishes it, e.g. a heading and
    /// the blank line after it. Defaults to zero-width markers.
    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        self.boundaries(text).into_iter().map(|at| at..at).collect()
    }

    fn first(&self, text: &str) -> Option<usize> {
        self.boundaries(text).into_iter().next()
    }

    fn last(&self, text: &str) -> Option<usize> {
        self.boundaries(text).into_iter().last()
    }
}

/// `**Heading**` immediately followed by a blank line marks the start of a
/// new section. The split lands on the opening `**`, so the heading travels
/// with the text after it.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoldSpanBoundary;

impl BoundaryDetector for BoldSpanBoundary {
    fn boundaries(&self, text: &str) -> Vec<usize> {
        self.spans(text).into_iter().map(|span| span.start).collect()
    }

    fn spans(&self, text: &str) -> Vec<Range<usize>> {
        let mut out = Vec::new();
        let mut i = 0usize;
        while let Some(rel) = text[i..].find("**") {
            let open = i + rel;
            let body_start = open + 2;
            let Some(close_rel) = text[body_start..].find("**") else {
                break;
            };
            let close = body_start + close_rel;
            let body = &text[body_start..close];
            let after = close + 2;

            if !body.trim().is_empty() && !body.contains('\n') && text[after..].starts_with("\n\n") {
                if open > 0 {
                    out.push(open..after + 2);
                }
                i = after;
            } else {
                // the closing marker may open the real span
                i = close;
            }
        }
        out
    }
}

/// Adapts a plain function into a detector.
pub struct FnBoundary<F>(pub F);

impl<F> BoundaryDetector for FnBoundary<F>
where
    F: Fn(&str) -> Vec<usize> + Send + Sync,
{
    fn boundaries(&self, text: &str) -> Vec<usize> {
        (self.0)(text)
    }
}

/// Runs on each incoming chunk before it is buffered. An empty result means
/// the chunk passes through as-is.
pub trait ShatterPolicy<E>: Send + Sync {
    fn shatter(&self, chunk: &E) -> Vec<E>;
}

/// Splits a chunk in two at its first boundary.
#[derive(Clone)]
pub struct BoundaryShatter {
    detector: Arc<dyn BoundaryDetector>,
}

impl BoundaryShatter {
    pub fn new(detector: impl BoundaryDetector + 'static) -> Self {
        Self {
            detector: Arc::new(detector),
        }
    }
}

impl Default for BoundaryShatter {
    fn default() -> Self {
        Self::new(BoldSpanBoundary)
    }
}

impl<E: Record> ShatterPolicy<E> for BoundaryShatter {
    fn shatter(&self, chunk: &E) -> Vec<E> {
        let text = chunk.payload();
        match self.detector.first(text) {
            Some(at) if at > 0 && at < text.len() && text.is_char_boundary(at) => vec![
                chunk.with_payload(text[..at].to_string()),
                chunk.with_payload(text[at..].to_string()),
            ],
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Entry;

    #[test]
    fn bold_span_needs_blank_line() {
        let d = BoldSpanBoundary;
        assert_eq!(d.boundaries("intro **Plan**\n\nbody"), vec![6]);
        assert!(d.boundaries("intro **Plan** body").is_empty());
        assert!(d.boundaries("intro **Plan**\nbody").is_empty());
    }

    #[test]
    fn span_covers_heading_and_blank_line() {
        assert_eq!(BoldSpanBoundary.spans("intro **Plan**\n\nbody"), vec![6..16]);
        let d = FnBoundary(|t: &str| t.find('|').into_iter().collect::<Vec<usize>>());
        assert_eq!(d.spans("a|b"), vec![1..1]);
    }

    #[test]
    fn leading_span_is_not_a_split_point() {
        assert!(BoldSpanBoundary.boundaries("**Plan**\n\nbody").is_empty());
    }

    #[test]
    fn inline_bold_before_real_heading_is_skipped() {
        let text = "a **b** c **Next**\n\nrest";
        assert_eq!(BoldSpanBoundary.boundaries(text), vec![10]);
    }

    #[test]
    fn shatter_splits_before_and_after() {
        let chunk = Entry::chunk("m", "t", "done. **Next**\n\nmore");
        let parts = BoundaryShatter::default().shatter(&chunk);
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].payload(), "done. ");
        assert_eq!(parts[1].payload(), "**Next**\n\nmore");
        assert_eq!(parts[1].turn(), Some("t"));
    }

    #[test]
    fn no_boundary_means_no_output() {
        let chunk = Entry::chunk("m", "t", "plain text");
        assert!(BoundaryShatter::default().shatter(&chunk).is_empty());
    }

    #[test]
    fn custom_predicate_plugs_in() {
        let d = FnBoundary(|t: &str| t.find("---").into_iter().filter(|i| *i > 0).collect::<Vec<usize>>());
        let chunk = Entry::chunk("m", "t", "one---two");
        let parts = BoundaryShatter::new(d).shatter(&chunk);
        assert_eq!(parts[1].payload(), "---two");
    }
}
