//! Response matching.
//!
//! Pure functions mapping the accumulated response bytes and a command's
//! [`MatchSpec`] to the span of its response. Nothing here mutates the
//! buffer; the engine consumes the span after a successful match.

use crate::command::MatchSpec;
use memchr::memmem;
use std::ops::Range;

/// A response located inside the accumulated bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMatch {
    /// Half-open byte range of the response within the buffer. Never empty.
    pub span: Range<usize>,
    /// Copy of the matched bytes.
    pub bytes: Vec<u8>,
}

impl ResponseMatch {
    fn new(buffer: &[u8], span: Range<usize>) -> Self {
        Self {
            bytes: buffer[span.clone()].to_vec(),
            span,
        }
    }
}

/// Find the response described by `spec` in `buffer`.
///
/// - `Pattern`: leftmost regex match.
/// - `ExpectedResponses`: earliest-starting candidate; ties go to the longer
///   candidate, then to the one declared first.
/// - `FixedByteCount(n)`: the first `n` bytes, once at least `n` are buffered.
pub fn find_match(buffer: &[u8], spec: &MatchSpec) -> Option<ResponseMatch> {
    match spec {
        MatchSpec::Pattern(regex) => regex
            .find(buffer)
            .filter(|m| !m.is_empty())
            .map(|m| ResponseMatch::new(buffer, m.range())),
        MatchSpec::ExpectedResponses(candidates) => {
            earliest_occurrence(buffer, candidates.iter().map(Vec::as_slice))
                .map(|(_, span)| ResponseMatch::new(buffer, span))
        }
        MatchSpec::FixedByteCount(count) => {
            if *count == 0 || buffer.len() < *count {
                return None;
            }
            Some(ResponseMatch::new(buffer, 0..*count))
        }
    }
}

/// Earliest occurrence of any needle in `haystack`, as `(needle index, span)`.
///
/// Ties on the start index prefer the longer needle, then the lower index.
/// Empty needles never match.
pub(crate) fn earliest_occurrence<'a, I>(haystack: &[u8], needles: I) -> Option<(usize, Range<usize>)>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut best: Option<(usize, Range<usize>)> = None;
    for (index, needle) in needles.into_iter().enumerate() {
        if needle.is_empty() {
            continue;
        }
        let Some(start) = memmem::find(haystack, needle) else {
            continue;
        };
        let span = start..start + needle.len();
        let better = match &best {
            None => true,
            Some((_, current)) => {
                span.start < current.start
                    || (span.start == current.start && span.len() > current.len())
            }
        };
        if better {
            best = Some((index, span));
        }
    }
    best
}
