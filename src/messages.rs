//! Spontaneous device messages.
//!
//! Some devices emit messages nobody asked for (alarms, boot banners, state
//! changes). A [`DeviceMessageSet`] lists the byte sequences to recognise and
//! a human-readable translation for each. The engine only looks for them
//! after every outstanding command failed to match.

use crate::matcher::earliest_occurrence;
use memchr::memmem;
use std::ops::Range;

/// A device message located inside the accumulated bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMatch {
    pub span: Range<usize>,
    pub message: Vec<u8>,
    pub translation: String,
}

/// Known spontaneous messages with their translations, in declaration order.
#[derive(Debug, Clone, Default)]
pub struct DeviceMessageSet {
    messages: Vec<(Vec<u8>, String)>,
    terminator: Vec<u8>,
}

impl DeviceMessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Terminator stripped from messages when rendering them for display.
    /// Not used for matching.
    pub fn with_terminator(mut self, terminator: impl Into<Vec<u8>>) -> Self {
        self.terminator = terminator.into();
        self
    }

    /// Add a message. Re-inserting a known message replaces its translation
    /// and keeps its position. Empty messages are ignored.
    pub fn insert(&mut self, message: impl Into<Vec<u8>>, translation: impl Into<String>) {
        let message = message.into();
        if message.is_empty() {
            return;
        }
        let translation = translation.into();
        match self.messages.iter_mut().find(|(m, _)| *m == message) {
            Some((_, existing)) => *existing = translation,
            None => self.messages.push((message, translation)),
        }
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> impl Iterator<Item = &[u8]> {
        self.messages.iter().map(|(m, _)| m.as_slice())
    }

    /// Translation of `message`, falling back to its display text when none
    /// was configured.
    pub fn translation(&self, message: &[u8]) -> Option<String> {
        self.messages
            .iter()
            .find(|(m, _)| m == message)
            .map(|(m, t)| {
                if t.is_empty() {
                    self.display_text(m)
                } else {
                    t.clone()
                }
            })
    }

    /// Lossy text rendering of `message` without its trailing terminator.
    pub fn display_text(&self, message: &[u8]) -> String {
        let trimmed = if !self.terminator.is_empty() && message.ends_with(&self.terminator) {
            &message[..message.len() - self.terminator.len()]
        } else {
            message
        };
        String::from_utf8_lossy(trimmed).into_owned()
    }

    /// Every known message found in `buffer`, ordered by the start index of
    /// its first occurrence. Ties prefer the longer message, then the one
    /// declared first.
    pub fn find_messages(&self, buffer: &[u8]) -> Vec<MessageMatch> {
        let mut found: Vec<(usize, MessageMatch)> = self
            .messages
            .iter()
            .enumerate()
            .filter_map(|(index, (message, _))| {
                memmem::find(buffer, message).map(|start| {
                    (index, self.to_match(message, start..start + message.len()))
                })
            })
            .collect();
        found.sort_by(|(ia, a), (ib, b)| {
            a.span
                .start
                .cmp(&b.span.start)
                .then(b.span.len().cmp(&a.span.len()))
                .then(ia.cmp(ib))
        });
        found.into_iter().map(|(_, m)| m).collect()
    }

    /// The earliest known message in `buffer`, if any.
    pub fn find_message(&self, buffer: &[u8]) -> Option<MessageMatch> {
        let (index, span) = earliest_occurrence(buffer, self.messages())?;
        let (message, _) = &self.messages[index];
        Some(self.to_match(message, span))
    }

    fn to_match(&self, message: &[u8], span: Range<usize>) -> MessageMatch {
        MessageMatch {
            span,
            message: message.to_vec(),
            translation: self.translation(message).unwrap_or_default(),
        }
    }
}
