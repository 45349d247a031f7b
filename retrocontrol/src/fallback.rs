//! Ordered alternate sources for the clip being played.

use std::collections::HashSet;

use retrocatalog::{Clip, Source};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct SourceFallback {
    clip_id: Option<String>,
    sources: Vec<Source>,
    cursor: usize,
    failed: HashSet<String>,
}

impl SourceFallback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Follows `clip`; resets cursor and failures when the clip changes.
    pub fn set_clip(&mut self, clip: &Clip) {
        if self.clip_id.as_deref() == Some(clip.id.as_str()) {
            return;
        }
        self.clip_id = Some(clip.id.clone());
        self.sources = clip.sources.clone();
        self.cursor = 0;
        self.failed.clear();
    }

    pub fn clip_id(&self) -> Option<&str> {
        self.clip_id.as_deref()
    }

    /// First source not marked failed
    pub fn current_source(&self) -> Option<&Source> {
        self.sources[self.cursor.min(self.sources.len())..]
            .iter()
            .find(|s| !self.failed.contains(&s.id))
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Marks the current source failed and moves to the next candidate.
    ///
    /// Returns the new current source, if any.
    pub fn mark_failed(&mut self) -> Option<&Source> {
        if let Some(source) = self.current_source().cloned() {
            debug!(source = %source.id, "Source marked failed");
            self.failed.insert(source.id);
        }
        while self.cursor < self.sources.len() && self.failed.contains(&self.sources[self.cursor].id) {
            self.cursor += 1;
        }
        self.current_source()
    }

    /// Whether a source remains after the current one
    pub fn has_more(&self) -> bool {
        let Some(current) = self.current_source() else {
            return false;
        };
        self.sources
            .iter()
            .skip(self.cursor)
            .any(|s| s.id != current.id && !self.failed.contains(&s.id))
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_source().is_none()
    }

    pub fn reset(&mut self) {
        self.clip_id = None;
        self.sources.clear();
        self.cursor = 0;
        self.failed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(id: &str, sources: &[&str]) -> Clip {
        Clip::new(
            id,
            sources.iter().map(|s| Source::new(*s, "src")).collect(),
            10.0,
        )
    }

    #[test]
    fn test_walks_sources_in_order() {
        let mut fallback = SourceFallback::new();
        fallback.set_clip(&clip("b", &["b0", "b1", "b2"]));

        assert_eq!(fallback.current_source().unwrap().id, "b0");
        assert!(fallback.has_more());
        assert_eq!(fallback.mark_failed().unwrap().id, "b1");
        assert_eq!(fallback.cursor(), 1);
        assert_eq!(fallback.mark_failed().unwrap().id, "b2");
        assert!(!fallback.has_more());
        assert!(fallback.mark_failed().is_none());
        assert!(fallback.is_exhausted());
    }

    #[test]
    fn test_resets_on_clip_change_only() {
        let mut fallback = SourceFallback::new();
        let b = clip("b", &["b0", "b1"]);
        fallback.set_clip(&b);
        fallback.mark_failed();

        fallback.set_clip(&b);
        assert_eq!(fallback.current_source().unwrap().id, "b1");

        fallback.set_clip(&clip("c", &["c0"]));
        assert_eq!(fallback.current_source().unwrap().id, "c0");
        assert_eq!(fallback.cursor(), 0);
    }

    #[test]
    fn test_clip_without_sources() {
        let mut fallback = SourceFallback::new();
        fallback.set_clip(&clip("x", &[]));
        assert!(fallback.current_source().is_none());
        assert!(!fallback.has_more());
        assert!(fallback.mark_failed().is_none());
    }
}
