//! Ordered result windows.

/// An ordered slice of results.
///
/// `offset` is the position of the first entry in the full ranking;
/// `matches` is the total number of matching documents, which may exceed
/// the number of entries held.
#[derive(Debug, Clone, PartialEq)]
pub struct DocList {
    offset: usize,
    docs: Vec<u32>,
    scores: Option<Vec<f32>>,
    matches: usize,
    max_score: Option<f32>,
}

impl DocList {
    /// A list starting at rank 0.
    pub fn new(docs: Vec<u32>, scores: Option<Vec<f32>>, matches: usize, max_score: Option<f32>) -> Self {
        Self {
            offset: 0,
            docs,
            scores,
            matches,
            max_score,
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None, 0, None)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn docs(&self) -> &[u32] {
        &self.docs
    }

    pub fn scores(&self) -> Option<&[f32]> {
        self.scores.as_deref()
    }

    pub fn has_scores(&self) -> bool {
        self.scores.is_some()
    }

    pub fn matches(&self) -> usize {
        self.matches
    }

    pub fn max_score(&self) -> Option<f32> {
        self.max_score
    }

    /// Entries paired with their scores.
    pub fn iter(&self) -> impl Iterator<Item = (u32, Option<f32>)> + '_ {
        self.docs
            .iter()
            .enumerate()
            .map(|(i, &doc)| (doc, self.scores.as_ref().map(|s| s[i])))
    }

    /// The window `[offset, offset + len)` of the full ranking, or `None`
    /// when this list does not hold enough of it.
    ///
    /// Only valid on lists that start at rank 0.
    pub fn subset(&self, offset: usize, len: usize) -> Option<DocList> {
        let requested_end = offset.saturating_add(len);
        if requested_end > self.docs.len() && self.matches > self.docs.len() {
            return None;
        }
        Some(self.slice(offset, len))
    }

    /// The window clamped to what this list holds.
    pub fn slice(&self, offset: usize, len: usize) -> DocList {
        let start = offset.min(self.docs.len());
        let end = offset.saturating_add(len).min(self.docs.len());
        DocList {
            offset,
            docs: self.docs[start..end].to_vec(),
            scores: self.scores.as_ref().map(|s| s[start..end].to_vec()),
            matches: self.matches,
            max_score: self.max_score,
        }
    }
}
