//! Hit collection with document-set filtering, post filters and a time budget.
//!
//! Only the best `to_collect` hits are retained, in a buffer that is cut back
//! to that size whenever it doubles. Matches are counted separately, and the
//! full set of matching documents is only gathered when asked for.

use std::cmp::Ordering as CmpOrdering;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tantivy::collector::{Collector, SegmentCollector};
use tantivy::query::{Scorer, Weight};
use tantivy::{DocId, DocSet as TantivyDocSet, Score, SegmentOrdinal, SegmentReader};

use crate::docset::DocSet;
use crate::field_values::UninvertedField;
use crate::sort::{SortKey, SortSpec};

/// Documents between deadline checks.
const DEADLINE_CHECK_INTERVAL: u32 = 64;

/// One matching document in composite id space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub doc: u32,
    pub score: f32,
}

/// Total order over hits for a sort specification.
///
/// `columns` holds the values of each `SortKey::Field` key, aligned with the
/// spec's keys. Ties fall back to index order.
pub struct HitOrder {
    sort: SortSpec,
    columns: Vec<Option<Arc<UninvertedField>>>,
}

impl HitOrder {
    pub fn new(sort: SortSpec, columns: Vec<Option<Arc<UninvertedField>>>) -> Self {
        Self { sort, columns }
    }

    pub fn compare(&self, a: &Hit, b: &Hit) -> CmpOrdering {
        for (field, column) in self.sort.fields().iter().zip(&self.columns) {
            let ord = match (&field.key, column) {
                (SortKey::Score, _) => a.score.total_cmp(&b.score),
                (SortKey::IndexOrder, _) => a.doc.cmp(&b.doc),
                (SortKey::Field(_), Some(values)) => values.sort_value(a.doc).cmp(&values.sort_value(b.doc)),
                (SortKey::Field(_), None) => CmpOrdering::Equal,
            };
            let ord = if field.descending { ord.reverse() } else { ord };
            if ord != CmpOrdering::Equal {
                return ord;
            }
        }
        a.doc.cmp(&b.doc)
    }
}

/// Best `limit` hits seen so far, in no particular order until finished.
struct TopHits {
    limit: usize,
    order: Arc<HitOrder>,
    hits: Vec<Hit>,
}

impl TopHits {
    fn new(limit: usize, order: Arc<HitOrder>) -> Self {
        Self {
            limit,
            order,
            hits: Vec::new(),
        }
    }

    fn push(&mut self, hit: Hit) {
        if self.limit == 0 {
            return;
        }
        self.hits.push(hit);
        if self.hits.len() >= self.limit.saturating_mul(2) {
            self.cut();
        }
    }

    fn cut(&mut self) {
        if self.hits.len() > self.limit {
            let order = &self.order;
            self.hits.select_nth_unstable_by(self.limit, |a, b| order.compare(a, b));
            self.hits.truncate(self.limit);
        }
    }

    /// The retained hits, best first.
    fn finish(mut self) -> Vec<Hit> {
        self.cut();
        let order = &self.order;
        self.hits.sort_by(|a, b| order.compare(a, b));
        self.hits
    }
}

/// What collection produced.
#[derive(Debug, Default)]
pub struct CollectedHits {
    /// Every document that passed the filters.
    pub matches: usize,
    /// The best hits, best first.
    pub top: Vec<Hit>,
    /// Every matching document, when requested.
    pub docs: Option<Vec<u32>>,
}

impl CollectedHits {
    pub fn doc_set(&self, max_doc: u32) -> Option<DocSet> {
        self.docs
            .as_ref()
            .map(|docs| DocSet::from_docs(max_doc, docs.iter().copied()))
    }
}

/// Collects the top hits that pass the filters.
pub struct HitCollector {
    filter: Option<Arc<DocSet>>,
    post_filters: Vec<Box<dyn Weight>>,
    bases: Vec<u32>,
    deadline: Option<Instant>,
    timed_out: Arc<AtomicBool>,
    scoring: bool,
    order: Arc<HitOrder>,
    to_collect: usize,
    collect_docs: bool,
}

impl HitCollector {
    pub fn new(bases: Vec<u32>, scoring: bool, order: HitOrder, to_collect: usize) -> Self {
        Self {
            filter: None,
            post_filters: Vec::new(),
            bases,
            deadline: None,
            timed_out: Arc::new(AtomicBool::new(false)),
            scoring,
            order: Arc::new(order),
            to_collect,
            collect_docs: false,
        }
    }

    /// Also gather every matching document.
    pub fn with_doc_set(mut self, collect_docs: bool) -> Self {
        self.collect_docs = collect_docs;
        self
    }
    /// Only keep documents in `filter`.
    pub fn with_filter(mut self, filter: Option<Arc<DocSet>>) -> Self {
        self.filter = filter;
        self
    }

    /// Check each candidate against these weights, in order.
    pub fn with_post_filters(mut self, post_filters: Vec<Box<dyn Weight>>) -> Self {
        self.post_filters = post_filters;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set once collection stopped because the deadline passed.
    pub fn timed_out(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.timed_out)
    }
}

impl Collector for HitCollector {
    type Fruit = CollectedHits;
    type Child = SegmentHitCollector;

    fn for_segment(
        &self,
        segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let post_filters = self
            .post_filters
            .iter()
            .map(|weight| weight.scorer(segment, 1.0))
            .collect::<tantivy::Result<Vec<_>>>()?;

        Ok(SegmentHitCollector {
            base: self.bases.get(segment_local_id as usize).copied().unwrap_or(0),
            filter: self.filter.clone(),
            post_filters,
            deadline: self.deadline,
            timed_out: Arc::clone(&self.timed_out),
            seen: 0,
            matches: 0,
            top: TopHits::new(self.to_collect, Arc::clone(&self.order)),
            docs: self.collect_docs.then(Vec::new),
        })
    }

    fn requires_scoring(&self) -> bool {
        self.scoring
    }

    fn merge_fruits(&self, segment_fruits: Vec<CollectedHits>) -> tantivy::Result<CollectedHits> {
        let mut top = TopHits::new(self.to_collect, Arc::clone(&self.order));
        let mut merged = CollectedHits {
            docs: self.collect_docs.then(Vec::new),
            ..CollectedHits::default()
        };
        for fruit in segment_fruits {
            merged.matches += fruit.matches;
            for hit in fruit.top {
                top.push(hit);
            }
            if let (Some(all), Some(docs)) = (&mut merged.docs, fruit.docs) {
                all.extend(docs);
            }
        }
        merged.top = top.finish();
        Ok(merged)
    }
}

pub struct SegmentHitCollector {
    base: u32,
    filter: Option<Arc<DocSet>>,
    post_filters: Vec<Box<dyn Scorer>>,
    deadline: Option<Instant>,
    timed_out: Arc<AtomicBool>,
    seen: u32,
    matches: usize,
    top: TopHits,
    docs: Option<Vec<u32>>,
}

impl SegmentHitCollector {
    fn expired(&mut self) -> bool {
        if self.timed_out.load(Ordering::Relaxed) {
            return true;
        }
        let Some(deadline) = self.deadline else {
            return false;
        };
        let check = self.seen % DEADLINE_CHECK_INTERVAL == 0;
        self.seen = self.seen.wrapping_add(1);
        if check && Instant::now() >= deadline {
            self.timed_out.store(true, Ordering::Relaxed);
            return true;
        }
        false
    }

    fn passes_post_filters(&mut self, doc: DocId) -> bool {
        for scorer in &mut self.post_filters {
            if scorer.doc() < doc {
                scorer.seek(doc);
            }
            if scorer.doc() != doc {
                return false;
            }
        }
        true
    }
}

impl SegmentCollector for SegmentHitCollector {
    type Fruit = CollectedHits;

    fn collect(&mut self, doc: DocId, score: Score) {
        if self.expired() {
            return;
        }
        let global = self.base + doc;
        if let Some(filter) = &self.filter {
            if !filter.contains(global) {
                return;
            }
        }
        if !self.passes_post_filters(doc) {
            return;
        }
        self.matches += 1;
        if let Some(docs) = &mut self.docs {
            docs.push(global);
        }
        self.top.push(Hit { doc: global, score });
    }

    fn harvest(self) -> CollectedHits {
        CollectedHits {
            matches: self.matches,
            top: self.top.finish(),
            docs: self.docs,
        }
    }
}
