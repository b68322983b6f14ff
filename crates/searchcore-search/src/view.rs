//! Single id space over a multi-segment reader.
//!
//! Segments are laid end to end: a document's composite id is its segment's
//! base plus its segment-local id.

use tantivy::DocAddress;

use crate::docset::DocSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeView {
    bases: Vec<u32>,
    max_doc: u32,
}

impl CompositeView {
    pub fn new(reader: &tantivy::Searcher) -> Self {
        let mut bases = Vec::with_capacity(reader.segment_readers().len());
        let mut max_doc = 0u32;
        for segment in reader.segment_readers() {
            bases.push(max_doc);
            max_doc += segment.max_doc();
        }
        Self { bases, max_doc }
    }

    /// Upper bound (exclusive) of composite ids, deleted documents included.
    pub fn max_doc(&self) -> u32 {
        self.max_doc
    }

    pub fn segment_count(&self) -> usize {
        self.bases.len()
    }

    /// First composite id of each segment.
    pub fn bases(&self) -> &[u32] {
        &self.bases
    }

    pub fn base(&self, segment_ord: u32) -> u32 {
        self.bases[segment_ord as usize]
    }

    pub fn global(&self, segment_ord: u32, doc: u32) -> u32 {
        self.base(segment_ord) + doc
    }

    pub fn address(&self, global: u32) -> Option<DocAddress> {
        if global >= self.max_doc {
            return None;
        }
        let segment = self.bases.partition_point(|&base| base <= global) - 1;
        Some(DocAddress::new(segment as u32, global - self.bases[segment]))
    }

    /// Every document that is not deleted.
    pub fn live_docs(&self, reader: &tantivy::Searcher) -> DocSet {
        let mut set = DocSet::empty(self.max_doc);
        for (ord, segment) in reader.segment_readers().iter().enumerate() {
            let base = self.bases[ord];
            for doc in segment.doc_ids_alive() {
                set.insert(base + doc);
            }
        }
        set
    }
}
