//! Cache-bearing view over one reader generation.
//!
//! A `Searcher` wraps a point-in-time Tantivy searcher together with its own
//! `SearcherCaches`. It never changes after construction; only its caches
//! fill up. All retrieval goes through the caches:
//!
//! - document sets are cached under the positive form of the query, and
//!   negations are derived from the live set
//! - ranked windows are cached as a superset rounded up to the window size
//! - stored documents and per-field values have their own caches

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use searchcore_index::{DirectoryFactory, FieldValue, IndexDocument, IndexSchema, Query};
use searchcore_types::DEFAULT_WINDOW_SIZE;
use serde::Serialize;
use tantivy::collector::DocSetCollector;
use tantivy::query::{BooleanQuery, ConstScoreQuery, EnableScoring, Occur, Query as TantivyQuery};
use tantivy::TantivyDocument;
use tracing::{debug, info};

use crate::cache::{CacheState, CacheStats, SearchCache, SearcherCaches, UserCache, UserValue};
use crate::collector::{HitCollector, HitOrder};
use crate::command::{QueryCommand, QueryFlags, QueryResult, QueryResultKey};
use crate::doclist::DocList;
use crate::docset::DocSet;
use crate::error::SearchError;
use crate::field_values::UninvertedField;
use crate::filter::{Filter, ProcessedFilters};
use crate::sort::{SortKey, SortSpec};
use crate::view::CompositeView;

/// Construction parameters for a [`Searcher`].
pub struct SearcherOptions {
    pub id: u64,
    pub name: String,
    pub generation: u64,
    /// Realtime searchers serve near-real-time lookups and never cache
    pub realtime: bool,
    pub caches: SearcherCaches,
    pub window_size: usize,
    pub max_docs_cached: usize,
    pub lazy_fields: bool,
    /// Directory reference to give back on close
    pub directory: Option<(Arc<DirectoryFactory>, PathBuf)>,
}

impl SearcherOptions {
    pub fn new(id: u64, generation: u64) -> Self {
        Self {
            id,
            name: format!("Searcher@{id}"),
            generation,
            realtime: false,
            caches: SearcherCaches::disabled(),
            window_size: DEFAULT_WINDOW_SIZE,
            max_docs_cached: 200,
            lazy_fields: true,
            directory: None,
        }
    }

    pub fn with_caches(mut self, caches: SearcherCaches) -> Self {
        self.caches = caches;
        self
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        if realtime {
            self.name = format!("Searcher@{}[realtime]", self.id);
        }
        self
    }

    pub fn with_window(mut self, window_size: usize, max_docs_cached: usize) -> Self {
        self.window_size = window_size.max(1);
        self.max_docs_cached = max_docs_cached;
        self
    }

    pub fn with_lazy_fields(mut self, lazy_fields: bool) -> Self {
        self.lazy_fields = lazy_fields;
        self
    }

    pub fn with_directory(mut self, factory: Arc<DirectoryFactory>, path: PathBuf) -> Self {
        self.directory = Some((factory, path));
        self
    }
}

/// Read-only monitoring view of a searcher.
#[derive(Debug, Clone, Serialize)]
pub struct SearcherStats {
    pub id: u64,
    pub name: String,
    pub generation: u64,
    pub realtime: bool,
    pub caching: bool,
    pub num_docs: u64,
    pub max_doc: u32,
    pub segment_count: usize,
    pub opened_at: DateTime<Utc>,
    pub registered_at: Option<DateTime<Utc>>,
    pub warm_time_ms: u64,
    pub closed: bool,
    pub caches: Vec<CacheStats>,
}

pub struct Searcher {
    id: u64,
    name: String,
    generation: u64,
    realtime: bool,
    reader: RwLock<Option<tantivy::Searcher>>,
    view: CompositeView,
    num_docs: u64,
    schema: Arc<IndexSchema>,
    caches: SearcherCaches,
    window_size: usize,
    max_docs_cached: usize,
    lazy_fields: bool,
    live_docs: OnceLock<Arc<DocSet>>,
    opened_at: DateTime<Utc>,
    warm_time_ms: AtomicU64,
    registered_at: Mutex<Option<DateTime<Utc>>>,
    closed: AtomicBool,
    directory: Option<(Arc<DirectoryFactory>, PathBuf)>,
}

impl Searcher {
    pub fn open(reader: tantivy::Searcher, schema: Arc<IndexSchema>, options: SearcherOptions) -> Self {
        let view = CompositeView::new(&reader);
        let num_docs = reader.num_docs();
        debug!(
            searcher = %options.name,
            generation = options.generation,
            max_doc = view.max_doc(),
            segments = view.segment_count(),
            "Opened searcher"
        );

        Self {
            id: options.id,
            name: options.name,
            generation: options.generation,
            realtime: options.realtime,
            reader: RwLock::new(Some(reader)),
            view,
            num_docs,
            schema,
            caches: options.caches,
            window_size: options.window_size.max(1),
            max_docs_cached: options.max_docs_cached,
            lazy_fields: options.lazy_fields,
            live_docs: OnceLock::new(),
            opened_at: Utc::now(),
            warm_time_ms: AtomicU64::new(0),
            registered_at: Mutex::new(None),
            closed: AtomicBool::new(false),
            directory: options.directory,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_realtime(&self) -> bool {
        self.realtime
    }

    pub fn schema(&self) -> &Arc<IndexSchema> {
        &self.schema
    }

    pub fn max_doc(&self) -> u32 {
        self.view.max_doc()
    }

    pub fn num_docs(&self) -> u64 {
        self.num_docs
    }

    pub fn caching_enabled(&self) -> bool {
        !self.caches.is_disabled()
    }

    pub fn caches(&self) -> &SearcherCaches {
        &self.caches
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn registered_at(&self) -> Option<DateTime<Utc>> {
        match self.registered_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The underlying point-in-time Tantivy searcher.
    pub fn reader(&self) -> Result<tantivy::Searcher, SearchError> {
        let guard = self
            .reader
            .read()
            .map_err(|_| SearchError::SearcherClosed(self.name.clone()))?;
        guard
            .clone()
            .ok_or_else(|| SearchError::SearcherClosed(self.name.clone()))
    }

    // -- document sets --

    /// Every live document.
    pub fn live_docs(&self) -> Result<Arc<DocSet>, SearchError> {
        if let Some(set) = self.live_docs.get() {
            return Ok(Arc::clone(set));
        }
        let reader = self.reader()?;
        let set = Arc::new(self.view.live_docs(&reader));
        Ok(Arc::clone(self.live_docs.get_or_init(|| set)))
    }

    /// Documents matching `query`, through the filter cache.
    ///
    /// Only the positive form of a query is cached; a negated query is the
    /// live set minus its positive set.
    pub fn get_doc_set(&self, query: &Query) -> Result<Arc<DocSet>, SearchError> {
        let (positive, negated) = query.absolute();
        let positive_set = self.positive_doc_set(positive)?;
        if !negated {
            return Ok(positive_set);
        }
        Ok(Arc::new(self.live_docs()?.and_not(&positive_set)))
    }

    fn positive_doc_set(&self, positive: Query) -> Result<Arc<DocSet>, SearchError> {
        let Some(cache) = &self.caches.filter else {
            return Ok(Arc::new(self.compute_doc_set(&positive)?));
        };
        if let Some(set) = cache.get(&positive) {
            return Ok(set);
        }
        let set = Arc::new(self.compute_doc_set(&positive)?);
        cache.put(positive, Arc::clone(&set));
        Ok(set)
    }

    /// Execute `query` to a document set, bypassing every cache.
    pub fn compute_doc_set(&self, query: &Query) -> Result<DocSet, SearchError> {
        if matches!(query, Query::MatchAll) {
            return Ok(self.live_docs()?.as_ref().clone());
        }
        let reader = self.reader()?;
        let tantivy_query = query.to_tantivy(&self.schema)?;
        let addresses = reader.search(&*tantivy_query, &DocSetCollector)?;
        Ok(DocSet::from_docs(
            self.view.max_doc(),
            addresses
                .into_iter()
                .map(|addr| self.view.global(addr.segment_ord, addr.doc_id)),
        ))
    }

    /// Number of documents matching `query`, optionally within `filter`.
    pub fn num_docs_matching(&self, query: &Query, filter: Option<&DocSet>) -> Result<usize, SearchError> {
        let set = self.get_doc_set(query)?;
        Ok(match filter {
            Some(filter) => set.intersection_size(filter),
            None => set.len(),
        })
    }

    // -- ranked results --

    /// Run a search through the result cache.
    ///
    /// On a miss the ranking is collected up to a superset window (the
    /// requested end rounded up to the window size) and cached, then sliced.
    /// Partial results and ranks beyond `max_docs_cached` are never cached.
    pub fn search(&self, cmd: &QueryCommand) -> Result<QueryResult, SearchError> {
        let key = match &self.caches.result {
            Some(_) if cmd.is_cacheable() => Some(QueryResultKey::for_command(cmd)),
            _ => None,
        };

        if let (Some(cache), Some(key)) = (&self.caches.result, &key) {
            let usable = cache.peek(key).and_then(|cached| {
                let scores_ok = !cmd.flags.needs_scores() || cached.has_scores();
                cached.subset(cmd.offset, cmd.len).filter(|_| scores_ok)
            });
            cache.record_lookup(usable.is_some());
            if let Some(doc_list) = usable {
                let doc_set = if cmd.flags.needs_doc_set() {
                    Some(self.matching_set(cmd)?)
                } else {
                    None
                };
                return Ok(QueryResult {
                    doc_list,
                    doc_set,
                    partial: false,
                });
            }
        }

        let requested = cmd.offset.saturating_add(cmd.len);
        let mut to_collect = requested;
        let mut store = key.is_some();
        if store {
            to_collect = if requested < self.window_size {
                self.window_size
            } else {
                requested.div_ceil(self.window_size).saturating_mul(self.window_size)
            };
            if to_collect > self.max_docs_cached {
                to_collect = requested;
                store = false;
            }
        }

        let (superset, doc_set, partial) = self.get_doc_list_nc(cmd, to_collect)?;
        if partial {
            debug!(searcher = %self.name, query = %cmd.query, "Time allowed exceeded, returning partial results");
        }

        if let (true, false, Some(cache), Some(key)) = (store, partial, &self.caches.result, key) {
            cache.put(key, Arc::new(superset.clone()));
        }

        Ok(QueryResult {
            doc_list: superset.slice(cmd.offset, cmd.len),
            doc_set,
            partial,
        })
    }

    /// Ranked window for `query` within `filters`.
    pub fn get_doc_list(
        &self,
        query: &Query,
        filters: &[Filter],
        sort: &SortSpec,
        offset: usize,
        len: usize,
        flags: QueryFlags,
    ) -> Result<DocList, SearchError> {
        let mut cmd = QueryCommand::new(query.clone())
            .with_sort(sort.clone())
            .with_window(offset, len);
        cmd.filters = filters.to_vec();
        cmd.flags = flags;
        Ok(self.search(&cmd)?.doc_list)
    }

    /// Ranked window plus the full set of matching documents.
    pub fn get_doc_list_and_set(&self, cmd: &QueryCommand) -> Result<(DocList, Arc<DocSet>), SearchError> {
        let mut cmd = cmd.clone();
        cmd.flags = cmd.flags.with(QueryFlags::GET_DOCSET);
        let result = self.search(&cmd)?;
        let set = match result.doc_set {
            Some(set) => set,
            None => self.matching_set(&cmd)?,
        };
        Ok((result.doc_list, set))
    }

    /// Every document the command matches, ignoring its window.
    fn matching_set(&self, cmd: &QueryCommand) -> Result<Arc<DocSet>, SearchError> {
        let mut set = self.get_doc_set(&cmd.query)?;
        for filter in &cmd.filters {
            let filter_set = if filter.cache {
                self.get_doc_set(&filter.query)?
            } else {
                Arc::new(self.compute_doc_set(&filter.query)?)
            };
            set = Arc::new(set.intersection(&filter_set));
        }
        if let Some(filter_set) = &cmd.filter_set {
            set = Arc::new(set.intersection(filter_set));
        }
        Ok(set)
    }

    fn process_filters(&self, cmd: &QueryCommand) -> Result<ProcessedFilters, SearchError> {
        let mut processed = ProcessedFilters::default();
        let mut answer = cmd.filter_set.clone();

        for filter in &cmd.filters {
            if filter.cache {
                let set = self.get_doc_set(&filter.query)?;
                answer = Some(match answer {
                    Some(current) => Arc::new(current.intersection(&set)),
                    None => set,
                });
            } else if filter.is_post_filter() {
                processed.post_filters.push(filter.clone());
            } else {
                processed.prefilters.push(filter.query.clone());
            }
        }

        processed.post_filters.sort_by_key(|f| f.cost);
        processed.answer = answer;
        Ok(processed)
    }

    /// Execute without consulting the result cache, keeping the top
    /// `to_collect` hits.
    fn get_doc_list_nc(
        &self,
        cmd: &QueryCommand,
        to_collect: usize,
    ) -> Result<(DocList, Option<Arc<DocSet>>, bool), SearchError> {
        let reader = self.reader()?;
        let filters = self.process_filters(cmd)?;

        if let Some(answer) = &filters.answer {
            if answer.is_empty() {
                let doc_set = cmd
                    .flags
                    .needs_doc_set()
                    .then(|| Arc::new(DocSet::empty(self.view.max_doc())));
                return Ok((DocList::empty(), doc_set, false));
            }
        }

        let main = cmd.query.to_tantivy(&self.schema)?;
        let query: Box<dyn TantivyQuery> = if filters.prefilters.is_empty() {
            main
        } else {
            let mut clauses = vec![(Occur::Must, main)];
            for prefilter in &filters.prefilters {
                let filter_query: Box<dyn TantivyQuery> =
                    Box::new(ConstScoreQuery::new(prefilter.to_tantivy(&self.schema)?, 0.0));
                clauses.push((Occur::Must, filter_query));
            }
            Box::new(BooleanQuery::new(clauses))
        };

        let post_filters = filters
            .post_filters
            .iter()
            .map(|filter| {
                let q = filter.query.to_tantivy(&self.schema)?;
                Ok(q.weight(EnableScoring::disabled_from_searcher(&reader))?)
            })
            .collect::<Result<Vec<_>, SearchError>>()?;

        let collector = HitCollector::new(
            self.view.bases().to_vec(),
            cmd.needs_scoring(),
            self.hit_order(&cmd.sort)?,
            to_collect,
        )
        .with_doc_set(cmd.flags.needs_doc_set())
        .with_filter(filters.answer.clone())
        .with_post_filters(post_filters)
        .with_deadline(cmd.time_allowed.map(|budget| Instant::now() + budget));
        let timed_out = collector.timed_out();

        let collected = reader.search(&*query, &collector)?;
        let partial = timed_out.load(Ordering::Relaxed);
        let doc_set = collected.doc_set(self.view.max_doc()).map(Arc::new);

        let hits = collected.top;
        let (scores, max_score) = if cmd.flags.needs_scores() {
            let scores: Vec<f32> = hits.iter().map(|hit| hit.score).collect();
            let max_score = scores.iter().copied().reduce(f32::max);
            (Some(scores), max_score)
        } else {
            (None, None)
        };
        let docs = hits.iter().map(|hit| hit.doc).collect();

        Ok((DocList::new(docs, scores, collected.matches, max_score), doc_set, partial))
    }

    fn hit_order(&self, sort: &SortSpec) -> Result<HitOrder, SearchError> {
        let columns = sort
            .fields()
            .iter()
            .map(|field| match &field.key {
                SortKey::Field(name) => self.field_values(name).map(Some),
                _ => Ok(None),
            })
            .collect::<Result<Vec<Option<Arc<UninvertedField>>>, SearchError>>()?;
        Ok(HitOrder::new(sort.clone(), columns))
    }

    // -- documents and field values --

    /// Stored fields of one document, through the document cache.
    pub fn doc(&self, doc: u32) -> Result<Arc<IndexDocument>, SearchError> {
        if let Some(cache) = &self.caches.document {
            if let Some(found) = cache.get(&doc) {
                return Ok(found);
            }
            let loaded = Arc::new(self.load_doc(doc, None)?);
            cache.put(doc, Arc::clone(&loaded));
            return Ok(loaded);
        }
        Ok(Arc::new(self.load_doc(doc, None)?))
    }

    /// Only `fields` of one document.
    ///
    /// With lazy loading on, an uncached document is read with just those
    /// fields and is not cached, since the cache holds whole documents.
    pub fn doc_fields(&self, doc: u32, fields: &HashSet<String>) -> Result<Arc<IndexDocument>, SearchError> {
        if !self.lazy_fields {
            return self.doc(doc);
        }
        if let Some(found) = self.caches.document.as_ref().and_then(|c| c.get(&doc)) {
            return Ok(found);
        }
        Ok(Arc::new(self.load_doc(doc, Some(fields))?))
    }

    fn load_doc(&self, doc: u32, only: Option<&HashSet<String>>) -> Result<IndexDocument, SearchError> {
        let address = self
            .view
            .address(doc)
            .ok_or(SearchError::DocumentNotFound(doc))?;
        let reader = self.reader()?;
        if reader.segment_reader(address.segment_ord).is_deleted(address.doc_id) {
            return Err(SearchError::DocumentNotFound(doc));
        }
        let stored: TantivyDocument = reader.doc(address)?;
        Ok(self.schema.to_index_doc(&stored, only))
    }

    /// Per-document values of a fast numeric field, through the field-value cache.
    pub fn field_values(&self, field: &str) -> Result<Arc<UninvertedField>, SearchError> {
        let Some(cache) = &self.caches.field_value else {
            return Ok(Arc::new(self.build_field_values(field)?));
        };
        if let Some(values) = cache.get(&field.to_string()) {
            return Ok(values);
        }
        let values = Arc::new(self.build_field_values(field)?);
        cache.put(field.to_string(), Arc::clone(&values));
        Ok(values)
    }

    pub fn build_field_values(&self, field: &str) -> Result<UninvertedField, SearchError> {
        UninvertedField::build(&self.reader()?, &self.schema, field)
    }

    /// Count of documents in `docs` per value of `field`.
    pub fn facet_counts(&self, field: &str, docs: &DocSet) -> Result<BTreeMap<FieldValue, usize>, SearchError> {
        Ok(self.field_values(field)?.counts(docs))
    }

    // -- user caches --

    pub fn user_cache(&self, name: &str) -> Option<&UserCache> {
        self.caches.user.get(name)
    }

    pub fn user_cache_get(&self, name: &str, key: &str) -> Option<UserValue> {
        self.user_cache(name)?.get(&key.to_string())
    }

    /// Insert into a user cache. Returns `None` if no such cache exists.
    pub fn user_cache_put(&self, name: &str, key: impl Into<String>, value: UserValue) -> Option<UserValue> {
        self.user_cache(name)?.put(key.into(), value)
    }

    // -- lifecycle --

    /// Autowarm every cache from `old`.
    pub fn warm(&self, old: &Searcher) {
        if !self.caching_enabled() {
            return;
        }
        let start = Instant::now();
        self.caches.warm(self, &old.caches);
        let elapsed_ms = start.elapsed().as_millis() as u64;
        self.warm_time_ms.store(elapsed_ms, Ordering::Relaxed);
        info!(
            searcher = %self.name,
            from = %old.name,
            generation = self.generation,
            elapsed_ms,
            "Warmed searcher"
        );
    }

    /// Mark the caches live and record the registration time.
    pub fn register(&self) {
        self.caches.set_state(CacheState::Live);
        match self.registered_at.lock() {
            Ok(mut guard) => *guard = Some(Utc::now()),
            Err(poisoned) => *poisoned.into_inner() = Some(Utc::now()),
        }
        debug!(searcher = %self.name, generation = self.generation, "Registered searcher caches");
    }

    /// Release the reader, close every cache and give back the directory.
    ///
    /// Later calls do nothing.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.caches.close();
        match self.reader.write() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        if let Some((factory, path)) = &self.directory {
            factory.release(path);
        }
        debug!(searcher = %self.name, generation = self.generation, "Closed searcher");
    }

    pub fn stats(&self) -> SearcherStats {
        SearcherStats {
            id: self.id,
            name: self.name.clone(),
            generation: self.generation,
            realtime: self.realtime,
            caching: self.caching_enabled(),
            num_docs: self.num_docs,
            max_doc: self.view.max_doc(),
            segment_count: self.view.segment_count(),
            opened_at: self.opened_at,
            registered_at: self.registered_at(),
            warm_time_ms: self.warm_time_ms.load(Ordering::Relaxed),
            closed: self.is_closed(),
            caches: self.caches.stats(),
        }
    }
}

impl std::fmt::Debug for Searcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Searcher")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("realtime", &self.realtime)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchcore_index::{FieldKind, RangeBound};
    use searchcore_types::{CacheConfig, CoreConfig};
    use std::collections::HashMap;
    use std::time::Duration;
    use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy};

    fn schema() -> Arc<IndexSchema> {
        Arc::new(
            IndexSchema::builder("id")
                .add_field("id", FieldKind::String)
                .add_field("body", FieldKind::Text)
                .add_field("category", FieldKind::String)
                .add_field("price", FieldKind::U64)
                .build()
                .unwrap(),
        )
    }

    /// 20 documents in two segments. Even ids are category "a", odd are "b".
    fn setup_searcher(config: &CoreConfig) -> Searcher {
        let schema = schema();
        let index = Index::create_in_ram(schema.schema().clone());
        let mut writer: IndexWriter = index.writer_with_num_threads(1, 15_000_000).unwrap();
        let (id, _) = schema.field("id").unwrap();
        let (body, _) = schema.field("body").unwrap();
        let (category, _) = schema.field("category").unwrap();
        let (price, _) = schema.field("price").unwrap();

        for i in 0..20u64 {
            writer
                .add_document(doc!(
                    id => format!("doc-{i}"),
                    body => if i % 4 == 0 { "rust search engine" } else { "plain text" },
                    category => if i % 2 == 0 { "a" } else { "b" },
                    price => 100 - i,
                ))
                .unwrap();
            if i == 9 {
                writer.commit().unwrap();
            }
        }
        writer.commit().unwrap();

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .unwrap();
        let caches = SearcherCaches::from_config(config, &HashMap::new());
        Searcher::open(
            reader.searcher(),
            schema,
            SearcherOptions::new(1, 2)
                .with_caches(caches)
                .with_window(config.query_result_window_size, config.query_result_max_docs_cached),
        )
    }

    #[test]
    fn test_negated_doc_set_shares_positive_cache_entry() {
        let searcher = setup_searcher(&CoreConfig::default());
        let q = Query::term("category", "a");

        let positive = searcher.get_doc_set(&q).unwrap();
        let negative = searcher.get_doc_set(&q.clone().negate()).unwrap();

        assert_eq!(positive.len() + negative.len(), searcher.num_docs() as usize);
        assert_eq!(positive.intersection_size(&negative), 0);

        let stats = searcher.caches().filter.as_ref().unwrap().stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 1);
    }

    #[test]
    fn test_result_window_matches_direct_execution() {
        let searcher = setup_searcher(&CoreConfig::default());
        let sort = SortSpec::by_field("price", false);

        let full = searcher
            .get_doc_list(&Query::MatchAll, &[], &sort, 0, 20, QueryFlags::default())
            .unwrap();
        assert_eq!(full.len(), 20);

        for (offset, len) in [(0, 5), (3, 7), (10, 10), (19, 1)] {
            let cached = searcher
                .get_doc_list(&Query::MatchAll, &[], &sort, offset, len, QueryFlags::default())
                .unwrap();
            assert_eq!(cached.docs(), &full.docs()[offset..offset + len]);
        }

        let stats = searcher.caches().result.as_ref().unwrap().stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hits, 4);
    }

    #[test]
    fn test_sort_by_field_ascending() {
        let searcher = setup_searcher(&CoreConfig::default());
        let list = searcher
            .get_doc_list(
                &Query::MatchAll,
                &[],
                &SortSpec::by_field("price", false),
                0,
                3,
                QueryFlags::default(),
            )
            .unwrap();

        let prices: Vec<u64> = list
            .docs()
            .iter()
            .map(|&d| searcher.doc(d).unwrap().get_first("price").unwrap().as_u64().unwrap())
            .collect();
        assert_eq!(prices, vec![81, 82, 83]);
    }

    #[test]
    fn test_small_window_over_many_matches() {
        let searcher = setup_searcher(&CoreConfig::default());
        let cmd = QueryCommand::new(Query::MatchAll)
            .with_sort(SortSpec::by_field("price", true))
            .with_window(0, 3)
            .no_cache();

        let result = searcher.search(&cmd).unwrap();
        assert_eq!(result.doc_list.matches(), 20);
        assert!(result.doc_set.is_none());
        let prices: Vec<u64> = result
            .doc_list
            .docs()
            .iter()
            .map(|&d| searcher.doc(d).unwrap().get_first("price").unwrap().as_u64().unwrap())
            .collect();
        assert_eq!(prices, vec![100, 99, 98]);
    }

    #[test]
    fn test_filters_are_applied_three_ways() {
        let searcher = setup_searcher(&CoreConfig::default());
        let expensive = Filter::uncached(
            Query::range("price", RangeBound::Included(90u64.into()), RangeBound::Unbounded),
            200,
        );
        let cmd = QueryCommand::new(Query::MatchAll)
            .with_sort(SortSpec::index_order())
            .with_window(0, 20)
            .with_filter(Filter::cached(Query::term("category", "a")))
            .with_filter(Filter::uncached(Query::term("body", "rust"), 0))
            .with_filter(expensive);

        let result = searcher.search(&cmd).unwrap();
        // category a, body rust: ids 0, 4, 8, 12, 16; price >= 90: ids 0..=10
        let ids: Vec<String> = result
            .doc_list
            .docs()
            .iter()
            .map(|&d| searcher.doc(d).unwrap().get_first("id").unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["doc-0", "doc-4", "doc-8"]);
        assert_eq!(result.doc_list.matches(), 3);
    }

    #[test]
    fn test_partial_result_is_not_cached() {
        let searcher = setup_searcher(&CoreConfig::default());
        let cmd = QueryCommand::new(Query::MatchAll).with_time_allowed(Duration::ZERO);

        let first = searcher.search(&cmd).unwrap();
        assert!(first.partial);
        assert_eq!(searcher.caches().result.as_ref().unwrap().len(), 0);

        let unbounded = QueryCommand::new(Query::MatchAll);
        let second = searcher.search(&unbounded).unwrap();
        assert!(!second.partial);
        assert_eq!(searcher.caches().result.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_large_windows_are_not_cached() {
        let mut config = CoreConfig::default();
        config.query_result_max_docs_cached = 10;
        let searcher = setup_searcher(&config);

        let cmd = QueryCommand::new(Query::MatchAll).with_window(0, 15);
        let result = searcher.search(&cmd).unwrap();
        assert_eq!(result.doc_list.len(), 15);
        assert_eq!(searcher.caches().result.as_ref().unwrap().len(), 0);
    }

    #[test]
    fn test_doc_cache_and_lazy_fields() {
        let searcher = setup_searcher(&CoreConfig::default());
        let only: HashSet<String> = ["id".to_string()].into_iter().collect();

        let partial = searcher.doc_fields(3, &only).unwrap();
        assert_eq!(partial.len(), 1);
        assert_eq!(searcher.caches().document.as_ref().unwrap().len(), 0);

        let full = searcher.doc(3).unwrap();
        assert!(full.get_first("category").is_some());
        assert_eq!(searcher.caches().document.as_ref().unwrap().len(), 1);
        assert!(matches!(
            searcher.doc(500),
            Err(SearchError::DocumentNotFound(500))
        ));
    }

    #[test]
    fn test_doc_list_and_set_cover_every_match() {
        let searcher = setup_searcher(&CoreConfig::default());
        let cmd = QueryCommand::new(Query::term("body", "rust"))
            .with_filter(Filter::cached(Query::term("category", "a")))
            .with_window(0, 2);

        let (list, set) = searcher.get_doc_list_and_set(&cmd).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.matches(), 5);
        assert_eq!(set.len(), 5);
        assert!(list.docs().iter().all(|&doc| set.contains(doc)));
    }

    #[test]
    fn test_facet_counts() {
        let searcher = setup_searcher(&CoreConfig::default());
        let docs = searcher.get_doc_set(&Query::term("category", "a")).unwrap();
        let counts = searcher.facet_counts("price", &docs).unwrap();
        assert_eq!(counts.len(), 10);
        assert!(counts.values().all(|&c| c == 1));
        assert!(matches!(
            searcher.facet_counts("category", &docs),
            Err(SearchError::NotFastField(_))
        ));
    }

    #[test]
    fn test_warm_regenerates_filter_and_results() {
        let config = CoreConfig::default();
        let old = setup_searcher(&config);
        old.get_doc_set(&Query::term("category", "b")).unwrap();
        old.search(&QueryCommand::new(Query::term("body", "rust"))).unwrap();

        let new = setup_searcher(&config);
        new.warm(&old);

        let filter = new.caches().filter.as_ref().unwrap().stats();
        assert!(filter.size >= 1);
        assert_eq!(filter.cumulative_lookups, filter.lookups + 1);
        assert_eq!(new.caches().result.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn test_close_is_idempotent() {
        let searcher = setup_searcher(&CoreConfig::default());
        searcher.register();
        assert!(searcher.registered_at().is_some());
        assert!(searcher
            .caches()
            .stats()
            .iter()
            .all(|s| s.state == CacheState::Live));

        searcher.close();
        searcher.close();
        assert!(searcher.is_closed());
        assert!(matches!(
            searcher.get_doc_set(&Query::term("category", "zzz")),
            Err(SearchError::SearcherClosed(_))
        ));
    }

    #[test]
    fn test_user_cache_round_trip() {
        let config = CoreConfig::default().with_user_cache("perSegment", CacheConfig::new(4));
        let searcher = setup_searcher(&config);
        assert!(searcher.user_cache_put("missing", "k", Arc::new(1u32)).is_none());

        searcher.user_cache_put("perSegment", "k", Arc::new(7u32));
        let value = searcher.user_cache_get("perSegment", "k").unwrap();
        assert_eq!(value.downcast_ref::<u32>(), Some(&7));
    }
}
