use super::super::metrics::CoreMetrics;
use super::super::store::{MemoryBackend, StorageBackend};
use super::super::Error;
use super::{
    Computed, Cursor, Page, PageBound, PageDirection, PageItem, PageRequest, QueryCache,
    QueryDescriptor,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::time::{Duration, SystemTime};

fn cache() -> QueryCache<MemoryBackend, MemoryBackend> {
    QueryCache::new(
        MemoryBackend::new(),
        MemoryBackend::new(),
        Arc::new(CoreMetrics::new()),
    )
}

fn fetch_ids<D: StorageBackend>(
    cache: &QueryCache<MemoryBackend, D>,
    desc: &QueryDescriptor,
    now: SystemTime,
    calls: &AtomicUsize,
) -> super::CachedResult<Vec<u64>> {
    cache
        .fetch(desc, Duration::from_secs(300), now, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(Computed::new(vec![1u64, 2, 3]))
        })
        .unwrap()
}

#[test]
fn miss_computes_then_hits() {
    let cache = cache();
    let now = SystemTime::now();
    let calls = AtomicUsize::new(0);
    let desc = QueryDescriptor::new("orders.list").param("status", "open");

    let first = fetch_ids(&cache, &desc, now, &calls);
    assert!(!first.from_cache);
    assert_eq!(first.payload, vec![1, 2, 3]);

    let second = fetch_ids(&cache, &desc, now, &calls);
    assert!(second.from_cache);
    assert_eq!(second.payload, vec![1, 2, 3]);
    assert_eq!(second.compute_time, Duration::ZERO);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.metrics().cache_misses.load(Ordering::Relaxed), 1);
    assert_eq!(cache.metrics().cache_memory_hits.load(Ordering::Relaxed), 1);
}

#[test]
fn parameter_order_does_not_change_the_key() {
    let a = QueryDescriptor::new("orders.list")
        .param("status", "open")
        .param("sort", "date");
    let b = QueryDescriptor::new("orders.list")
        .param("sort", "date")
        .param("status", "open");
    assert_eq!(a.cache_key(), b.cache_key());

    // And the second, differently-spelled call is a cache hit.
    let cache = cache();
    let now = SystemTime::now();
    let calls = AtomicUsize::new(0);
    assert!(!fetch_ids(&cache, &a, now, &calls).from_cache);
    assert!(fetch_ids(&cache, &b, now, &calls).from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn transient_fields_never_enter_the_key() {
    let plain = QueryDescriptor::new("orders.list").param("status", "open");
    let noisy = QueryDescriptor::new("orders.list")
        .param("status", "open")
        .transient("request_id", "abc-123")
        .transient("debug", true);
    assert_eq!(plain.cache_key(), noisy.cache_key());
    assert_eq!(noisy.get_transient("request_id"), Some("abc-123"));
}

#[test]
fn tenants_never_collide() {
    let acme = QueryDescriptor::new("orders.list").tenant("acme").param("status", "open");
    let globex = QueryDescriptor::new("orders.list").tenant("globex").param("status", "open");
    assert_ne!(acme.cache_key(), globex.cache_key());

    let cache = cache();
    let now = SystemTime::now();
    let calls = AtomicUsize::new(0);
    fetch_ids(&cache, &acme, now, &calls);
    fetch_ids(&cache, &globex, now, &calls);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn entries_expire_and_recompute() {
    let cache = cache();
    let t0 = SystemTime::now();
    let calls = AtomicUsize::new(0);
    let desc = QueryDescriptor::new("orders.list");

    let fetch_at = |at: SystemTime| {
        cache
            .fetch(&desc, Duration::from_secs(30), at, || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(Computed::new(42u32))
            })
            .unwrap()
    };

    assert!(!fetch_at(t0).from_cache);
    assert!(fetch_at(t0 + Duration::from_secs(29)).from_cache);
    // Past the TTL the payload is stale and must be recomputed.
    assert!(!fetch_at(t0 + Duration::from_secs(31)).from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn durable_hits_promote_into_memory() {
    let durable = Arc::new(MemoryBackend::new());
    let metrics = Arc::new(CoreMetrics::new());
    let now = SystemTime::now();
    let calls = AtomicUsize::new(0);
    let desc = QueryDescriptor::new("orders.list");

    let warm = QueryCache::new(MemoryBackend::new(), Arc::clone(&durable), Arc::clone(&metrics));
    fetch_ids(&warm, &desc, now, &calls);

    // A fresh process shares only the durable tier.
    let cold = QueryCache::new(MemoryBackend::new(), Arc::clone(&durable), Arc::clone(&metrics));
    let hit = fetch_ids(&cold, &desc, now, &calls);
    assert!(hit.from_cache);
    assert_eq!(metrics.cache_durable_hits.load(Ordering::Relaxed), 1);

    // The promoted copy now serves from memory.
    fetch_ids(&cold, &desc, now, &calls);
    assert_eq!(metrics.cache_memory_hits.load(Ordering::Relaxed), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn failed_compute_is_propagated_uncached() {
    let cache = cache();
    let now = SystemTime::now();
    let desc = QueryDescriptor::new("orders.list");

    let result = cache.fetch::<u32, _, _>(&desc, Duration::from_secs(300), now, || {
        Err::<Computed<u32>, _>("database exploded")
    });
    assert!(matches!(result, Err(Error::ComputeFailed(_))));

    // Nothing was written; the next call computes.
    let result = cache
        .fetch(&desc, Duration::from_secs(300), now, || {
            Ok::<_, String>(Computed::new(7u32))
        })
        .unwrap();
    assert!(!result.from_cache);
    assert_eq!(result.payload, 7);
}

#[test]
fn concurrent_misses_collapse_into_one_compute() {
    let cache = cache();
    let calls = AtomicUsize::new(0);
    let barrier = Barrier::new(4);
    let now = SystemTime::now();
    let desc = QueryDescriptor::new("orders.list");

    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache
                        .fetch(&desc, Duration::from_secs(300), now, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(50));
                            Ok::<_, String>(Computed::new(1u32))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|r| !r.from_cache).count(), 1);
        assert!(results.iter().all(|r| r.payload == 1));
    });
}

#[test]
fn related_entries_are_primed_in_the_same_fetch() {
    let cache = cache();
    let now = SystemTime::now();
    let list = QueryDescriptor::new("orders.list").tag("order:7");
    let detail = QueryDescriptor::new("orders.detail").param("id", 7).tag("order:7");

    let detail_for_closure = detail.clone();
    cache
        .fetch(&list, Duration::from_secs(300), now, move || {
            // The list query bulk-loads the records needed to render it.
            Ok::<_, String>(
                Computed::new(vec![7u64])
                    .with_related(detail_for_closure, json!({"id": 7, "status": "open"})),
            )
        })
        .unwrap();

    // Rendering the detail takes no further round trip.
    let calls = AtomicUsize::new(0);
    let result = cache
        .fetch::<serde_json::Value, String, _>(&detail, Duration::from_secs(300), now, || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Computed::new(json!(null)))
        })
        .unwrap();
    assert!(result.from_cache);
    assert_eq!(result.payload["status"], "open");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn tag_invalidation_drops_every_tagged_entry() {
    let cache = cache();
    let now = SystemTime::now();
    let calls = AtomicUsize::new(0);

    let by_status = QueryDescriptor::new("orders.list").param("status", "open").tag("order:7");
    let by_date = QueryDescriptor::new("orders.list").param("sort", "date").tag("order:7");
    let unrelated = QueryDescriptor::new("orders.list").param("status", "closed").tag("order:9");

    fetch_ids(&cache, &by_status, now, &calls);
    fetch_ids(&cache, &by_date, now, &calls);
    fetch_ids(&cache, &unrelated, now, &calls);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert_eq!(cache.invalidate_tags(&["order:7"]), 2);

    // Tagged variants recompute; the untouched entry still hits.
    assert!(!fetch_ids(&cache, &by_status, now, &calls).from_cache);
    assert!(!fetch_ids(&cache, &by_date, now, &calls).from_cache);
    assert!(fetch_ids(&cache, &unrelated, now, &calls).from_cache);
}

#[test]
fn single_entry_invalidation() {
    let cache = cache();
    let now = SystemTime::now();
    let calls = AtomicUsize::new(0);
    let desc = QueryDescriptor::new("orders.list");

    fetch_ids(&cache, &desc, now, &calls);
    cache.invalidate(&desc);
    assert!(!fetch_ids(&cache, &desc, now, &calls).from_cache);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn slow_computations_are_flagged() {
    let cache = cache().with_slow_query_threshold(Duration::ZERO);
    let now = SystemTime::now();
    let desc = QueryDescriptor::new("orders.report");

    cache
        .fetch(&desc, Duration::from_secs(300), now, || {
            Ok::<_, String>(Computed::new(1u32))
        })
        .unwrap();

    let slow = cache.slow_queries();
    assert_eq!(slow.len(), 1);
    assert_eq!(slow[0].0, desc.cache_key());
    assert!(slow[0].1.slow);
    assert_eq!(cache.metrics().slow_queries.load(Ordering::Relaxed), 1);
}

#[test]
fn per_key_stats_accumulate() {
    let cache = cache();
    let now = SystemTime::now();
    let calls = AtomicUsize::new(0);
    let desc = QueryDescriptor::new("orders.list");

    fetch_ids(&cache, &desc, now, &calls);
    fetch_ids(&cache, &desc, now, &calls);
    fetch_ids(&cache, &desc, now, &calls);

    let stats = cache.stats();
    assert_eq!(stats.len(), 1);
    let (key, entry) = &stats[0];
    assert_eq!(key, &desc.cache_key());
    assert_eq!(entry.misses, 1);
    assert_eq!(entry.hits, 2);
}

// --- cursor pagination ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Row {
    posted_at: i64,
    id: u64,
}

impl PageItem for Row {
    fn order_value(&self) -> i64 {
        self.posted_at
    }

    fn tiebreak_id(&self) -> u64 {
        self.id
    }
}

fn dataset() -> Vec<Row> {
    // Canonical descending (posted_at, id) order.
    vec![
        Row { posted_at: 50, id: 5 },
        Row { posted_at: 40, id: 4 },
        Row { posted_at: 30, id: 3 },
        Row { posted_at: 20, id: 2 },
        Row { posted_at: 10, id: 1 },
    ]
}

fn page_source(
    rows: &[Row],
    limit: usize,
) -> impl FnOnce(Option<&PageBound>) -> Result<Computed<Vec<Row>>, String> + '_ {
    move |bound| {
        let items: Vec<Row> = rows
            .iter()
            .filter(|row| match bound {
                Some(b) => b.admits(row.posted_at, row.id),
                None => true,
            })
            .take(limit)
            .cloned()
            .collect();
        Ok(Computed::new(items))
    }
}

#[test]
fn cursor_round_trips_exactly() {
    for (order_value, id) in [(0i64, 0u64), (50, 5), (-3, 17), (i64::MIN, u64::MAX)] {
        let cursor = Cursor::new(order_value, id);
        assert_eq!(Cursor::decode(&cursor.encode()), Some(cursor));
    }
}

#[test]
fn malformed_cursors_decode_to_none() {
    assert_eq!(Cursor::decode(""), None);
    assert_eq!(Cursor::decode("not base64 !!!"), None);
    // Valid base64, wrong payload.
    assert_eq!(Cursor::decode("e30"), None);
}

#[test]
fn pagination_walks_all_items_without_gaps() {
    let cache = cache();
    let now = SystemTime::now();
    let rows = dataset();
    let desc = QueryDescriptor::new("posts.feed");

    let mut seen = Vec::new();
    let mut cursor: Option<String> = None;
    let mut pages = Vec::new();

    loop {
        let request = PageRequest {
            cursor: cursor.clone(),
            limit: 2,
            direction: PageDirection::Next,
        };
        let page: Page<Row> = cache
            .fetch_page(&desc, &request, Duration::from_secs(60), now, page_source(&rows, 2))
            .unwrap()
            .payload;
        seen.extend(page.items.iter().map(|row| row.id));
        pages.push((page.items.len(), page.has_next, page.has_previous));
        if !page.has_next {
            break;
        }
        cursor = page.next_cursor.clone();
    }

    // Exactly three pages, no duplicate or missing items.
    assert_eq!(pages, vec![(2, true, false), (2, true, true), (1, false, true)]);
    assert_eq!(seen, vec![5, 4, 3, 2, 1]);
}

#[test]
fn pagination_reads_backwards_from_a_cursor() {
    let cache = cache();
    let now = SystemTime::now();
    let rows = dataset();
    let desc = QueryDescriptor::new("posts.feed");

    let request = PageRequest::after(
        Cursor::new(30, 3).encode(),
        2,
        PageDirection::Prev,
    );
    let page: Page<Row> = cache
        .fetch_page(&desc, &request, Duration::from_secs(60), now, page_source(&rows, 2))
        .unwrap()
        .payload;

    let ids: Vec<u64> = page.items.iter().map(|row| row.id).collect();
    assert_eq!(ids, vec![5, 4]);
    assert!(page.has_previous);
}

#[test]
fn malformed_cursor_pages_from_the_beginning() {
    let cache = cache();
    let now = SystemTime::now();
    let rows = dataset();
    let desc = QueryDescriptor::new("posts.feed");

    let request = PageRequest::after("!!corrupt!!", 2, PageDirection::Next);
    let page: Page<Row> = cache
        .fetch_page(&desc, &request, Duration::from_secs(60), now, page_source(&rows, 2))
        .unwrap()
        .payload;

    let ids: Vec<u64> = page.items.iter().map(|row| row.id).collect();
    assert_eq!(ids, vec![5, 4]);
    // No cursor was usable, so this page has nothing before it.
    assert!(!page.has_previous);
}

#[test]
fn pagination_survives_items_added_ahead_of_the_cursor() {
    let cache = cache();
    let now = SystemTime::now();
    let desc = QueryDescriptor::new("posts.feed");

    let first: Page<Row> = cache
        .fetch_page(
            &desc,
            &PageRequest::first(2),
            Duration::from_secs(60),
            now,
            page_source(&dataset(), 2),
        )
        .unwrap()
        .payload;
    let cursor = first.next_cursor.clone().unwrap();

    // A new row lands at the head of the feed before the client pages on.
    let mut grown = dataset();
    grown.insert(0, Row { posted_at: 60, id: 6 });

    let second: Page<Row> = cache
        .fetch_page(
            &desc,
            &PageRequest::after(cursor, 2, PageDirection::Next),
            Duration::from_secs(60),
            now,
            page_source(&grown, 2),
        )
        .unwrap()
        .payload;

    // The cursor still points below row 4; nothing is skipped or repeated.
    let ids: Vec<u64> = second.items.iter().map(|row| row.id).collect();
    assert_eq!(ids, vec![3, 2]);
}
