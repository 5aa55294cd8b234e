use std::sync::Arc;

use async_trait::async_trait;
use interlink::clock::ManualClock;
use interlink::conflict::{deep_equal, ConflictResolver, DetectOptions};
use interlink::error::PipelineError;
use interlink::event::{Event, Priority};
use interlink::limiters::{Algorithm, RateLimiter};
use interlink::notify::TracingNotifier;
use interlink::pipeline::{EventPipeline, Middleware, Next};
use interlink::queue::{MessageQueue, NewMessage, QueueMessage};
use interlink::settings::{QueueSettings, RateLimitSettings};
use interlink::storage::MemoryStorage;
use proptest::prelude::*;
use serde_json::{json, Value};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-d]", inner, 0..4)
                .prop_map(|map| Value::Object(map.into_iter().collect())),
        ]
    })
}

fn arb_priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
        Just(Priority::Urgent),
    ]
}

struct Tag {
    name: String,
    priority: i32,
}

#[async_trait]
impl Middleware<Event> for Tag {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    async fn process(&self, mut event: Event, next: Next<'_, Event>) -> Result<Event, PipelineError> {
        if let Some(visited) = event.data.as_array_mut() {
            visited.push(json!(self.priority));
        }
        next.run(event).await
    }
}

proptest! {
    #[test]
    fn test_pipeline_visits_in_ascending_priority(priorities in prop::collection::vec(-50i32..50, 1..8)) {
        let visited = runtime().block_on(async {
            let pipeline = EventPipeline::new("events");
            for (i, priority) in priorities.iter().enumerate() {
                pipeline
                    .register(Arc::new(Tag { name: format!("stage-{}", i), priority: *priority }))
                    .await;
            }
            pipeline
                .process(Event::new("ping", "app", json!([])))
                .await
                .unwrap()
                .into_payload()
                .data
        });
        let visited: Vec<i64> = visited
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_i64)
            .collect();
        prop_assert_eq!(visited.len(), priorities.len());
        prop_assert!(visited.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_priority_queue_drains_highest_first(priorities in prop::collection::vec(arb_priority(), 1..20)) {
        let drained = runtime().block_on(async {
            let queue = MessageQueue::new(
                QueueSettings::default(),
                Arc::new(ManualClock::new(0)),
                Arc::new(TracingNotifier),
            );
            let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
            let sink = Arc::clone(&seen);
            queue
                .register_processor("job", move |message: QueueMessage| {
                    let sink = Arc::clone(&sink);
                    async move {
                        let index = message.data["index"].as_u64().unwrap_or_default();
                        sink.lock().unwrap().push((message.priority, index));
                        Ok::<(), anyhow::Error>(())
                    }
                })
                .await;
            for (index, priority) in priorities.iter().enumerate() {
                queue
                    .enqueue(NewMessage::new("job", "props", json!({ "index": index })).with_priority(*priority))
                    .await
                    .unwrap();
            }
            queue.process_messages().await;
            let drained = seen.lock().unwrap().clone();
            drained
        });
        prop_assert_eq!(drained.len(), priorities.len());
        // higher priority first, equal priority in arrival order
        prop_assert!(drained
            .windows(2)
            .all(|w| w[0].0 > w[1].0 || (w[0].0 == w[1].0 && w[0].1 < w[1].1)));
    }

    #[test]
    fn test_equal_values_never_conflict(value in arb_json()) {
        prop_assert!(deep_equal(&value, &value.clone()));
        let resolver = ConflictResolver::new(Arc::new(ManualClock::new(0)), Arc::new(TracingNotifier));
        let found = resolver
            .detect_conflict("doc", value.clone(), value, DetectOptions::default())
            .unwrap();
        prop_assert!(found.is_none());
    }

    #[test]
    fn test_window_never_admits_more_than_max(requests in 1usize..60, max_requests in 1u32..20) {
        let admitted = runtime().block_on(async {
            let limiter = RateLimiter::new(
                RateLimitSettings::new(max_requests, 1000, Algorithm::SlidingWindow),
                Arc::new(MemoryStorage::new()),
                Arc::new(ManualClock::new(0)),
            );
            let mut admitted = 0u32;
            for _ in 0..requests {
                let decision = limiter.check_limit("client").await;
                if decision.allowed {
                    admitted += 1;
                } else {
                    assert!(decision.retry_after.is_some());
                }
            }
            admitted
        });
        prop_assert_eq!(admitted, max_requests.min(requests as u32));
    }
}
