//! End-to-end behavior of the pipeline under paused tokio time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fanvisor::{
    Counters, DispatcherConfig, DispatcherState, HandlerError, HandlerFn, HandlerRef, MemoryQueue,
    Message, ObjectEvent, Pipeline, PipelineConfig, PipelineError, QueuePolicy, Route,
    RuntimeError, Subscribe,
};
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

type Seen = Arc<Mutex<Vec<(String, u32)>>>;

/// Per-message handler that records `(key, receive_count)` and fails when `fail` says so.
fn recording<F>(name: &'static str, fail: F) -> (HandlerRef, Seen)
where
    F: Fn(&Message) -> bool + Send + Sync + 'static,
{
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let fail = Arc::new(fail);
    let handler = HandlerFn::arc(name, move |msg: Message, _token: CancellationToken| {
        let log = Arc::clone(&log);
        let fail = Arc::clone(&fail);
        async move {
            log.lock()
                .unwrap()
                .push((msg.event.key.clone(), msg.receive_count));
            if fail(&msg) {
                Err(HandlerError::failed("scripted failure"))
            } else {
                Ok(())
            }
        }
    });
    (handler, seen)
}

/// Handler that sleeps `work` per message.
fn sleeping(name: &'static str, work: Duration) -> HandlerRef {
    HandlerFn::arc(name, move |_msg: Message, _token: CancellationToken| async move {
        time::sleep(work).await;
        Ok(())
    })
}

fn image(key: &str) -> ObjectEvent {
    ObjectEvent::new("images", key, 1024).with_content_type("image/png")
}

fn observed(counters: &Arc<Counters>) -> Vec<Arc<dyn Subscribe>> {
    vec![Arc::clone(counters) as Arc<dyn Subscribe>]
}

/// Lets the bus listener and observer workers catch up.
async fn settle() {
    time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn publish_gives_each_queue_its_own_copy() {
    let queues: Vec<_> = ["img-created-queue", "img-backup-queue", "img-notify-queue"]
        .into_iter()
        .map(|n| MemoryQueue::arc(n, QueuePolicy::default()))
        .collect();

    let mut builder = Pipeline::builder(PipelineConfig::default()).with_topic_name("new-image");
    for q in &queues {
        let (h, _) = recording("noop", |_| false);
        builder = builder.with_route(Route::new(q.clone(), h));
    }
    let pipeline = builder.build().unwrap();

    let report = pipeline.on_object_created(image("cat.png")).await.unwrap();
    assert_eq!(report.delivered(), 3);

    let mut ids: Vec<_> = report.deliveries.iter().map(|(_, id)| *id).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 3);

    for q in &queues {
        assert_eq!(q.stats().await.visible, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn only_successful_messages_of_a_batch_are_acked() {
    let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());
    let (handler, seen) = recording("thumbs", |m| m.event.key == "m2");
    let counters = Arc::new(Counters::new());

    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(queue.clone(), handler))
        .with_subscribers(observed(&counters))
        .build()
        .unwrap();
    pipeline.start().await;

    for key in ["m1", "m2", "m3"] {
        pipeline.on_object_created(image(key)).await.unwrap();
    }
    time::sleep(Duration::from_secs(6)).await;

    assert_eq!(seen.lock().unwrap().len(), 3);
    let stats = queue.stats().await;
    assert_eq!(stats.in_flight, 1);
    assert_eq!(stats.visible, 0);

    let c = counters.get("img-created-queue").await;
    assert_eq!(c.acked, 2);
    assert_eq!(c.failed, 1);
    assert_eq!(c.batches, 1);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_queue_redelivers_without_touching_its_sibling() {
    let policy = QueuePolicy {
        visibility_timeout: Duration::from_secs(30),
        max_receive_count: 3,
    };
    let q1 = MemoryQueue::arc("img-created-queue", policy);
    let q2 = MemoryQueue::arc("img-backup-queue", policy);
    let (crashy, seen1) = recording("thumbs", |m| m.receive_count == 1);
    let (steady, seen2) = recording("backup", |_| false);

    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(q1.clone(), crashy))
        .with_route(Route::new(q2.clone(), steady))
        .build()
        .unwrap();
    pipeline.start().await;
    pipeline.on_object_created(image("cat.png")).await.unwrap();

    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(q1.stats().await.in_flight, 1);
    assert_eq!(q2.stats().await.in_flight + q2.stats().await.visible, 0);

    time::sleep(Duration::from_secs(50)).await;
    assert_eq!(
        *seen1.lock().unwrap(),
        vec![("cat.png".to_string(), 1), ("cat.png".to_string(), 2)]
    );
    assert_eq!(*seen2.lock().unwrap(), vec![("cat.png".to_string(), 1)]);
    assert_eq!(q1.stats().await.in_flight + q1.stats().await.visible, 0);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn batching_window_closes_at_five_seconds() {
    let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());
    let batches: Arc<Mutex<Vec<Instant>>> = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&batches);
    let handler = HandlerFn::arc("stamp", move |_m: Message, _t: CancellationToken| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap().push(Instant::now());
            Ok(())
        }
    });
    let counters = Arc::new(Counters::new());

    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(queue, handler))
        .with_subscribers(observed(&counters))
        .build()
        .unwrap();
    pipeline.start().await;
    settle().await;

    let start = Instant::now();
    pipeline.on_object_created(image("a")).await.unwrap();
    time::sleep(Duration::from_secs(1)).await;
    pipeline.on_object_created(image("b")).await.unwrap();
    time::sleep(Duration::from_secs(1)).await;
    pipeline.on_object_created(image("c")).await.unwrap();
    time::sleep(Duration::from_secs(10)).await;

    let stamps = batches.lock().unwrap().clone();
    assert_eq!(stamps.len(), 3);
    assert!(stamps.iter().all(|t| *t - start == Duration::from_secs(5)));
    assert_eq!(counters.get("img-created-queue").await.batches, 1);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_fully_failed_batch_stays_hidden_until_visibility_expires() {
    let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());
    let (handler, seen) = recording("always-fails", |_| true);

    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(queue.clone(), handler))
        .build()
        .unwrap();
    pipeline.start().await;
    for i in 0..5 {
        pipeline.on_object_created(image(&format!("img-{i}"))).await.unwrap();
    }

    time::sleep(Duration::from_secs(29)).await;
    assert_eq!(seen.lock().unwrap().len(), 5);
    let stats = queue.stats().await;
    assert_eq!(stats.in_flight, 5);
    assert_eq!(stats.dead_lettered, 0);

    time::sleep(Duration::from_secs(10)).await;
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 10);
    assert!(seen[5..].iter().all(|(_, count)| *count == 2));

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn exhausted_message_is_dead_lettered_once() {
    let policy = QueuePolicy {
        visibility_timeout: Duration::from_secs(10),
        max_receive_count: 2,
    };
    let queue = MemoryQueue::arc("img-notify-queue", policy);
    let (handler, seen) = recording("mailer", |_| true);
    let counters = Arc::new(Counters::new());

    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(queue.clone(), handler).with_config(DispatcherConfig {
            batch_window: Duration::from_secs(1),
            processing_timeout: Duration::from_secs(5),
            ..DispatcherConfig::default()
        }))
        .with_subscribers(observed(&counters))
        .build()
        .unwrap();
    pipeline.start().await;
    pipeline.on_object_created(image("cat.png")).await.unwrap();

    time::sleep(Duration::from_secs(120)).await;

    assert_eq!(seen.lock().unwrap().len(), 2);
    assert_eq!(queue.dead_letters().await.len(), 1);
    assert_eq!(counters.get("img-notify-queue").await.dead_lettered, 1);
    assert_eq!(queue.stats().await.in_flight + queue.stats().await.visible, 0);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn unavailable_queue_backs_off_and_others_keep_working() {
    let broken = MemoryQueue::arc("broken-queue", QueuePolicy::default());
    broken.close().await;
    let healthy = MemoryQueue::arc("img-backup-queue", QueuePolicy::default());
    let (h1, _) = recording("never-called", |_| false);
    let (h2, seen) = recording("backup", |_| false);
    let counters = Arc::new(Counters::new());

    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(broken, h1))
        .with_route(Route::new(healthy, h2))
        .with_subscribers(observed(&counters))
        .build()
        .unwrap();
    pipeline.start().await;

    let err = pipeline.on_object_created(image("cat.png")).await.unwrap_err();
    match err {
        PipelineError::PublishPartialFailure { delivered, failed, .. } => {
            assert_eq!(delivered, 1);
            assert_eq!(failed[0].queue, "broken-queue");
        }
        other => panic!("unexpected error: {other}"),
    }

    time::sleep(Duration::from_secs(10)).await;
    assert_eq!(seen.lock().unwrap().len(), 1);

    let broken_counts = counters.get("broken-queue").await;
    assert!(broken_counts.unavailable >= 2);
    assert_eq!(broken_counts.publish_failures, 1);
    assert!(
        pipeline
            .dispatcher_states()
            .iter()
            .all(|(_, s)| *s != DispatcherState::Stopped)
    );

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn timeout_fails_only_the_unfinished_messages() {
    let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());
    let handler = HandlerFn::arc("resize", |m: Message, _t: CancellationToken| async move {
        if m.event.key.starts_with("slow") {
            time::sleep(Duration::from_secs(60)).await;
        }
        Ok(())
    });
    let counters = Arc::new(Counters::new());

    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(queue.clone(), handler).with_config(DispatcherConfig {
            batch_window: Duration::from_secs(1),
            processing_timeout: Duration::from_secs(2),
            ..DispatcherConfig::default()
        }))
        .with_subscribers(observed(&counters))
        .build()
        .unwrap();
    pipeline.start().await;
    pipeline.on_object_created(image("fast.png")).await.unwrap();
    pipeline.on_object_created(image("slow.png")).await.unwrap();

    time::sleep(Duration::from_secs(5)).await;

    let c = counters.get("img-created-queue").await;
    assert_eq!(c.timeouts, 1);
    assert_eq!(c.acked, 1);
    assert_eq!(c.failed, 1);
    assert_eq!(queue.stats().await.in_flight, 1);

    pipeline.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_lets_the_batch_in_hand_finish() {
    let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());
    let counters = Arc::new(Counters::new());

    let pipeline = Pipeline::builder(PipelineConfig {
        grace: Duration::from_secs(10),
        ..PipelineConfig::default()
    })
    .with_route(
        Route::new(queue.clone(), sleeping("slow", Duration::from_secs(3))).with_config(
            DispatcherConfig {
                batch_window: Duration::ZERO,
                ..DispatcherConfig::default()
            },
        ),
    )
    .with_subscribers(observed(&counters))
    .build()
    .unwrap();
    pipeline.start().await;
    pipeline.on_object_created(image("cat.png")).await.unwrap();

    let mut handle = pipeline.dispatchers()[0].clone();
    assert!(handle.wait_for(DispatcherState::Processing).await);

    pipeline.shutdown().await.unwrap();
    settle().await;

    assert_eq!(counters.get("img-created-queue").await.acked, 1);
    assert_eq!(queue.stats().await.in_flight, 0);
    assert_eq!(
        pipeline.dispatcher_states(),
        vec![("img-created-queue".to_string(), DispatcherState::Stopped)]
    );
}

#[tokio::test(start_paused = true)]
async fn stuck_dispatcher_is_abandoned_after_grace() {
    let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());

    let pipeline = Pipeline::builder(PipelineConfig {
        grace: Duration::from_secs(1),
        ..PipelineConfig::default()
    })
    .with_route(
        Route::new(queue.clone(), sleeping("stuck", Duration::from_secs(600))).with_config(
            DispatcherConfig {
                batch_window: Duration::ZERO,
                processing_timeout: Duration::ZERO,
                ..DispatcherConfig::default()
            },
        ),
    )
    .build()
    .unwrap();
    pipeline.start().await;
    pipeline.on_object_created(image("cat.png")).await.unwrap();

    let mut handle = pipeline.dispatchers()[0].clone();
    assert!(handle.wait_for(DispatcherState::Processing).await);

    match pipeline.shutdown().await {
        Err(RuntimeError::GraceExceeded { grace, stuck }) => {
            assert_eq!(grace, Duration::from_secs(1));
            assert_eq!(stuck, vec!["img-created-queue".to_string()]);
        }
        other => panic!("expected GraceExceeded, got {other:?}"),
    }
    assert_eq!(queue.stats().await.in_flight, 1);
}

#[tokio::test(start_paused = true)]
async fn run_returns_when_the_shutdown_token_is_cancelled() {
    let queue = MemoryQueue::arc("img-created-queue", QueuePolicy::default());
    let (handler, _) = recording("noop", |_| false);
    let pipeline = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(queue, handler))
        .build()
        .unwrap();

    let token = pipeline.shutdown_token();
    let runner = {
        let p = Arc::clone(&pipeline);
        tokio::spawn(async move { p.run().await })
    };
    time::sleep(Duration::from_secs(1)).await;
    pipeline.start().await;
    token.cancel();

    runner.await.unwrap().unwrap();
    assert_eq!(pipeline.dispatcher_states()[0].1, DispatcherState::Stopped);
}

#[tokio::test]
async fn builder_rejects_bad_routes() {
    let q = MemoryQueue::arc("dup", QueuePolicy::default());
    let (h, _) = recording("noop", |_| false);

    let dup = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(q.clone(), h.clone()))
        .with_route(Route::new(q.clone(), h.clone()))
        .build();
    assert!(matches!(dup, Err(PipelineError::InvalidConfig { .. })));

    let empty_batch = Pipeline::builder(PipelineConfig::default())
        .with_route(Route::new(q, h).with_config(DispatcherConfig {
            batch_size: 0,
            ..DispatcherConfig::default()
        }))
        .build();
    assert!(matches!(empty_batch, Err(PipelineError::InvalidConfig { .. })));
}
