//! # Demo: image_pipeline
//!
//! One "new image" topic feeding three queues:
//! - `img-created-queue` → [`ImageProcessor`] (validates and transforms the image)
//! - `img-backup-queue`  → [`BackupReplicator`] (copies it to a second store)
//! - `img-notify-queue`  → [`Mailer`] (tells an operator)
//!
//! A text file sneaks in among the images: the image processor rejects it on
//! every delivery until the queue dead-letters it into `img-dead-letters`,
//! while the backup and notification queues handle it normally.
//!
//! ## Flow
//! ```text
//! on_object_created ──► Topic("new-image")
//!     ├─► img-created-queue ──► Dispatcher ──► ImageProcessor ──► store: processed/<key>
//!     ├─► img-backup-queue  ──► Dispatcher ──► BackupReplicator ─► backups: backup/<key>
//!     └─► img-notify-queue  ──► Dispatcher ──► Mailer ──────────► outbox
//!
//! Events ──► LogWriter (tracing) + Counters
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=fanvisor=debug cargo run --example image_pipeline
//! ```

use std::{sync::Arc, time::Duration};

use fanvisor::{
    BackupReplicator, Counters, DispatcherConfig, ImageProcessor, LogWriter, Mailer, MemoryQueue,
    MemoryStore, ObjectEvent, Outbox, PerMessage, Pipeline, PipelineConfig, QueuePolicy, Route,
    Subscribe,
};
use tracing_subscriber::EnvFilter;

const PNG: &[u8] = b"\x89PNG\r\n\x1a\n demo pixels";
const JPEG: &[u8] = b"\xff\xd8\xff\xe0 demo pixels";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // 1. Collaborators
    let store = MemoryStore::arc();
    let backups = MemoryStore::arc();
    let outbox = Outbox::arc();
    store.put("cats/tom.png", PNG).await;
    store.put("cats/felix.jpg", JPEG).await;
    store.put("notes/readme.txt", b"not an image".as_slice()).await;

    // 2. Queues: short visibility so the demo shows redelivery quickly
    let policy = QueuePolicy {
        visibility_timeout: Duration::from_secs(2),
        max_receive_count: 3,
    };
    let dead = MemoryQueue::arc("img-dead-letters", QueuePolicy::default());
    let created = Arc::new(
        MemoryQueue::new("img-created-queue", policy).with_dead_letter_queue(dead.clone()),
    );
    let backup = MemoryQueue::arc("img-backup-queue", policy);
    let notify = MemoryQueue::arc("img-notify-queue", policy);

    // 3. Handlers
    let thumbs = PerMessage::arc(
        ImageProcessor::new(store.clone()).with_transform(Arc::new(
            |bytes: &[u8]| -> Result<Vec<u8>, String> { Ok(bytes.iter().rev().copied().collect()) },
        )),
    );
    let replicate = PerMessage::arc(BackupReplicator::new(store.clone(), backups.clone()));
    let mailer = PerMessage::arc(Mailer::new(outbox.clone(), "ops@example.com"));

    // 4. Observers
    let counters = Arc::new(Counters::new());
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new()), counters.clone()];

    // 5. Pipeline
    let fast = DispatcherConfig {
        batch_window: Duration::from_millis(200),
        wait_time: Duration::from_secs(1),
        processing_timeout: Duration::from_secs(1),
        ..DispatcherConfig::default()
    };
    let pipeline = Pipeline::builder(PipelineConfig {
        grace: Duration::from_secs(5),
        ..PipelineConfig::default()
    })
    .with_topic_name("new-image")
    .with_route(Route::new(created.clone(), thumbs).with_config(fast.clone()))
    .with_route(Route::new(backup, replicate).with_config(fast.clone()))
    .with_route(Route::new(notify, mailer).with_config(fast))
    .with_subscribers(subs)
    .build()?;

    pipeline.start().await;

    for (key, size, ct) in [
        ("cats/tom.png", PNG.len(), "image/png"),
        ("cats/felix.jpg", JPEG.len(), "image/jpeg"),
        ("notes/readme.txt", 12, "text/plain"),
    ] {
        let event = ObjectEvent::new("uploads", key, size as u64).with_content_type(ct);
        let report = pipeline.on_object_created(event).await?;
        println!("[demo] published {key} to {} queues", report.delivered());
    }

    // Three visibility windows: enough for the text file to run out of receives.
    tokio::time::sleep(Duration::from_secs(8)).await;
    pipeline.shutdown().await?;

    println!("[demo] processed: {:?}", store.keys().await);
    println!("[demo] backups:   {:?}", backups.keys().await);
    println!("[demo] mails:     {}", outbox.sent().await.len());
    println!("[demo] dead:      {:?}", dead.stats().await);
    for (queue, c) in counters.snapshot().await {
        println!(
            "[demo] {queue:<18} batches={} acked={} failed={} dead={}",
            c.batches, c.acked, c.failed, c.dead_lettered
        );
    }
    Ok(())
}
