//! Multi-sequence behavior: registry, end listeners and shared scopes

use action_queue::util::{delay, from_fn, FnAction};
use action_queue::{
    Action, ActionExt, NoopLogger, QueueConfig, QueueContext, QueueError, QueueItem, QueueLogger,
    QueueRunner, Scope, SequenceSpec,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

type Order = Arc<Mutex<Vec<String>>>;

fn runner() -> QueueRunner {
    QueueRunner::with_logger(QueueConfig::default(), Arc::new(NoopLogger)).unwrap()
}

fn record(order: &Order, label: impl Into<String>) -> QueueItem {
    let order = order.clone();
    let label = label.into();
    from_fn(label.clone(), move |_| {
        order.lock().push(label.clone());
        Ok(())
    })
}

/// Holds its scope for a while and checks nobody else is inside
struct Critical {
    tag: String,
    events: Order,
    inside: Arc<AtomicUsize>,
    runner: QueueRunner,
    scope: Scope,
}

#[async_trait]
impl Action for Critical {
    async fn execute(&self, _ctx: &mut QueueContext) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.runner.lock_manager().is_locked(&self.scope),
            "scope not held while running"
        );
        anyhow::ensure!(
            self.inside.fetch_add(1, Ordering::SeqCst) == 0,
            "critical section overlap"
        );
        self.events.lock().push(format!("start-{}", self.tag));
        tokio::time::sleep(Duration::from_millis(10)).await;
        self.events.lock().push(format!("end-{}", self.tag));
        self.inside.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_error(&self, error: anyhow::Error, _ctx: &mut QueueContext) -> anyhow::Result<()> {
        self.events.lock().push(format!("error-{}: {}", self.tag, error));
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn test_end_listener_sees_sequences_finish() {
    let order: Order = Default::default();
    let events: Arc<Mutex<Vec<(String, usize, Vec<String>)>>> = Default::default();

    let runner = runner();
    let sink = events.clone();
    let snapshot = order.clone();
    runner.add_end_listener(move |name, size| {
        sink.lock()
            .push((name.to_string(), size, snapshot.lock().clone()));
    });

    let pusher = order.clone();
    let first = runner
        .add(vec![
            delay(10),
            from_fn("pushSecond", move |_| {
                pusher.lock().push("second".into());
                Ok(())
            }),
        ])
        .unwrap();
    let second = runner
        .add(vec![
            record(&order, "first"),
            delay(15),
            record(&order, "third"),
        ])
        .unwrap();
    assert_eq!(runner.active_count(), 2);

    runner.wait_idle().await;

    let events = events.lock().clone();
    assert_eq!(
        events,
        vec![
            (first, 1, vec!["first".to_string(), "second".to_string()]),
            (
                second,
                0,
                vec!["first".to_string(), "second".to_string(), "third".to_string()]
            ),
        ]
    );
    assert_eq!(runner.active_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_locked_actions_never_overlap_across_sequences() {
    let runner = runner();
    let scope = Scope::new("x").unwrap();
    let events: Order = Default::default();
    let inside = Arc::new(AtomicUsize::new(0));

    for tag in ["one", "two", "three"] {
        let critical = Critical {
            tag: tag.to_string(),
            events: events.clone(),
            inside: inside.clone(),
            runner: runner.clone(),
            scope: scope.clone(),
        };
        runner
            .add_sequence(
                SequenceSpec::new(vec![
                    record(&events, format!("A-{}", tag)),
                    critical.locked(&scope).into_item(),
                    record(&events, format!("C-{}", tag)),
                ])
                .with_name(tag),
            )
            .unwrap();
    }

    runner.wait_idle().await;

    let events = events.lock().clone();
    assert!(events.iter().all(|e| !e.starts_with("error")), "{:?}", events);

    let critical: Vec<&String> = events
        .iter()
        .filter(|e| e.starts_with("start-") || e.starts_with("end-"))
        .collect();
    assert_eq!(critical.len(), 6);
    for pair in critical.chunks(2) {
        let tag = pair[0].trim_start_matches("start-");
        assert_eq!(pair[1], &format!("end-{}", tag));
    }

    for tag in ["one", "two", "three"] {
        assert!(events.contains(&format!("A-{}", tag)));
        assert!(events.contains(&format!("C-{}", tag)));
    }
    assert!(!runner.lock_manager().is_locked(&scope));
}

#[tokio::test]
async fn test_duplicate_active_name_rejected() {
    let runner = runner();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
    let gate = Arc::new(Mutex::new(Some(release_rx)));

    struct Gate(Arc<Mutex<Option<tokio::sync::oneshot::Receiver<()>>>>);

    #[async_trait]
    impl Action for Gate {
        async fn execute(&self, _ctx: &mut QueueContext) -> anyhow::Result<()> {
            let receiver = self.0.lock().take();
            if let Some(receiver) = receiver {
                receiver.await?;
            }
            Ok(())
        }
    }

    runner
        .add_sequence(SequenceSpec::new(vec![Gate(gate).into_item()]).with_name("crawler"))
        .unwrap();
    assert!(runner.is_active("crawler"));

    let duplicate = runner.add_sequence(SequenceSpec::new(vec![]).with_name("crawler"));
    assert!(matches!(duplicate, Err(QueueError::DuplicateSequence(ref n)) if n == "crawler"));

    release_tx.send(()).unwrap();
    runner.wait_idle().await;

    // The name is free again once the sequence has finished
    runner
        .add_sequence(SequenceSpec::new(vec![]).with_name("crawler"))
        .unwrap();
    runner.wait_idle().await;
    assert!(!runner.is_active("crawler"));
}

#[tokio::test]
async fn test_initial_fields_and_generated_name() {
    let runner = runner();
    let seen: Order = Default::default();
    let sink = seen.clone();

    let name = runner
        .add_sequence(
            SequenceSpec::new(vec![from_fn("read", move |ctx| {
                let user: String = ctx.get_as("user")?;
                sink.lock().push(format!("{}:{}", ctx.name(), user));
                Ok(())
            })])
            .with_fields(serde_json::json!({"user": "ada"})),
        )
        .unwrap();

    assert_eq!(name.len(), 8);
    runner.wait_idle().await;
    assert_eq!(*seen.lock(), vec![format!("{}:ada", name)]);
}

#[tokio::test]
async fn test_failed_sequence_is_deregistered_and_reported() {
    let runner = runner();
    let reported: Arc<Mutex<Vec<(String, usize)>>> = Default::default();
    let sink = reported.clone();
    runner.add_end_listener(move |name, size| sink.lock().push((name.to_string(), size)));

    runner
        .add_sequence(
            SequenceSpec::new(vec![QueueItem::factory(|| {
                Err(anyhow::anyhow!("cannot build"))
            })])
            .with_name("broken"),
        )
        .unwrap();

    runner.wait_idle().await;
    assert_eq!(*reported.lock(), vec![("broken".to_string(), 0)]);
    assert!(!runner.is_active("broken"));
}

#[tokio::test]
async fn test_listeners_called_in_registration_order() {
    let runner = runner();
    let calls: Order = Default::default();

    for label in ["first", "second", "third"] {
        let calls = calls.clone();
        runner.add_end_listener(move |name, _| calls.lock().push(format!("{}:{}", label, name)));
    }

    runner
        .add_sequence(SequenceSpec::new(vec![delay(1)]).with_name("solo"))
        .unwrap();
    runner.wait_idle().await;

    assert_eq!(
        *calls.lock(),
        vec!["first:solo", "second:solo", "third:solo"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_sequences_listing_while_running() {
    let runner = runner();
    runner
        .add_sequence(SequenceSpec::new(vec![delay(20)]).with_name("slow"))
        .unwrap();
    runner
        .add_sequence(SequenceSpec::new(vec![delay(5)]).with_name("fast"))
        .unwrap();

    let names: Vec<String> = runner.sequences().into_iter().map(|s| s.name).collect();
    assert_eq!(names.len(), 2);
    assert!(names.contains(&"slow".to_string()));
    assert!(names.contains(&"fast".to_string()));

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!runner.is_active("fast"));
    assert!(runner.is_active("slow"));

    runner.wait_idle().await;
    assert!(runner.sequences().is_empty());
}

#[tokio::test]
async fn test_default_runner_logs_through_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();

    let runner = QueueRunner::new();
    let order: Order = Default::default();
    let name = runner
        .add(vec![
            record(&order, "traced"),
            from_fn("fails", |_| Err(anyhow::anyhow!("logged, then aborted"))),
            record(&order, "skipped"),
        ])
        .unwrap();

    assert!(runner.is_active(&name));
    runner.wait_idle().await;
    assert_eq!(*order.lock(), vec!["traced"]);
}

#[tokio::test]
async fn test_panicking_factory_still_completes_sequence() {
    let runner = runner();
    let reported: Arc<Mutex<Vec<(String, usize)>>> = Default::default();
    let sink = reported.clone();
    runner.add_end_listener(move |name, size| sink.lock().push((name.to_string(), size)));

    let ran: Order = Default::default();
    runner
        .add_sequence(
            SequenceSpec::new(vec![
                QueueItem::factory(|| panic!("constructor blew up")),
                record(&ran, "after"),
            ])
            .with_name("exploding"),
        )
        .unwrap();

    tokio::time::timeout(Duration::from_millis(500), runner.wait_idle())
        .await
        .expect("runner never went idle");
    assert_eq!(*reported.lock(), vec![("exploding".to_string(), 0)]);
    assert!(!runner.is_active("exploding"));
    assert!(ran.lock().is_empty());
}

#[tokio::test]
async fn test_uncaught_panic_deregisters_and_releases_scope() {
    let config = QueueConfig::default().with_catch_panics(false);
    let runner = QueueRunner::with_logger(config, Arc::new(NoopLogger)).unwrap();
    let scope = Scope::new("driver").unwrap();

    let reported: Arc<Mutex<Vec<(String, usize)>>> = Default::default();
    let sink = reported.clone();
    runner.add_end_listener(move |name, size| sink.lock().push((name.to_string(), size)));

    let crash = FnAction::new("crash", |_| panic!("unrecoverable"));
    runner
        .add_sequence(
            SequenceSpec::new(vec![crash.locked(&scope).into_item()]).with_name("crashing"),
        )
        .unwrap();

    tokio::time::timeout(Duration::from_millis(500), runner.wait_idle())
        .await
        .expect("runner never went idle");
    assert_eq!(*reported.lock(), vec![("crashing".to_string(), 0)]);
    assert!(!runner.lock_manager().is_locked(&scope));

    // The scope is usable by later sequences
    let ran: Order = Default::default();
    let sink = ran.clone();
    let next = FnAction::new("next", move |_| {
        sink.lock().push("next".into());
        Ok(())
    });
    runner.add(vec![next.locked(&scope).into_item()]).unwrap();
    runner.wait_idle().await;
    assert_eq!(*ran.lock(), vec!["next"]);
}

/// Keeps the label of every info line it receives
#[derive(Default)]
struct LabelLog {
    label: Mutex<String>,
    lines: Mutex<Vec<String>>,
}

impl QueueLogger for LabelLog {
    fn info(&self, message: &str) {
        let label = self.label.lock().clone();
        self.lines.lock().push(format!("{}|{}", label, message));
    }

    fn set_context(&self, label: &str) {
        *self.label.lock() = label.to_string();
    }

    fn error(&self, _error: &anyhow::Error) {}
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sequences_keep_their_own_labels() {
    let loggers: Arc<Mutex<HashMap<String, Arc<LabelLog>>>> = Default::default();
    let registry = loggers.clone();
    let runner = QueueRunner::with_logger_factory(QueueConfig::default(), move |name| {
        let logger = Arc::new(LabelLog::default());
        registry.lock().insert(name.to_string(), logger.clone());
        logger as Arc<dyn QueueLogger>
    })
    .unwrap();

    // Interleave: each sequence sets its label, then sleeps while the other runs
    for name in ["left", "right"] {
        let step = format!("{}-step", name);
        let sleepy = FnAction::new(step.clone(), |_| Ok(())).paced(Duration::from_millis(10));
        runner
            .add_sequence(
                SequenceSpec::new(vec![
                    sleepy.into_item(),
                    from_fn(format!("{}-tail", name), |_| Ok(())),
                ])
                .with_name(name),
            )
            .unwrap();
    }
    runner.wait_idle().await;

    let loggers = loggers.lock();
    for name in ["left", "right"] {
        let lines = loggers[name].lines.lock().clone();
        assert_eq!(
            lines,
            vec![
                format!("{}-step|Queue({}): running action", name, name),
                format!("{}-tail|Queue({}): running action", name, name),
                format!("{}-tail|Queue({}): stopped", name, name),
            ]
        );
    }
}
