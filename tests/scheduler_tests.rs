//! End-to-end scheduler tests driving real jobs against a SQLite ledger.

mod common;

use common::{TestLedger, ALICE};
use coop_events::background_jobs::jobs::{NewDayJob, TemporaryMessagesFlushJob, WoodcuttingJob};
use coop_events::background_jobs::{
    create_scheduler, FnJob, JitterResolution, JobError, JobSchedule,
};
use coop_events::chance::{ScriptedChance, SeededChance};
use coop_events::channels::ChannelCode;
use coop_events::items::codes::AXE;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

#[tokio::test(start_paused = true)]
async fn test_events_post_to_talk_on_schedule() {
    let ledger = TestLedger::new();
    let (ctx, sink) = ledger.context(Arc::new(ScriptedChance::new()));
    let (scheduler, handle) = create_scheduler(ctx);

    // Scripted chance resolves jitter factors to their minimum.
    scheduler
        .register(Arc::new(WoodcuttingJob::new(secs(60), 1)))
        .await
        .unwrap();
    scheduler
        .register(Arc::new(NewDayJob::new(secs(60))))
        .await
        .unwrap();

    let runner = tokio::spawn(async move { scheduler.run_forever(secs(5)).await });
    tokio::time::sleep(secs(125)).await;
    handle.wait_idle().await;

    let jobs = handle.list_jobs().await;
    let fires = |name: &str| jobs.iter().find(|j| j.name == name).unwrap().fire_count;
    assert_eq!(fires("woodcutting"), 2);
    assert_eq!(fires("new_day"), 4);

    // One new-day summary; the rest of the talk channel is wood stacks and their headers.
    let talk = sink.texts(ChannelCode::Talk);
    assert_eq!(talk.iter().filter(|t| t.starts_with("A new day")).count(), 1);
    assert_eq!(talk.len(), 1 + 2 * 2);

    handle.stop();
    assert!(runner.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_same_seed_gives_same_cadence() {
    let mut periods = Vec::new();
    for _ in 0..2 {
        let ledger = TestLedger::new();
        let (ctx, _sink) = ledger.context(Arc::new(SeededChance::from_seed(7)));
        let (scheduler, handle) = create_scheduler(ctx);
        scheduler
            .register(Arc::new(WoodcuttingJob::new(secs(1500), 1)))
            .await
            .unwrap();
        let period = handle.list_jobs().await[0].effective_period;
        assert!(period >= secs(1500) && period <= secs(7500));
        periods.push(period);
    }
    assert_eq!(periods[0], periods[1]);
}

#[tokio::test(start_paused = true)]
async fn test_failing_job_is_reported_and_others_keep_running() {
    let ledger = TestLedger::new();
    let (ctx, sink) = ledger.context(Arc::new(ScriptedChance::new()));
    let (scheduler, handle) = create_scheduler(ctx);

    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    scheduler
        .register(Arc::new(FnJob::new(
            "axe_audit",
            JobSchedule::every(secs(30)),
            move |ctx| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    ctx.guard.quantity(ALICE, AXE).await?;
                    Ok::<(), JobError>(())
                }
            },
        )))
        .await
        .unwrap();
    scheduler
        .register(Arc::new(FnJob::new(
            "broken",
            JobSchedule::every(secs(30)).with_jitter(1.0, 1.0, JitterResolution::PerFire),
            |_ctx| async { Err::<(), _>(JobError::ExecutionFailed("boom".to_string())) },
        )))
        .await
        .unwrap();

    let runner = tokio::spawn(async move { scheduler.run_forever(secs(10)).await });
    tokio::time::sleep(secs(95)).await;
    handle.wait_idle().await;
    handle.stop();
    runner.await.unwrap().unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 3);
    let errors = sink.texts(ChannelCode::Errors);
    assert_eq!(errors.len(), 3);
    assert!(errors.iter().all(|e| e.contains("broken") && e.contains("boom")));
}

#[tokio::test(start_paused = true)]
async fn test_zero_probability_job_never_runs() {
    let ledger = TestLedger::new();
    let (ctx, sink) = ledger.context(Arc::new(SeededChance::from_seed(1)));
    let (scheduler, handle) = create_scheduler(ctx);
    scheduler
        .register_with_schedule(
            Arc::new(TemporaryMessagesFlushJob::new(secs(10))),
            JobSchedule::every(secs(10)).with_probability(0.0),
        )
        .await
        .unwrap();

    let runner = tokio::spawn(async move { scheduler.run_forever(secs(1)).await });
    tokio::time::sleep(secs(300)).await;
    handle.stop();
    runner.await.unwrap().unwrap();

    assert_eq!(handle.list_jobs().await[0].fire_count, 0);
    assert!(sink.messages().is_empty());
}
