//! End-to-end properties of the capture pipeline over an in-process sandbox.

mod support;

use slideharvest::sandbox::SandboxHost;
use slideharvest::{ContentSpec, Error, SandboxState, SessionStatus};
use std::sync::atomic::Ordering;
use std::time::Duration;
use support::{
    harness, harness_with, Frames, Harness, InstrumentedHost, RecordingAssembler,
    RecordingPersister,
};

fn markup(m: &str) -> ContentSpec {
    ContentSpec::markup(m, 0)
}

async fn assert_cleaned_up(h: &Harness) {
    assert_eq!(h.orchestrator.status(), SessionStatus::Idle);
    assert_eq!(h.manager().state(), SandboxState::Absent);
    assert!(!h.host.has_sandbox().await);
    assert_eq!(h.bus.context_count(), 1);
}

#[tokio::test]
async fn inline_markup_scenario_saves_one_page() {
    let h = harness(Frames::Png10);
    h.orchestrator
        .capture(markup("<h1>X</h1>"), "out.pdf")
        .await
        .unwrap();

    let calls = h.assembler.calls.lock().clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].len(), 1);
    let img = image::load_from_memory(&calls[0][0].data).unwrap();
    assert_eq!((img.width(), img.height()), (10, 10));

    let saves = h.persister.saves.lock();
    assert_eq!(saves.len(), 1);
    assert_eq!(saves[0].0, "out.pdf");
    assert!(saves[0].1.bytes.starts_with(b"%PDF"));
    drop(saves);

    assert_cleaned_up(&h).await;
}

#[tokio::test]
async fn frames_keep_input_order() {
    let h = harness(Frames::Echo);
    h.orchestrator
        .capture_all(vec![markup("A"), markup("B"), markup("C")], "abc.pdf")
        .await
        .unwrap();

    let calls = h.assembler.calls.lock();
    let pages: Vec<&[u8]> = calls[0].iter().map(|f| f.data.as_slice()).collect();
    assert_eq!(pages, vec![b"A".as_slice(), b"B", b"C"]);
}

#[tokio::test]
async fn concurrent_captures_are_single_flight() {
    let h = harness(Frames::Echo);
    let (first, second) = tokio::join!(
        h.orchestrator.capture(markup("one"), "one.pdf"),
        h.orchestrator.capture(markup("two"), "two.pdf"),
    );
    let mut outcomes = vec![first, second];
    outcomes.sort_by_key(|r| r.is_err());
    assert_eq!(outcomes, vec![Ok(()), Err(Error::AlreadyRunning)]);
    assert_eq!(h.persister.saves.lock().len(), 1);
    assert_eq!(h.host.creates(), 1);
    assert_cleaned_up(&h).await;
}

#[tokio::test]
async fn rejected_capture_leaves_running_session_alone() {
    let h = harness(Frames::Echo);
    let slow = ContentSpec::markup("slow", 200);
    let running = h.orchestrator.capture(slow, "slow.pdf");
    tokio::pin!(running);

    // drive the first session until it is inside the pipeline
    tokio::select! {
        _ = &mut running => panic!("finished too early"),
        _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
    }
    assert_eq!(h.orchestrator.status(), SessionStatus::Running);
    assert_eq!(
        h.orchestrator.capture(markup("x"), "x.pdf").await,
        Err(Error::AlreadyRunning)
    );
    assert_eq!(h.orchestrator.status(), SessionStatus::Running);

    running.await.unwrap();
    assert_cleaned_up(&h).await;
}

#[tokio::test]
async fn zero_frames_never_reach_assembly() {
    let h = harness(Frames::Echo);
    let err = h.orchestrator.capture_all(Vec::new(), "empty.pdf").await;
    assert_eq!(err, Err(Error::NoFramesCaptured));
    assert!(h.assembler.calls.lock().is_empty());
    assert!(h.persister.saves.lock().is_empty());
    assert_cleaned_up(&h).await;
}

#[tokio::test]
async fn cleanup_after_creation_failure() {
    let h = harness_with(
        |bus| {
            let mut host = InstrumentedHost::new(bus, Frames::Echo);
            host.refuse = true;
            host
        },
        RecordingAssembler::default(),
        RecordingPersister::default(),
    );
    let err = h.orchestrator.capture(markup("x"), "x.pdf").await.unwrap_err();
    assert!(matches!(err, Error::SandboxCreationFailed(_)));
    assert_cleaned_up(&h).await;
    // nothing was ready, so nothing was closed
    assert_eq!(h.host.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cleanup_after_load_failure() {
    let h = harness(Frames::Echo);
    let err = h
        .orchestrator
        .capture(ContentSpec::url("https://example.com/deck", 0), "x.pdf")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SandboxOperationFailed(_)));
    assert_cleaned_up(&h).await;
}

#[tokio::test]
async fn cleanup_after_capture_failure() {
    let h = harness(Frames::Blind);
    let err = h.orchestrator.capture(markup("x"), "x.pdf").await.unwrap_err();
    assert!(matches!(err, Error::CaptureUnavailable(_)));
    assert_cleaned_up(&h).await;
}

#[tokio::test]
async fn cleanup_after_assembly_failure() {
    let h = harness_with(
        |bus| InstrumentedHost::new(bus, Frames::Echo),
        RecordingAssembler {
            fail: true,
            ..Default::default()
        },
        RecordingPersister::default(),
    );
    let err = h.orchestrator.capture(markup("x"), "x.pdf").await.unwrap_err();
    assert_eq!(err, Error::AssemblyError("injected".into()));
    assert!(h.persister.saves.lock().is_empty());
    assert_cleaned_up(&h).await;
}

#[tokio::test]
async fn cleanup_after_persistence_failure() {
    let h = harness_with(
        |bus| InstrumentedHost::new(bus, Frames::Echo),
        RecordingAssembler::default(),
        RecordingPersister {
            fail: true,
            ..Default::default()
        },
    );
    let err = h.orchestrator.capture(markup("x"), "x.pdf").await.unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert_cleaned_up(&h).await;

    // the orchestrator is reusable afterwards
    let err = h.orchestrator.capture(markup("y"), "y.pdf").await.unwrap_err();
    assert!(matches!(err, Error::Persistence(_)));
    assert_eq!(h.host.creates(), 2);
}

#[tokio::test]
async fn dropped_session_is_cleaned_up() {
    let h = harness(Frames::Echo);
    {
        let slow = h.orchestrator.capture(ContentSpec::markup("slow", 5_000), "x.pdf");
        let _ = tokio::time::timeout(std::time::Duration::from_millis(100), slow).await;
    }

    let mut states = h.manager().watch_state();
    states
        .wait_for(|s| *s == SandboxState::Absent)
        .await
        .unwrap();
    for _ in 0..100 {
        if h.orchestrator.status() == SessionStatus::Idle {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(h.orchestrator.status(), SessionStatus::Idle);
}

#[tokio::test]
async fn session_dropped_during_creation_is_cleaned_up() {
    let h = harness_with(
        |bus| {
            let mut host = InstrumentedHost::new(bus, Frames::Echo);
            host.create_delay = Duration::from_millis(300);
            host
        },
        RecordingAssembler::default(),
        RecordingPersister::default(),
    );
    let capture = h.orchestrator.capture(markup("x"), "x.pdf");
    assert!(tokio::time::timeout(Duration::from_millis(100), capture)
        .await
        .is_err());
    assert_eq!(h.manager().state(), SandboxState::Creating);

    // the abandoned creation finishes on its own and is then torn down
    let mut states = h.manager().watch_state();
    tokio::time::timeout(
        Duration::from_secs(2),
        states.wait_for(|s| *s == SandboxState::Absent),
    )
    .await
    .unwrap()
    .unwrap();
    for _ in 0..100 {
        if h.orchestrator.status() == SessionStatus::Idle {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_cleaned_up(&h).await;
    assert_eq!(h.host.creates(), 1);
    assert_eq!(h.host.closes.load(Ordering::SeqCst), 1);
}
