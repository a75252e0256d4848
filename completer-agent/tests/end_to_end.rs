//! Full-loop tests wiring the requester, dispatch, and generator task
//! together over a scripted backend.

use completer_agent::{
    connect, CompletionChunk, CompletionNotifier, ScriptedBackend, ScriptedModel, StreamError,
};
use completer_protocol::{CompleterSettings, CompletionKind, SamplingSettings, WorkerEnv};
use futures::StreamExt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;

const DEADLINE: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingNotifier {
    failures: Mutex<Vec<String>>,
    ready: Mutex<Vec<String>>,
}

impl CompletionNotifier for RecordingNotifier {
    fn loading_started(&self, _model: &str, _file: &str) {}
    fn loading_progress(&self, _: &str, _: &str, _: u64, _: u64, _: f32) {}
    fn loading_done(&self, _model: &str, _file: &str) {}
    fn model_ready(&self, model: &str) {
        self.ready.lock().unwrap().push(model.to_string());
    }
    fn generation_failed(&self, error: &str) {
        self.failures.lock().unwrap().push(error.to_string());
    }
}

fn settings_for(model: &str) -> CompleterSettings {
    CompleterSettings {
        code_model: Some(model.to_string()),
        text_model: None,
        ..Default::default()
    }
}

async fn collect(
    requester: &completer_agent::CompletionRequester,
    id: completer_protocol::CandidateId,
) -> Vec<Result<CompletionChunk, StreamError>> {
    timeout(DEADLINE, requester.stream(id).collect::<Vec<_>>())
        .await
        .expect("stream finished within the deadline")
}

#[tokio::test]
async fn test_fetch_streams_two_candidates_to_completion() {
    let backend = Arc::new(
        ScriptedBackend::new().with_model("m", ScriptedModel::completing_with(["fo", "o()"])),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings_for("m"),
        notifier.clone(),
    )
    .unwrap();

    let candidates = timeout(
        DEADLINE,
        handle.requester.fetch(CompletionKind::Code, "x = "),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(candidates.len(), 2);

    for candidate in &candidates {
        let chunks = collect(&handle.requester, candidate.id).await;
        // Cumulative fragments, prefix stripped, terminal chunk last.
        let texts: Vec<_> = chunks
            .iter()
            .map(|c| c.as_ref().unwrap().clone())
            .collect();
        assert_eq!(texts.last().unwrap().text, "foo()");
        assert!(texts.last().unwrap().done);
        assert!(texts[..texts.len() - 1].iter().all(|c| !c.done));
        assert!(texts.iter().any(|c| c.text == "fo"));
    }

    assert_eq!(notifier.ready.lock().unwrap().as_slice(), &["m".to_string()]);
    assert!(notifier.failures.lock().unwrap().is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_superseding_fetch_interrupts_the_older_batch() {
    let backend = Arc::new(ScriptedBackend::new().with_model(
        "m",
        ScriptedModel::completing_with(["a", "b", "c", "d", "e", "f", "g", "h"])
            .with_step_delay(Duration::from_millis(20)),
    ));
    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings_for("m"),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();

    let first = timeout(DEADLINE, handle.requester.fetch(CompletionKind::Code, "1"))
        .await
        .unwrap()
        .unwrap();

    // Wait until the first batch is observably mid-run.
    let mut first_stream = Box::pin(handle.requester.stream(first[0].id));
    let opening = timeout(DEADLINE, first_stream.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(!opening.done);

    let second = timeout(DEADLINE, handle.requester.fetch(CompletionKind::Code, "2"))
        .await
        .unwrap()
        .unwrap();

    // The older batch terminates with an interruption, never a completion.
    let rest: Vec<_> = timeout(DEADLINE, first_stream.by_ref().collect::<Vec<_>>())
        .await
        .unwrap();
    match rest.last().expect("terminal item") {
        Err(StreamError::Interrupted(_)) => {}
        other => panic!("unexpected terminal: {:?}", other),
    }
    assert!(rest
        .iter()
        .all(|item| !matches!(item, Ok(chunk) if chunk.done)));
    let sibling = collect(&handle.requester, first[1].id).await;
    assert!(matches!(
        sibling.last(),
        Some(Err(StreamError::Interrupted(_)))
    ));

    // The newest batch still completes in full.
    let chunks = collect(&handle.requester, second[0].id).await;
    let last = chunks.last().unwrap().as_ref().unwrap();
    assert!(last.done);
    assert_eq!(last.text, "abcdefgh");

    drop(first_stream);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_debounce_collapses_rapid_fetches_into_the_newest() {
    let backend = Arc::new(
        ScriptedBackend::new().with_model("m", ScriptedModel::completing_with(["!"])),
    );
    let mut settings = settings_for("m");
    settings.debounce_ms = 40;
    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings,
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();

    let spawn_fetch = |text: &str| {
        let requester = handle.requester.clone();
        let text = text.to_string();
        tokio::spawn(async move { requester.fetch(CompletionKind::Code, &text).await })
    };
    let first = spawn_fetch("a");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let second = spawn_fetch("ab");
    tokio::time::sleep(Duration::from_millis(5)).await;
    let third = spawn_fetch("abc");

    assert!(first.await.unwrap().is_err());
    assert!(second.await.unwrap().is_err());
    let candidates = third.await.unwrap().unwrap();

    // Only the newest request generated anything; its continuation
    // reflects the newest text.
    let chunks = collect(&handle.requester, candidates[0].id).await;
    assert_eq!(chunks.last().unwrap().as_ref().unwrap().text, "!");
    handle.shutdown().await;
}

#[tokio::test]
async fn test_slot_switch_round_trip() {
    let backend = Arc::new(
        ScriptedBackend::new()
            .with_model("old", ScriptedModel::completing_with(["from old"]))
            .with_model("new", ScriptedModel::completing_with(["from new"])),
    );
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings_for("old"),
        notifier.clone(),
    )
    .unwrap();

    let candidates = timeout(DEADLINE, handle.requester.fetch(CompletionKind::Code, ""))
        .await
        .unwrap()
        .unwrap();
    let chunks = collect(&handle.requester, candidates[0].id).await;
    assert_eq!(chunks.last().unwrap().as_ref().unwrap().text, "from old");

    // Reconfigure: the new model loads, its gate opens, fetches follow it.
    handle.requester.configure(settings_for("new")).unwrap();
    let candidates = timeout(DEADLINE, handle.requester.fetch(CompletionKind::Code, ""))
        .await
        .unwrap()
        .unwrap();
    let chunks = collect(&handle.requester, candidates[0].id).await;
    assert_eq!(chunks.last().unwrap().as_ref().unwrap().text, "from new");

    let ready = notifier.ready.lock().unwrap().clone();
    assert_eq!(ready, vec!["old".to_string(), "new".to_string()]);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_generation_failure_surfaces_and_rejects_streams() {
    let backend = Arc::new(ScriptedBackend::new().with_model(
        "m",
        ScriptedModel::completing_with(["a"]).failing_generate("tensor shape mismatch"),
    ));
    let notifier = Arc::new(RecordingNotifier::default());
    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings_for("m"),
        notifier.clone(),
    )
    .unwrap();

    let candidates = timeout(DEADLINE, handle.requester.fetch(CompletionKind::Code, "x"))
        .await
        .unwrap()
        .unwrap();
    for candidate in &candidates {
        let chunks = collect(&handle.requester, candidate.id).await;
        assert!(matches!(
            chunks.as_slice(),
            [Err(StreamError::Failed(message))] if message.contains("tensor shape mismatch")
        ));
    }
    assert_eq!(
        notifier.failures.lock().unwrap().as_slice(),
        &["tensor shape mismatch".to_string()]
    );
    handle.shutdown().await;
}

#[tokio::test]
async fn test_max_new_tokens_bounds_the_continuation() {
    let backend = Arc::new(ScriptedBackend::new().with_model(
        "m",
        ScriptedModel::completing_with(["1", "2", "3", "4", "5"]),
    ));
    let mut settings = settings_for("m");
    settings.sampling = SamplingSettings {
        max_new_tokens: 3,
        generate_n: 1,
        ..Default::default()
    };
    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings,
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();

    let candidates = timeout(DEADLINE, handle.requester.fetch(CompletionKind::Code, ""))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(candidates.len(), 1);
    let chunks = collect(&handle.requester, candidates[0].id).await;
    assert_eq!(chunks.last().unwrap().as_ref().unwrap().text, "123");
    handle.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_terminates_the_background_tasks() {
    let backend = Arc::new(
        ScriptedBackend::new().with_model("m", ScriptedModel::completing_with(["a"])),
    );
    let handle = connect(
        backend,
        WorkerEnv::default(),
        settings_for("m"),
        Arc::new(RecordingNotifier::default()),
    )
    .unwrap();

    timeout(DEADLINE, handle.requester.fetch(CompletionKind::Code, "x"))
        .await
        .unwrap()
        .unwrap();
    timeout(DEADLINE, handle.shutdown())
        .await
        .expect("shutdown completed");
}
