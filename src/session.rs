//! AG-UI session lifecycle.
//!
//! A session is one chat request turned into a finite event sequence:
//!
//! ```text
//! RUN_STARTED
//! TEXT_MESSAGE_START
//! TEXT_MESSAGE_CONTENT*
//! TEXT_MESSAGE_END
//! RUN_FINISHED (success)
//! ```
//!
//! Any failure after `RUN_STARTED` cuts the sequence short and ends it with a
//! single `RUN_FINISHED` carrying `status: "error"`. Events already emitted
//! are never retracted.

use crate::documents::ContentProvider;
use crate::error::SessionError;
use crate::llm::CompletionModel;
use crate::protocol::{AgUiEvent, EventKind};
use async_stream::{stream, try_stream};
use futures::{Stream, StreamExt};
use jiff::Timestamp;
use std::sync::Arc;
use uuid::Uuid;

const TRACING_TARGET: &str = "docchat::session";

pub const GENERIC_SYSTEM_PROMPT: &str =
    "You are a helpful assistant. Answer questions concisely and clearly.";

/// Builds the system instruction for a session. A non-empty context is
/// embedded verbatim and the model is told to answer only from it.
pub fn system_prompt(context: &str) -> String {
    if context.is_empty() {
        return GENERIC_SYSTEM_PROMPT.to_string();
    }

    format!(
        "You are a helpful assistant that answers questions based on the provided documents.\n\
         \n\
         Documents:\n\
         {}\n\
         \n\
         Answer the user's question based only on the information in the documents above. \
         If the information is not in the documents, say so.",
        context
    )
}

/// Runs chat sessions against injected document and model collaborators.
#[derive(Clone)]
pub struct SessionEngine {
    documents: Arc<dyn ContentProvider>,
    model: Arc<dyn CompletionModel>,
}

impl SessionEngine {
    pub fn new(documents: Arc<dyn ContentProvider>, model: Arc<dyn CompletionModel>) -> Self {
        Self { documents, model }
    }

    /// Returns the lazy event sequence of one session. Nothing happens until
    /// the stream is polled, and dropping it releases the completion stream.
    pub fn run(
        &self,
        message: String,
        doc_ids: Option<Vec<String>>,
    ) -> impl Stream<Item = AgUiEvent> + Send + 'static {
        let run_id = new_run_id();
        let steps = message_steps(
            Arc::clone(&self.documents),
            Arc::clone(&self.model),
            message,
            doc_ids,
        );

        stream! {
            let mut clock = SessionClock::default();
            let mut watch = SessionWatch::new(run_id.clone());
            tracing::info!(target: TRACING_TARGET, run_id = %run_id, "session started");
            yield clock.stamp(EventKind::RunStarted { run_id: run_id.clone() });

            let mut steps = Box::pin(steps);
            while let Some(step) = steps.next().await {
                match step {
                    Ok(kind) => {
                        yield clock.stamp(kind);
                    }
                    Err(err) => {
                        drop(steps);
                        tracing::warn!(
                            target: TRACING_TARGET,
                            run_id = %run_id,
                            error = %err,
                            "session failed"
                        );
                        watch.finished = true;
                        yield clock.stamp(EventKind::failed(err.to_string()));
                        return;
                    }
                }
            }

            tracing::info!(target: TRACING_TARGET, run_id = %run_id, "session finished");
            watch.finished = true;
            yield clock.stamp(EventKind::succeeded());
        }
    }
}

/// Everything between `RUN_STARTED` and `RUN_FINISHED`. Errors end the
/// stream and are turned into the terminal event by [`SessionEngine::run`].
fn message_steps(
    documents: Arc<dyn ContentProvider>,
    model: Arc<dyn CompletionModel>,
    message: String,
    doc_ids: Option<Vec<String>>,
) -> impl Stream<Item = Result<EventKind, SessionError>> + Send + 'static {
    try_stream! {
        let context = documents.resolve(doc_ids.as_deref()).await?;
        tracing::debug!(
            target: TRACING_TARGET,
            context_len = context.len(),
            "document context resolved"
        );

        yield EventKind::TextMessageStart;

        let prompt = system_prompt(&context);
        let mut fragments = model.generate(&prompt, &message).await?;
        while let Some(fragment) = fragments.next().await {
            let content = fragment?;
            if content.is_empty() {
                continue;
            }
            yield EventKind::TextMessageContent { content };
        }

        yield EventKind::TextMessageEnd;
    }
}

fn new_run_id() -> String {
    format!("run_{}", Uuid::now_v7())
}

/// Logs sessions whose stream was dropped before the terminal event, which
/// is how a client disconnect reaches the engine.
struct SessionWatch {
    run_id: String,
    finished: bool,
}

impl SessionWatch {
    fn new(run_id: String) -> Self {
        Self {
            run_id,
            finished: false,
        }
    }
}

impl Drop for SessionWatch {
    fn drop(&mut self) {
        if !self.finished {
            tracing::info!(
                target: TRACING_TARGET,
                run_id = %self.run_id,
                "session cancelled before completion"
            );
        }
    }
}

/// Hands out timestamps that never go backwards within one session, even if
/// the wall clock does.
#[derive(Debug, Default)]
struct SessionClock {
    last: Option<Timestamp>,
}

impl SessionClock {
    fn stamp(&mut self, kind: EventKind) -> AgUiEvent {
        let now = Timestamp::now();
        let timestamp = match self.last {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last = Some(timestamp);
        AgUiEvent::new(kind, timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::documents::render_document;
    use crate::error::{CompletionError, DocumentError};
    use crate::llm::FragmentStream;
    use crate::protocol::RunStatus;
    use async_trait::async_trait;
    use futures::stream;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeDocuments {
        docs: Vec<(&'static str, &'static str, &'static str)>,
        fail: bool,
        requested: Mutex<Vec<Option<Vec<String>>>>,
    }

    impl FakeDocuments {
        fn with(docs: Vec<(&'static str, &'static str, &'static str)>) -> Self {
            Self {
                docs,
                fail: false,
                requested: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Self::with(Vec::new())
            }
        }
    }

    #[async_trait]
    impl ContentProvider for FakeDocuments {
        async fn resolve(&self, ids: Option<&[String]>) -> Result<String, DocumentError> {
            self.requested
                .lock()
                .unwrap()
                .push(ids.map(|ids| ids.to_vec()));
            if self.fail {
                return Err(DocumentError::Read {
                    path: PathBuf::from("docs/guide.txt"),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
                });
            }
            let parts: Vec<String> = self
                .docs
                .iter()
                .filter(|(id, _, _)| ids.is_none_or(|ids| ids.iter().any(|want| want == id)))
                .map(|(_, name, content)| render_document(name, content))
                .collect();
            Ok(parts.join("\n"))
        }
    }

    enum Behavior {
        Fragments(Vec<Result<&'static str, &'static str>>),
        RefuseToStart,
        StallAfter(Vec<&'static str>, Arc<AtomicBool>),
    }

    struct FakeModel {
        behavior: Behavior,
        prompts: Mutex<Vec<(String, String)>>,
    }

    impl FakeModel {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                prompts: Mutex::new(Vec::new()),
            }
        }

        fn replying(fragments: &[&'static str]) -> Self {
            Self::new(Behavior::Fragments(
                fragments.iter().copied().map(Ok).collect(),
            ))
        }

        fn last_system_prompt(&self) -> String {
            self.prompts.lock().unwrap().last().unwrap().0.clone()
        }
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl CompletionModel for FakeModel {
        async fn generate(
            &self,
            system_prompt: &str,
            user_message: &str,
        ) -> Result<FragmentStream, CompletionError> {
            self.prompts
                .lock()
                .unwrap()
                .push((system_prompt.to_string(), user_message.to_string()));

            match &self.behavior {
                Behavior::Fragments(items) => {
                    let items: Vec<Result<String, CompletionError>> = items
                        .iter()
                        .map(|item| match item {
                            Ok(text) => Ok(text.to_string()),
                            Err(msg) => Err(CompletionError::Model(msg.to_string())),
                        })
                        .collect();
                    Ok(stream::iter(items).boxed())
                }
                Behavior::RefuseToStart => Err(CompletionError::Model("model not loaded".into())),
                Behavior::StallAfter(items, released) => {
                    let guard = DropFlag(Arc::clone(released));
                    let items: Vec<Result<String, CompletionError>> =
                        items.iter().map(|text| Ok(text.to_string())).collect();
                    Ok(stream::iter(items)
                        .chain(stream::pending())
                        .map(move |item| {
                            let _guard = &guard;
                            item
                        })
                        .boxed())
                }
            }
        }
    }

    fn engine(
        documents: FakeDocuments,
        model: FakeModel,
    ) -> (SessionEngine, Arc<FakeDocuments>, Arc<FakeModel>) {
        let documents = Arc::new(documents);
        let model = Arc::new(model);
        let engine = SessionEngine::new(documents.clone(), model.clone());
        (engine, documents, model)
    }

    async fn collect(engine: &SessionEngine, doc_ids: Option<Vec<String>>) -> Vec<AgUiEvent> {
        engine.run("Hello".to_string(), doc_ids).collect().await
    }

    fn names(events: &[AgUiEvent]) -> Vec<&'static str> {
        events.iter().map(|event| event.kind.name()).collect()
    }

    fn contents(events: &[AgUiEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|event| match &event.kind {
                EventKind::TextMessageContent { content } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Checks the lifecycle invariants shared by every session.
    fn assert_well_formed(events: &[AgUiEvent]) {
        assert!(matches!(
            events.first().map(|e| &e.kind),
            Some(EventKind::RunStarted { .. })
        ));
        let last = events.last().unwrap();
        assert!(last.is_terminal());
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e.kind, EventKind::RunStarted { .. }))
                .count(),
            1
        );
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

        match &last.kind {
            EventKind::RunFinished {
                status: RunStatus::Success,
                error,
            } => {
                assert!(error.is_none());
                let body = &events[1..events.len() - 1];
                assert!(matches!(body.first().map(|e| &e.kind), Some(EventKind::TextMessageStart)));
                assert!(matches!(body.last().map(|e| &e.kind), Some(EventKind::TextMessageEnd)));
                assert!(
                    body[1..body.len() - 1]
                        .iter()
                        .all(|e| matches!(e.kind, EventKind::TextMessageContent { .. }))
                );
            }
            EventKind::RunFinished {
                status: RunStatus::Error,
                error,
            } => {
                assert!(!error.as_deref().unwrap_or_default().is_empty());
                assert!(
                    !events
                        .iter()
                        .any(|e| matches!(e.kind, EventKind::TextMessageEnd))
                );
            }
            other => panic!("unexpected terminal event {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_documents_takes_generic_prompt_and_succeeds() {
        let (engine, documents, model) =
            engine(FakeDocuments::with(Vec::new()), FakeModel::replying(&["Hi", " there"]));

        let events = collect(&engine, None).await;

        assert_well_formed(&events);
        assert_eq!(
            names(&events),
            [
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_END",
                "RUN_FINISHED",
            ]
        );
        assert_eq!(contents(&events), ["Hi", " there"]);
        assert_eq!(documents.requested.lock().unwrap().as_slice(), [None::<Vec<String>>]);
        assert_eq!(model.last_system_prompt(), GENERIC_SYSTEM_PROMPT);
        assert_eq!(model.prompts.lock().unwrap()[0].1, "Hello");
    }

    #[tokio::test]
    async fn missing_document_id_is_not_an_error() {
        let (engine, _, model) = engine(
            FakeDocuments::with(vec![("guide", "guide.md", "Read me")]),
            FakeModel::replying(&["ok"]),
        );

        let events = collect(&engine, Some(vec!["missing-id".to_string()])).await;

        assert_well_formed(&events);
        assert!(matches!(
            events.last().unwrap().kind,
            EventKind::RunFinished {
                status: RunStatus::Success,
                ..
            }
        ));
        assert_eq!(model.last_system_prompt(), GENERIC_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn explicit_empty_ids_use_empty_context() {
        let (engine, documents, model) = engine(
            FakeDocuments::with(vec![("guide", "guide.md", "Read me")]),
            FakeModel::replying(&["ok"]),
        );

        let events = collect(&engine, Some(Vec::new())).await;

        assert_well_formed(&events);
        assert_eq!(
            documents.requested.lock().unwrap().as_slice(),
            [Some(Vec::<String>::new())]
        );
        assert_eq!(model.last_system_prompt(), GENERIC_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn absent_ids_ground_prompt_in_all_documents() {
        let (engine, _, model) = engine(
            FakeDocuments::with(vec![
                ("guide", "guide.md", "Read me"),
                ("faq", "faq.txt", "Questions"),
            ]),
            FakeModel::replying(&["ok"]),
        );

        let events = collect(&engine, None).await;

        assert_well_formed(&events);
        let prompt = model.last_system_prompt();
        assert!(prompt.contains("=== Document: guide.md ===\nRead me\n"));
        assert!(prompt.contains("=== Document: faq.txt ===\nQuestions\n"));
        assert!(prompt.contains("based only on the information in the documents above"));
    }

    #[tokio::test]
    async fn completion_failure_keeps_partial_content() {
        let (engine, _, _) = engine(
            FakeDocuments::with(Vec::new()),
            FakeModel::new(Behavior::Fragments(vec![
                Ok("one"),
                Ok("two"),
                Err("connection reset"),
                Ok("never"),
            ])),
        );

        let events = collect(&engine, None).await;

        assert_well_formed(&events);
        assert_eq!(
            names(&events),
            [
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_CONTENT",
                "TEXT_MESSAGE_CONTENT",
                "RUN_FINISHED",
            ]
        );
        assert_eq!(contents(&events), ["one", "two"]);
        match &events.last().unwrap().kind {
            EventKind::RunFinished { status, error } => {
                assert_eq!(*status, RunStatus::Error);
                assert!(error.as_deref().unwrap().contains("connection reset"));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn context_failure_ends_before_message_start() {
        let (engine, _, model) =
            engine(FakeDocuments::failing(), FakeModel::replying(&["unused"]));

        let events = collect(&engine, None).await;

        assert_well_formed(&events);
        assert_eq!(names(&events), ["RUN_STARTED", "RUN_FINISHED"]);
        match &events[1].kind {
            EventKind::RunFinished { error, .. } => {
                assert!(error.as_deref().unwrap().starts_with("context resolution failed"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn model_refusing_to_start_ends_after_message_start() {
        let (engine, _, _) =
            engine(FakeDocuments::with(Vec::new()), FakeModel::new(Behavior::RefuseToStart));

        let events = collect(&engine, None).await;

        assert_well_formed(&events);
        assert_eq!(
            names(&events),
            ["RUN_STARTED", "TEXT_MESSAGE_START", "RUN_FINISHED"]
        );
    }

    #[tokio::test]
    async fn empty_fragments_are_not_forwarded() {
        let (engine, _, _) = engine(
            FakeDocuments::with(Vec::new()),
            FakeModel::replying(&["", "a", "", "b"]),
        );

        let events = collect(&engine, None).await;

        assert_well_formed(&events);
        assert_eq!(contents(&events), ["a", "b"]);
    }

    #[tokio::test]
    async fn zero_fragments_still_succeed() {
        let (engine, _, _) =
            engine(FakeDocuments::with(Vec::new()), FakeModel::replying(&[]));

        let events = collect(&engine, None).await;

        assert_well_formed(&events);
        assert_eq!(
            names(&events),
            [
                "RUN_STARTED",
                "TEXT_MESSAGE_START",
                "TEXT_MESSAGE_END",
                "RUN_FINISHED"
            ]
        );
    }

    #[tokio::test]
    async fn nothing_runs_until_polled() {
        let (engine, documents, _) =
            engine(FakeDocuments::with(Vec::new()), FakeModel::replying(&["a"]));

        let stream = engine.run("Hello".to_string(), None);
        assert!(documents.requested.lock().unwrap().is_empty());
        drop(stream);
        assert!(documents.requested.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn dropping_the_session_releases_the_completion_stream() {
        let released = Arc::new(AtomicBool::new(false));
        let (engine, _, _) = engine(
            FakeDocuments::with(Vec::new()),
            FakeModel::new(Behavior::StallAfter(vec!["a"], Arc::clone(&released))),
        );

        let mut events = Box::pin(engine.run("Hello".to_string(), None));
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(events.next().await.unwrap());
        }
        assert_eq!(
            names(&seen),
            ["RUN_STARTED", "TEXT_MESSAGE_START", "TEXT_MESSAGE_CONTENT"]
        );
        assert!(!released.load(Ordering::SeqCst));

        drop(events);
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn run_ids_differ_between_sessions() {
        let (engine, _, _) =
            engine(FakeDocuments::with(Vec::new()), FakeModel::replying(&[]));

        let first = collect(&engine, None).await;
        let second = collect(&engine, None).await;
        let run_id = |events: &[AgUiEvent]| match &events[0].kind {
            EventKind::RunStarted { run_id } => run_id.clone(),
            other => panic!("unexpected event {:?}", other),
        };
        assert!(run_id(&first).starts_with("run_"));
        assert_ne!(run_id(&first), run_id(&second));
    }

    #[test]
    fn clock_never_goes_backwards() {
        let future = Timestamp::now()
            .checked_add(jiff::SignedDuration::from_secs(3600))
            .unwrap();
        let mut clock = SessionClock { last: Some(future) };
        let event = clock.stamp(EventKind::TextMessageEnd);
        assert_eq!(event.timestamp, future);
    }

    #[test]
    fn grounded_prompt_embeds_context_verbatim() {
        let context = render_document("a.md", "alpha");
        let prompt = system_prompt(&context);
        assert!(prompt.contains(&format!("Documents:\n{}\n", context)));
        assert!(prompt.ends_with("If the information is not in the documents, say so."));
    }
}
