use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::{Message, MessageKind};
use crate::operator::{AskRequest, OperatorRuntime, ShowMessagePayload, Vote, VoteRequest};
use crate::store::SessionStore;
use crate::tui::AppEvent;
use crate::typewriter::Typewriter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Editing,
}

/// Example prompts offered on the intro screen; selecting one prefills the
/// input bar.
pub const EXAMPLE_PROMPTS: [&str; 3] = [
    "Show me predicted airplanes",
    "Retrieve the first 10 images with 3 dogs and 1 cat",
    "Which samples have the most false positives?",
];

pub const CAPABILITIES: [&str; 3] = [
    "Understands the schema of your dataset",
    "Can run SQL-like queries on computer vision datasets",
    "Knows how to use brain methods, evaluations, and similarity indexes",
];

/// The request currently awaiting a response from the ask operator.
#[derive(Debug, Clone)]
pub struct Inflight {
    pub invocation_id: String,
    pub generation: u64,
}

pub struct App {
    // Core state
    pub should_quit: bool,
    pub input_mode: InputMode,

    // Conversation state
    pub messages: Vec<Message>,
    pub receiving: bool,
    pub waiting: bool,
    pub input: String,
    pub cursor: usize, // cursor position in input, in chars

    // Per-query votes; at most one vote per query, never retracted
    pub votes: HashMap<String, Vote>,

    // Request tracking: late results whose generation doesn't match the
    // in-flight request are dropped
    pub inflight: Option<Inflight>,
    generation: u64,

    // Incremental reveal of the newest incoming message
    pub typewriter: Option<Typewriter>,
    typewriter_speed: usize,

    // Chat viewport state (updated during render)
    pub chat_scroll: u16,
    pub chat_height: u16,
    pub chat_width: u16,
    pub stick_to_bottom: bool,

    // Animation state
    pub animation_frame: u8, // 0-2 for ellipsis animation

    // Injected collaborators
    runtime: Arc<dyn OperatorRuntime>,
    events: UnboundedSender<AppEvent>,
    store: SessionStore,
    pub dataset: String,
}

impl App {
    pub fn new(
        dataset: String,
        typewriter_speed: usize,
        runtime: Arc<dyn OperatorRuntime>,
        store: SessionStore,
        events: UnboundedSender<AppEvent>,
    ) -> Self {
        let messages = store.load(&dataset);

        Self {
            should_quit: false,
            input_mode: InputMode::Editing,

            messages,
            receiving: false,
            waiting: false,
            input: String::new(),
            cursor: 0,

            votes: HashMap::new(),

            inflight: None,
            generation: 0,

            typewriter: None,
            typewriter_speed,

            chat_scroll: 0,
            chat_height: 0,
            chat_width: 0,
            stick_to_bottom: true,

            animation_frame: 0,

            runtime,
            events,
            store,
            dataset,
        }
    }

    /// A request has been sent and not yet completed or cancelled.
    pub fn in_flight(&self) -> bool {
        self.inflight.is_some()
    }

    /// The input bar is disabled while a response is pending.
    pub fn input_disabled(&self) -> bool {
        self.receiving || self.waiting
    }

    /// Submit the current draft: append an outgoing message and forward the
    /// query plus accumulated history to the ask operator.
    pub fn submit_message(&mut self) {
        let text = self.input.trim().to_string();
        if text.is_empty() || self.input_disabled() {
            return;
        }

        // History excludes the message being sent, matching the wire
        // contract of the ask operator.
        let history = self.messages.clone();

        self.messages.push(Message::outgoing(text.clone()));
        self.input.clear();
        self.cursor = 0;
        self.waiting = true;
        self.typewriter = None;
        self.stick_to_bottom = true;

        self.generation += 1;
        let inflight = Inflight {
            invocation_id: Uuid::new_v4().to_string(),
            generation: self.generation,
        };

        self.runtime.ask(
            AskRequest {
                invocation_id: inflight.invocation_id.clone(),
                generation: inflight.generation,
                query: text,
                history,
            },
            self.events.clone(),
        );
        self.inflight = Some(inflight);
        self.persist();
    }

    /// Apply one streamed payload from the ask operator.
    pub fn apply_payload(&mut self, generation: u64, payload: ShowMessagePayload) {
        match &self.inflight {
            Some(inflight) if inflight.generation == generation => {}
            _ => {
                debug!(generation, "dropping payload from a stale request");
                return;
            }
        }

        if payload.done {
            self.receiving = false;
            self.waiting = false;
            self.inflight = None;
            self.persist();
            return;
        }

        if !payload.has_content() {
            return;
        }

        self.receiving = true;
        self.waiting = false;

        let overwrite = payload.overwrite_last()
            && self
                .messages
                .last()
                .is_some_and(|m| m.kind == MessageKind::Incoming);

        if overwrite {
            if let Some(last) = self.messages.last_mut() {
                last.content = payload.message;
                last.outputs = payload.outputs;
                last.data = payload.data;
                if payload.response_to.is_some() {
                    last.response_to = payload.response_to;
                }
            }
        } else {
            self.messages.push(Message {
                kind: MessageKind::Incoming,
                content: payload.message,
                outputs: payload.outputs,
                data: payload.data,
                response_to: payload.response_to,
            });
        }

        // Reveal the newest incoming text incrementally.
        match self.messages.last().and_then(|m| m.content.as_deref()) {
            Some(content) => match &mut self.typewriter {
                Some(tw) if overwrite => tw.retarget(content),
                _ => self.typewriter = Some(Typewriter::new(content, self.typewriter_speed)),
            },
            None => self.typewriter = None,
        }

        self.stick_to_bottom = true;
        self.persist();
    }

    /// The ask request itself failed (network, server error). Surface the
    /// error in the transcript and return to idle.
    pub fn request_failed(&mut self, generation: u64, error: &str) {
        match &self.inflight {
            Some(inflight) if inflight.generation == generation => {}
            _ => return,
        }
        warn!(generation, "ask request failed: {}", error);

        self.receiving = false;
        self.waiting = false;
        self.inflight = None;
        self.typewriter = None;
        self.messages
            .push(Message::incoming(format!("Error: {}", error)));
        self.persist();
    }

    pub fn can_start_over(&self) -> bool {
        !self.messages.is_empty() && !self.in_flight()
    }

    /// Clear the conversation. Only available when there are messages and
    /// no response is in flight.
    pub fn start_over(&mut self) {
        if !self.can_start_over() {
            return;
        }
        self.messages.clear();
        self.typewriter = None;
        self.chat_scroll = 0;
        self.stick_to_bottom = true;
        self.persist();
    }

    /// Cancel the in-flight request. Local state resets immediately; the
    /// abort is fire-and-forget and anything arriving late is dropped by
    /// the generation check.
    pub fn stop(&mut self) {
        let Some(inflight) = self.inflight.take() else {
            return;
        };
        self.receiving = false;
        self.waiting = false;
        self.runtime.abort(&inflight.invocation_id);
    }

    /// The query that votes currently apply to: the newest incoming message
    /// that identifies its originating query.
    pub fn vote_target(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == MessageKind::Incoming && m.response_to.is_some())
            .and_then(|m| m.response_to.as_deref())
    }

    /// Issue a vote for the current target query. The local map is only
    /// updated once the remote call succeeds; a recorded vote is final.
    pub fn submit_vote(&mut self, vote: Vote) {
        let Some(query_id) = self.vote_target().map(str::to_string) else {
            return;
        };
        if self.votes.contains_key(&query_id) {
            return;
        }
        self.runtime
            .vote(VoteRequest { query_id, vote }, self.events.clone());
    }

    pub fn record_vote(&mut self, query_id: String, vote: Vote) {
        self.votes.entry(query_id).or_insert(vote);
    }

    pub fn vote_failed(&mut self, query_id: &str, error: &str) {
        // Leave the vote unset so the user may try again.
        warn!("vote for query {} failed: {}", query_id, error);
    }

    /// Tick animation frame and typewriter (called by Tick event)
    pub fn tick(&mut self) {
        if self.input_disabled() {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
        // The renderer re-pins the scroll while stick_to_bottom is set.
        if let Some(tw) = &mut self.typewriter {
            tw.tick();
        }
    }

    // Chat scrolling; manual scrolling releases the bottom pin
    pub fn scroll_up(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_sub(lines);
        self.stick_to_bottom = false;
    }

    pub fn scroll_down(&mut self, lines: u16) {
        self.chat_scroll = self.chat_scroll.saturating_add(lines);
    }

    pub fn scroll_to_top(&mut self) {
        self.chat_scroll = 0;
        self.stick_to_bottom = false;
    }

    pub fn scroll_to_bottom(&mut self) {
        self.stick_to_bottom = true;
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.dataset, &self.messages) {
            warn!("failed to persist session for {}: {}", self.dataset, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operator::OperatorEvent;
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MockRuntime {
        asks: Mutex<Vec<AskRequest>>,
        votes: Mutex<Vec<VoteRequest>>,
        aborts: Mutex<Vec<String>>,
    }

    impl OperatorRuntime for MockRuntime {
        fn ask(&self, request: AskRequest, _events: UnboundedSender<AppEvent>) {
            self.asks.lock().unwrap().push(request);
        }

        fn vote(&self, request: VoteRequest, _events: UnboundedSender<AppEvent>) {
            self.votes.lock().unwrap().push(request);
        }

        fn abort(&self, invocation_id: &str) {
            self.aborts.lock().unwrap().push(invocation_id.to_string());
        }
    }

    struct Fixture {
        app: App,
        runtime: Arc<MockRuntime>,
        _dir: TempDir,
        _rx: mpsc::UnboundedReceiver<AppEvent>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let store = SessionStore::new(dir.path().to_path_buf());
        let app = App::new("test-ds".to_string(), 1, runtime.clone(), store, tx);
        Fixture {
            app,
            runtime,
            _dir: dir,
            _rx: rx,
        }
    }

    fn payload(message: &str) -> ShowMessagePayload {
        ShowMessagePayload {
            message: Some(message.to_string()),
            ..Default::default()
        }
    }

    fn current_generation(f: &Fixture) -> u64 {
        f.app.inflight.as_ref().unwrap().generation
    }

    #[test]
    fn test_submit_appends_outgoing_and_forwards_history() {
        let mut f = fixture();
        f.app.input = "show me dogs".to_string();
        f.app.submit_message();

        assert_eq!(f.app.messages.len(), 1);
        assert_eq!(f.app.messages[0].kind, MessageKind::Outgoing);
        assert!(f.app.input.is_empty());
        assert!(f.app.waiting);
        assert!(!f.app.receiving);
        assert!(f.app.in_flight());

        let asks = f.runtime.asks.lock().unwrap();
        assert_eq!(asks.len(), 1);
        assert_eq!(asks[0].query, "show me dogs");
        // History excludes the query being sent.
        assert!(asks[0].history.is_empty());
    }

    #[test]
    fn test_submit_ignored_while_pending() {
        let mut f = fixture();
        f.app.input = "first".to_string();
        f.app.submit_message();

        f.app.input = "second".to_string();
        f.app.submit_message();

        assert_eq!(f.runtime.asks.lock().unwrap().len(), 1);
        assert_eq!(f.app.input, "second"); // draft untouched
    }

    #[test]
    fn test_partial_result_appends_incoming() {
        let mut f = fixture();
        f.app.input = "query".to_string();
        f.app.submit_message();
        let generation = current_generation(&f);

        f.app.apply_payload(generation, payload("working on it"));

        assert!(f.app.receiving);
        assert!(!f.app.waiting);
        assert_eq!(f.app.messages.len(), 2);
        assert_eq!(f.app.messages[1].kind, MessageKind::Incoming);
        assert_eq!(f.app.messages[1].content.as_deref(), Some("working on it"));
        assert!(f.app.typewriter.is_some());
    }

    #[test]
    fn test_overwrite_last_replaces_newest_incoming() {
        let mut f = fixture();
        f.app.input = "query".to_string();
        f.app.submit_message();
        let generation = current_generation(&f);

        f.app.apply_payload(generation, payload("draft answer"));

        let mut refined = payload("final answer");
        refined.data = Some(serde_json::json!({"overwrite_last": true}));
        refined.response_to = Some("q1".to_string());
        f.app.apply_payload(generation, refined);

        assert_eq!(f.app.messages.len(), 2);
        assert_eq!(f.app.messages[1].content.as_deref(), Some("final answer"));
        assert_eq!(f.app.messages[1].response_to.as_deref(), Some("q1"));
        // Retargeting restarted the reveal.
        assert_eq!(f.app.typewriter.as_ref().unwrap().visible(), "");
    }

    #[test]
    fn test_overwrite_without_incoming_appends() {
        let mut f = fixture();
        f.app.input = "query".to_string();
        f.app.submit_message();
        let generation = current_generation(&f);

        let mut first = payload("answer");
        first.data = Some(serde_json::json!({"overwrite_last": true}));
        f.app.apply_payload(generation, first);

        // Nothing to overwrite: the outgoing message must not be touched.
        assert_eq!(f.app.messages.len(), 2);
        assert_eq!(f.app.messages[0].kind, MessageKind::Outgoing);
        assert_eq!(f.app.messages[1].content.as_deref(), Some("answer"));
    }

    #[test]
    fn test_done_returns_to_idle() {
        let mut f = fixture();
        f.app.input = "query".to_string();
        f.app.submit_message();
        let generation = current_generation(&f);

        f.app.apply_payload(generation, payload("answer"));
        f.app.apply_payload(generation, ShowMessagePayload::done());

        assert!(!f.app.receiving);
        assert!(!f.app.waiting);
        assert!(!f.app.in_flight());
    }

    #[test]
    fn test_stop_aborts_and_drops_late_results() {
        let mut f = fixture();
        f.app.input = "query".to_string();
        f.app.submit_message();
        let generation = current_generation(&f);
        let invocation_id = f.app.inflight.as_ref().unwrap().invocation_id.clone();

        f.app.stop();

        assert!(!f.app.receiving);
        assert!(!f.app.waiting);
        assert!(!f.app.in_flight());
        assert_eq!(*f.runtime.aborts.lock().unwrap(), vec![invocation_id]);

        // A result arriving after Stop is ignorable noise.
        f.app.apply_payload(generation, payload("too late"));
        assert_eq!(f.app.messages.len(), 1);
        assert!(!f.app.receiving);
    }

    #[test]
    fn test_stale_generation_dropped_across_turns() {
        let mut f = fixture();
        f.app.input = "first".to_string();
        f.app.submit_message();
        let old_generation = current_generation(&f);
        f.app.stop();

        f.app.input = "second".to_string();
        f.app.submit_message();

        f.app.apply_payload(old_generation, payload("stale"));
        assert_eq!(f.app.messages.len(), 2); // both outgoing, nothing applied
        assert!(f.app.waiting);
    }

    #[test]
    fn test_start_over_gating_and_clear() {
        let mut f = fixture();
        assert!(!f.app.can_start_over()); // no messages

        f.app.input = "query".to_string();
        f.app.submit_message();
        assert!(!f.app.can_start_over()); // in flight

        let generation = current_generation(&f);
        f.app.apply_payload(generation, ShowMessagePayload::done());
        assert!(f.app.can_start_over());

        f.app.start_over();
        assert!(f.app.messages.is_empty());
    }

    #[test]
    fn test_start_over_persists_cleared_session() {
        let dir = TempDir::new().unwrap();
        let runtime = Arc::new(MockRuntime::default());
        let (tx, _rx) = mpsc::unbounded_channel();

        let store = SessionStore::new(dir.path().to_path_buf());
        store
            .save("test-ds", &[Message::outgoing("old")])
            .unwrap();

        let mut app = App::new(
            "test-ds".to_string(),
            1,
            runtime,
            SessionStore::new(dir.path().to_path_buf()),
            tx,
        );
        assert_eq!(app.messages.len(), 1); // reloaded on open

        app.start_over();
        let reloaded = SessionStore::new(dir.path().to_path_buf()).load("test-ds");
        assert!(reloaded.is_empty());
    }

    #[test]
    fn test_request_failure_surfaces_error_and_clears_flags() {
        let mut f = fixture();
        f.app.input = "query".to_string();
        f.app.submit_message();
        let generation = current_generation(&f);

        f.app.request_failed(generation, "connection refused");

        assert!(!f.app.in_flight());
        assert!(!f.app.waiting);
        let last = f.app.messages.last().unwrap();
        assert_eq!(last.kind, MessageKind::Incoming);
        assert!(last.content.as_deref().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_vote_recorded_once_per_query() {
        let mut f = fixture();
        f.app.messages.push(Message::outgoing("query"));
        let mut answer = Message::incoming("answer");
        answer.response_to = Some("q1".to_string());
        f.app.messages.push(answer);

        f.app.submit_vote(Vote::Upvote);
        assert_eq!(f.runtime.votes.lock().unwrap().len(), 1);

        // Local state only set after the remote call succeeds.
        assert!(f.app.votes.is_empty());
        f.app.record_vote("q1".to_string(), Vote::Upvote);
        assert_eq!(f.app.votes.get("q1"), Some(&Vote::Upvote));

        // A recorded vote is final; no further calls go out.
        f.app.submit_vote(Vote::Downvote);
        assert_eq!(f.runtime.votes.lock().unwrap().len(), 1);
        assert_eq!(f.app.votes.get("q1"), Some(&Vote::Upvote));
    }

    #[test]
    fn test_vote_failure_allows_retry() {
        let mut f = fixture();
        let mut answer = Message::incoming("answer");
        answer.response_to = Some("q1".to_string());
        f.app.messages.push(answer);

        f.app.submit_vote(Vote::Upvote);
        f.app.vote_failed("q1", "backend down");
        assert!(f.app.votes.is_empty());

        f.app.submit_vote(Vote::Upvote);
        assert_eq!(f.runtime.votes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_vote_without_target_is_noop() {
        let mut f = fixture();
        f.app.messages.push(Message::incoming("no query id"));
        f.app.submit_vote(Vote::Upvote);
        assert!(f.runtime.votes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tick_animates_only_while_pending() {
        let mut f = fixture();
        f.app.tick();
        assert_eq!(f.app.animation_frame, 0);

        f.app.input = "query".to_string();
        f.app.submit_message();
        f.app.tick();
        assert_eq!(f.app.animation_frame, 1);
    }

    #[test]
    fn test_handle_operator_events_route_to_transitions() {
        let mut f = fixture();
        f.app.input = "query".to_string();
        f.app.submit_message();
        let generation = current_generation(&f);

        crate::handler::handle_event(
            &mut f.app,
            AppEvent::Operator(OperatorEvent::Payload {
                generation,
                payload: payload("answer"),
            }),
        );
        assert!(f.app.receiving);

        crate::handler::handle_event(
            &mut f.app,
            AppEvent::Operator(OperatorEvent::VoteRecorded {
                query_id: "q1".to_string(),
                vote: Vote::Downvote,
            }),
        );
        assert_eq!(f.app.votes.get("q1"), Some(&Vote::Downvote));
    }
}
