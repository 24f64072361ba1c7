//! Session controller
//!
//! Owns the active session: its stream, its view state, the cached session
//! list, the composer and voice capture. Everything asynchronous (stream
//! frames, resource responses, recognizer results) arrives as a
//! `ControllerEvent` on a single queue and is applied in order by `handle`.
//! Events tagged for a session that is no longer active are dropped there.
//!
//! Switching, connecting and hydration spawn Tokio tasks, so the controller
//! must be driven from inside a runtime.

use std::collections::HashSet;
use std::sync::Arc;

use dossier_protocol::{
    new_id, ClientFrame, Message, Plan, SectionKey, ServerEvent, SessionSummary,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::composer::Composer;
use crate::error::{ClientError, ClientResult};
use crate::reducer::{transition, Effect, ViewState};
use crate::resources::ResourceApi;
use crate::speech::{speakable_text, LogSynthesizer, SpeechSynthesizer};
use crate::transport::{
    Connection, ConnectionState, Connector, SessionTag, TransportEvent, TransportSink,
};
use crate::voice::{
    CaptureError, DeliverFn, Recognition, SpeechRecognizer, UnsupportedRecognizer, VoiceCapture,
    VoiceState,
};

#[derive(Debug)]
pub enum ControllerEvent {
    Transport {
        tag: SessionTag,
        event: TransportEvent,
    },
    HistoryLoaded {
        tag: SessionTag,
        result: ClientResult<Vec<Message>>,
    },
    PlanLoaded {
        tag: SessionTag,
        result: ClientResult<Option<Plan>>,
    },
    SessionsLoaded(ClientResult<Vec<SessionSummary>>),
    Voice(Recognition),
}

#[derive(Debug, Clone, Copy, Default)]
struct Hydration {
    history: bool,
    plan: bool,
}

struct ActiveSession<T> {
    tag: SessionTag,
    connection: T,
    state: ConnectionState,
    hydration: Hydration,
}

pub struct SessionController<C: Connector, R: ResourceApi> {
    connector: C,
    resources: Arc<R>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: mpsc::UnboundedReceiver<ControllerEvent>,
    active: Option<ActiveSession<C::Conn>>,
    epoch: u64,
    view: ViewState,
    sessions: Vec<SessionSummary>,
    /// Deleted here; filtered out of list responses that raced the delete
    deleted: HashSet<String>,
    composer: Composer,
    voice: VoiceCapture,
    synthesizer: Box<dyn SpeechSynthesizer>,
    speak_responses: bool,
    notice: Option<String>,
}

impl<C: Connector, R: ResourceApi> SessionController<C, R> {
    pub fn new(connector: C, resources: Arc<R>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let voice = VoiceCapture::new(
            Box::new(UnsupportedRecognizer),
            voice_delivery(events_tx.clone()),
        );
        Self {
            connector,
            resources,
            events_tx,
            events_rx,
            active: None,
            epoch: 0,
            view: ViewState::default(),
            sessions: Vec::new(),
            deleted: HashSet::new(),
            composer: Composer::default(),
            voice,
            synthesizer: Box::new(LogSynthesizer),
            speak_responses: false,
            notice: None,
        }
    }

    pub fn with_recognizer(mut self, recognizer: Box<dyn SpeechRecognizer>) -> Self {
        self.voice = VoiceCapture::new(recognizer, voice_delivery(self.events_tx.clone()));
        self
    }

    pub fn with_synthesizer(mut self, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = synthesizer;
        self
    }

    pub fn with_speak_responses(mut self, enabled: bool) -> Self {
        self.speak_responses = enabled;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn active_session_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.tag.session_id.as_str())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.active.as_ref().map(|a| a.state).unwrap_or_default()
    }

    pub fn is_busy(&self) -> bool {
        self.view.is_busy()
    }

    /// Both hydration requests for the active session have come back
    pub fn is_hydrated(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| a.hydration.history && a.hydration.plan)
    }

    pub fn composer(&self) -> &Composer {
        &self.composer
    }

    pub fn composer_mut(&mut self) -> &mut Composer {
        &mut self.composer
    }

    pub fn voice_state(&self) -> VoiceState {
        self.voice.state()
    }

    pub fn voice_interim(&self) -> &str {
        self.voice.interim()
    }

    /// One-shot user-facing notice (capture failures); cleared on read
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    pub fn set_plan_visible(&mut self, visible: bool) {
        self.view.plan_visible = visible;
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load the session list and activate `preferred`, the most recent
    /// session, or a new one when there are none. Returns the active id.
    pub async fn start(&mut self, preferred: Option<&str>) -> String {
        match self.resources.list_sessions().await {
            Ok(sessions) => self.sessions = sessions,
            Err(err) => warn!(
                component = "session_controller",
                event = "session.list_failed",
                error = %err,
                "Starting without a session list"
            ),
        }

        let target = preferred
            .map(str::to_string)
            .or_else(|| self.sessions.first().map(|s| s.id.clone()));

        match target {
            Some(id) => {
                if !self.sessions.iter().any(|s| s.id == id) {
                    self.sessions.insert(0, SessionSummary::fresh(id.clone()));
                }
                self.switch_to(&id);
                id
            }
            None => self.new_session().await,
        }
    }

    /// Make `session_id` the active session.
    ///
    /// The previous stream is closed before anything else happens, the view
    /// resets, history and plan are requested, and a new stream is opened.
    pub fn switch_to(&mut self, session_id: &str) {
        self.teardown();

        self.epoch += 1;
        let tag = SessionTag::new(session_id, self.epoch);
        self.view = ViewState::default();

        info!(
            component = "session_controller",
            event = "session.switched",
            session_id = %session_id,
            epoch = self.epoch,
        );

        self.spawn_hydration(&tag);
        let connection = self.connector.connect(tag.clone(), self.transport_sink());
        self.active = Some(ActiveSession {
            tag,
            connection,
            state: ConnectionState::Connecting,
            hydration: Hydration::default(),
        });
    }

    /// Close the active stream and release voice capture
    pub fn dispose(&mut self) {
        self.teardown();
        self.voice.stop();
        self.view = ViewState::default();
        info!(
            component = "session_controller",
            event = "session.disposed",
        );
    }

    fn teardown(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.state = ConnectionState::Closing;
            active.connection.close();
            debug!(
                component = "session_controller",
                event = "session.stream_closed",
                session = %active.tag,
            );
        }
    }

    /// Create a session (client-assigned id if the backend refuses) and activate it
    pub async fn new_session(&mut self) -> String {
        let id = match self.resources.create_session().await {
            Ok(id) => id,
            Err(err) => {
                let id = new_id();
                warn!(
                    component = "session_controller",
                    event = "session.create_failed",
                    error = %err,
                    fallback_id = %id,
                    "Using a client-assigned session id"
                );
                id
            }
        };

        if !self.sessions.iter().any(|s| s.id == id) {
            self.sessions.insert(0, SessionSummary::fresh(id.clone()));
        }
        self.switch_to(&id);
        self.refresh_sessions();
        id
    }

    /// Delete a session. Deleting the active one moves to the session now at
    /// the same list position (or the one before it), or creates a new one.
    pub async fn delete_session(&mut self, session_id: &str) -> ClientResult<()> {
        self.resources.delete_session(session_id).await?;

        let index = self.sessions.iter().position(|s| s.id == session_id);
        self.sessions.retain(|s| s.id != session_id);
        self.deleted.insert(session_id.to_string());
        let was_active = self.active_session_id() == Some(session_id);

        info!(
            component = "session_controller",
            event = "session.deleted",
            session_id = %session_id,
            was_active,
        );

        if was_active {
            let next = match self.sessions.len() {
                0 => None,
                len => {
                    let i = index.unwrap_or(0).min(len - 1);
                    Some(self.sessions[i].id.clone())
                }
            };
            match next {
                Some(id) => self.switch_to(&id),
                None => {
                    self.teardown();
                    self.new_session().await;
                }
            }
        }

        self.refresh_sessions();
        Ok(())
    }

    /// Re-fetch the session list in the background
    pub fn refresh_sessions(&self) {
        let resources = self.resources.clone();
        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let result = resources.list_sessions().await;
            let _ = tx.send(ControllerEvent::SessionsLoaded(result));
        });
    }

    fn spawn_hydration(&self, tag: &SessionTag) {
        let resources = self.resources.clone();
        let tx = self.events_tx.clone();
        let history_tag = tag.clone();
        tokio::spawn(async move {
            let result = resources.fetch_history(&history_tag.session_id).await;
            let _ = tx.send(ControllerEvent::HistoryLoaded {
                tag: history_tag,
                result,
            });
        });

        let resources = self.resources.clone();
        let tx = self.events_tx.clone();
        let plan_tag = tag.clone();
        tokio::spawn(async move {
            let result = resources.fetch_plan(&plan_tag.session_id).await;
            let _ = tx.send(ControllerEvent::PlanLoaded {
                tag: plan_tag,
                result,
            });
        });
    }

    fn transport_sink(&self) -> TransportSink {
        let tx = self.events_tx.clone();
        Arc::new(move |tag, event| {
            let _ = tx.send(ControllerEvent::Transport { tag, event });
        })
    }

    // -----------------------------------------------------------------------
    // Outbound commands
    // -----------------------------------------------------------------------

    fn connection(&self) -> ClientResult<&C::Conn> {
        self.active
            .as_ref()
            .map(|a| &a.connection)
            .ok_or(ClientError::NoActiveSession)
    }

    /// Send a research/chat message. Rejected while a generation or an edit
    /// is outstanding.
    pub fn send_message(&mut self, content: &str) -> ClientResult<()> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ClientError::EmptyMessage);
        }
        if self.view.is_busy() {
            return Err(ClientError::Busy);
        }
        self.connection()?.send(ClientFrame::Message {
            content: content.to_string(),
        })?;
        self.view.begin_generation(content);
        Ok(())
    }

    /// Send whatever the composer holds; the composer keeps its text on failure
    pub fn send_composed(&mut self) -> ClientResult<()> {
        let text = self.composer.take();
        match self.send_message(&text) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.composer.set(text);
                Err(err)
            }
        }
    }

    /// Ask the backend to re-send the session's plan
    pub fn request_plan(&self) -> ClientResult<()> {
        self.connection()?.send(ClientFrame::GetPlan)
    }

    pub fn begin_edit(&mut self, section: SectionKey) -> ClientResult<()> {
        Ok(self.view.edit.begin(section)?)
    }

    pub fn set_edit_instructions(&mut self, text: impl Into<String>) -> ClientResult<()> {
        Ok(self.view.edit.set_instructions(text)?)
    }

    pub fn cancel_edit(&mut self) {
        self.view.edit.cancel();
    }

    pub fn acknowledge_edit(&mut self) {
        self.view.edit.acknowledge();
    }

    /// Submit the open edit. At most one edit is in flight, and never while
    /// a generation is streaming.
    pub fn submit_edit(&mut self) -> ClientResult<()> {
        if self.view.generating {
            return Err(ClientError::Busy);
        }
        // Checked before `submit` so a missing session leaves the edit open.
        self.connection()?;
        let frame = self.view.edit.submit()?;
        let section = self.view.edit.section();

        if let Err(err) = self.connection()?.send(frame) {
            self.view.edit.resolve_error(err.to_string());
            return Err(err);
        }
        info!(
            component = "session_controller",
            event = "edit.submitted",
            section = ?section,
        );
        Ok(())
    }

    /// Start or stop dictation. Start failures become a notice.
    pub fn toggle_voice(&mut self) -> VoiceState {
        match self.voice.toggle() {
            Ok(state) => state,
            Err(err) => {
                self.set_capture_notice(&err);
                self.voice.state()
            }
        }
    }

    fn set_capture_notice(&mut self, err: &CaptureError) {
        self.notice = Some(err.to_string());
    }

    // -----------------------------------------------------------------------
    // Event queue
    // -----------------------------------------------------------------------

    /// Wait for the next queued event
    pub async fn next_event(&mut self) -> Option<ControllerEvent> {
        self.events_rx.recv().await
    }

    /// Wait for and apply one event
    pub async fn pump(&mut self) {
        if let Some(event) = self.next_event().await {
            self.handle(event);
        }
    }

    /// Apply everything already queued without waiting; returns how many
    pub fn drain_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle(event);
            applied += 1;
        }
        applied
    }

    fn is_current(&self, tag: &SessionTag) -> bool {
        self.active.as_ref().is_some_and(|a| &a.tag == tag)
    }

    fn drop_stale(&self, tag: &SessionTag, kind: &'static str) -> bool {
        if self.is_current(tag) {
            return false;
        }
        debug!(
            component = "session_controller",
            event = "session.stale_event_dropped",
            session = %tag,
            kind,
        );
        true
    }

    pub fn handle(&mut self, event: ControllerEvent) {
        match event {
            ControllerEvent::Transport { tag, event } => {
                if self.drop_stale(&tag, "transport") {
                    return;
                }
                match event {
                    TransportEvent::State(state) => {
                        if let Some(active) = self.active.as_mut() {
                            active.state = state;
                        }
                    }
                    TransportEvent::Frame(frame) => self.apply_frame(frame),
                }
            }

            ControllerEvent::HistoryLoaded { tag, result } => {
                if self.drop_stale(&tag, "history") {
                    return;
                }
                if let Some(active) = self.active.as_mut() {
                    active.hydration.history = true;
                }
                match result {
                    Ok(history) => {
                        // History predates anything that streamed in meanwhile.
                        let live = std::mem::replace(&mut self.view.messages, history);
                        self.view.messages.extend(live);
                    }
                    Err(err) => warn!(
                        component = "session_controller",
                        event = "session.history_failed",
                        session = %tag,
                        error = %err,
                    ),
                }
            }

            ControllerEvent::PlanLoaded { tag, result } => {
                if self.drop_stale(&tag, "plan") {
                    return;
                }
                if let Some(active) = self.active.as_mut() {
                    active.hydration.plan = true;
                }
                match result {
                    Ok(Some(plan)) if self.view.plan.is_none() => {
                        self.view.plan = Some(plan);
                        self.view.plan_visible = true;
                    }
                    Ok(Some(_)) => debug!(
                        component = "session_controller",
                        event = "session.plan_superseded",
                        session = %tag,
                        "Stream delivered a plan first; keeping it"
                    ),
                    Ok(None) => debug!(
                        component = "session_controller",
                        event = "session.plan_absent",
                        session = %tag,
                    ),
                    Err(err) => warn!(
                        component = "session_controller",
                        event = "session.plan_failed",
                        session = %tag,
                        error = %err,
                    ),
                }
            }

            ControllerEvent::SessionsLoaded(result) => match result {
                Ok(sessions) => self.apply_session_list(sessions),
                Err(err) => warn!(
                    component = "session_controller",
                    event = "session.list_failed",
                    error = %err,
                    "Keeping cached session list"
                ),
            },

            ControllerEvent::Voice(recognition) => {
                if let Some(err) = self.voice.handle(recognition, &mut self.composer) {
                    self.set_capture_notice(&err);
                }
            }
        }
    }

    fn apply_frame(&mut self, frame: ServerEvent) {
        let kind = frame.kind();
        let view = std::mem::take(&mut self.view);
        let (view, effects) = transition(view, frame);
        self.view = view;

        debug!(
            component = "session_controller",
            event = "session.frame_applied",
            kind,
            effects = effects.len(),
        );

        for effect in effects {
            match effect {
                Effect::RefreshSessions => self.refresh_sessions(),
                Effect::GenerationFinished { final_text } => {
                    if !self.speak_responses {
                        continue;
                    }
                    if let Some(text) = final_text {
                        self.synthesizer.speak(&speakable_text(&text));
                    }
                }
            }
        }
    }

    fn apply_session_list(&mut self, mut sessions: Vec<SessionSummary>) {
        sessions.retain(|s| !self.deleted.contains(&s.id));
        if let Some(active) = &self.active {
            // A session created client-side may not be listed yet.
            if !sessions.iter().any(|s| s.id == active.tag.session_id) {
                sessions.insert(0, SessionSummary::fresh(active.tag.session_id.clone()));
            }
        }
        self.sessions = sessions;
    }
}

fn voice_delivery(tx: mpsc::UnboundedSender<ControllerEvent>) -> DeliverFn {
    Arc::new(move |recognition| {
        let _ = tx.send(ControllerEvent::Voice(recognition));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::EditPhase;
    use crate::voice::tests::FakeRecognizer;
    use dossier_protocol::{MessageRole, SectionValue};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    // -- Fakes ----------------------------------------------------------------

    #[derive(Default)]
    struct FakeNet {
        log: Vec<String>,
        sinks: Vec<(SessionTag, TransportSink)>,
        sent: Vec<(SessionTag, ClientFrame)>,
    }

    #[derive(Clone, Default)]
    struct FakeConnector {
        net: Arc<Mutex<FakeNet>>,
    }

    impl FakeConnector {
        fn push(&self, tag: &SessionTag, event: TransportEvent) {
            let sink = {
                let net = self.net.lock().unwrap();
                net.sinks
                    .iter()
                    .find(|(t, _)| t == tag)
                    .map(|(_, sink)| sink.clone())
                    .expect("no connection for tag")
            };
            sink(tag.clone(), event);
        }

        fn frame(&self, tag: &SessionTag, frame: ServerEvent) {
            self.push(tag, TransportEvent::Frame(frame));
        }

        fn log(&self) -> Vec<String> {
            self.net.lock().unwrap().log.clone()
        }

        fn sent(&self) -> Vec<ClientFrame> {
            self.net
                .lock()
                .unwrap()
                .sent
                .iter()
                .map(|(_, f)| f.clone())
                .collect()
        }
    }

    struct FakeConnection {
        tag: SessionTag,
        net: Arc<Mutex<FakeNet>>,
        closed: bool,
    }

    impl Connection for FakeConnection {
        fn send(&self, frame: ClientFrame) -> ClientResult<()> {
            if self.closed {
                return Err(ClientError::ConnectionClosed);
            }
            self.net.lock().unwrap().sent.push((self.tag.clone(), frame));
            Ok(())
        }

        fn close(&mut self) {
            if self.closed {
                return;
            }
            self.closed = true;
            self.net.lock().unwrap().log.push(format!("close {}", self.tag));
        }
    }

    impl Connector for FakeConnector {
        type Conn = FakeConnection;

        fn connect(&self, tag: SessionTag, sink: TransportSink) -> FakeConnection {
            let mut net = self.net.lock().unwrap();
            net.log.push(format!("connect {tag}"));
            net.sinks.push((tag.clone(), sink));
            FakeConnection {
                tag,
                net: self.net.clone(),
                closed: false,
            }
        }
    }

    #[derive(Default)]
    struct FakeResources {
        sessions: Mutex<Vec<SessionSummary>>,
        history: Mutex<HashMap<String, Vec<Message>>>,
        plans: Mutex<HashMap<String, Plan>>,
        fail_create: bool,
        fail_history: bool,
        created: AtomicU64,
    }

    impl FakeResources {
        fn with_sessions(ids: &[&str]) -> Self {
            Self {
                sessions: Mutex::new(ids.iter().map(|id| SessionSummary::fresh(*id)).collect()),
                ..Self::default()
            }
        }
    }

    impl ResourceApi for FakeResources {
        async fn list_sessions(&self) -> ClientResult<Vec<SessionSummary>> {
            Ok(self.sessions.lock().unwrap().clone())
        }

        async fn create_session(&self) -> ClientResult<String> {
            if self.fail_create {
                return Err(ClientError::Status {
                    method: "POST",
                    url: "/session".to_string(),
                    status: 503,
                });
            }
            let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("created-{n}");
            self.sessions
                .lock()
                .unwrap()
                .insert(0, SessionSummary::fresh(id.clone()));
            Ok(id)
        }

        async fn delete_session(&self, session_id: &str) -> ClientResult<()> {
            self.sessions.lock().unwrap().retain(|s| s.id != session_id);
            Ok(())
        }

        async fn fetch_history(&self, session_id: &str) -> ClientResult<Vec<Message>> {
            if self.fail_history {
                return Err(ClientError::Status {
                    method: "GET",
                    url: format!("/session/{session_id}/history"),
                    status: 500,
                });
            }
            Ok(self
                .history
                .lock()
                .unwrap()
                .get(session_id)
                .cloned()
                .unwrap_or_default())
        }

        async fn fetch_plan(&self, session_id: &str) -> ClientResult<Option<Plan>> {
            Ok(self.plans.lock().unwrap().get(session_id).cloned())
        }
    }

    #[derive(Clone, Default)]
    struct FakeSynthesizer {
        spoken: Arc<Mutex<Vec<String>>>,
    }

    impl SpeechSynthesizer for FakeSynthesizer {
        fn speak(&self, text: &str) {
            self.spoken.lock().unwrap().push(text.to_string());
        }
    }

    type TestController = SessionController<FakeConnector, FakeResources>;

    fn controller(resources: FakeResources) -> (TestController, FakeConnector, Arc<FakeResources>) {
        let connector = FakeConnector::default();
        let resources = Arc::new(resources);
        let controller = SessionController::new(connector.clone(), resources.clone());
        (controller, connector, resources)
    }

    /// Let spawned resource tasks finish and apply what they queued
    async fn settle(controller: &mut TestController) {
        for _ in 0..8 {
            tokio::task::yield_now().await;
            controller.drain_pending();
        }
    }

    fn current_tag(controller: &TestController) -> SessionTag {
        let active = controller.active.as_ref().expect("active session");
        active.tag.clone()
    }

    fn message(content: &str) -> ServerEvent {
        ServerEvent::Message {
            content: content.to_string(),
        }
    }

    fn stripe_plan() -> Plan {
        let mut plan = Plan::new("Stripe");
        plan.overview = SectionValue::text("Payments infrastructure");
        plan
    }

    // -- Lifecycle ------------------------------------------------------------

    #[tokio::test]
    async fn start_selects_most_recent_session() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a", "b"]));

        assert_eq!(controller.start(None).await, "a");
        assert_eq!(controller.active_session_id(), Some("a"));
        assert_eq!(connector.log(), vec!["connect a#1"]);
        assert_eq!(controller.connection_state(), ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn start_with_no_sessions_creates_one() {
        let (mut controller, _, _) = controller(FakeResources::default());

        let id = controller.start(None).await;
        assert_eq!(id, "created-1");
        assert_eq!(controller.active_session_id(), Some("created-1"));
        assert_eq!(controller.sessions()[0].id, "created-1");
    }

    #[tokio::test]
    async fn create_failure_falls_back_to_client_id() {
        let (mut controller, _, _) = controller(FakeResources {
            fail_create: true,
            ..FakeResources::default()
        });

        let id = controller.new_session().await;
        assert!(!id.is_empty());
        assert_eq!(controller.active_session_id(), Some(id.as_str()));
        settle(&mut controller).await;
        assert!(controller.sessions().iter().any(|s| s.id == id));
    }

    #[tokio::test]
    async fn switch_closes_previous_stream_before_opening_next() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a", "b"]));
        controller.start(None).await;
        controller.switch_to("b");

        assert_eq!(connector.log(), vec!["connect a#1", "close a#1", "connect b#2"]);
        assert_eq!(controller.active_session_id(), Some("b"));
    }

    #[tokio::test]
    async fn connection_state_follows_transport() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        let tag = current_tag(&controller);

        connector.push(&tag, TransportEvent::State(ConnectionState::Open));
        controller.drain_pending();
        assert_eq!(controller.connection_state(), ConnectionState::Open);

        controller.dispose();
        assert_eq!(controller.connection_state(), ConnectionState::Closed);
        assert_eq!(controller.active_session_id(), None);
    }

    // -- Stale events ---------------------------------------------------------

    #[tokio::test]
    async fn frames_from_previous_session_are_dropped() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a", "b"]));
        controller.start(None).await;
        let tag_a = current_tag(&controller);
        controller.switch_to("b");
        settle(&mut controller).await;

        connector.frame(&tag_a, message("late text for A"));
        connector.frame(
            &tag_a,
            ServerEvent::Status {
                progress: 40,
                message: "Researching".to_string(),
            },
        );
        controller.drain_pending();

        assert!(controller.view().messages.is_empty());
        assert_eq!(controller.view().progress, None);
    }

    #[tokio::test]
    async fn returning_to_a_session_ignores_its_earlier_stream() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a", "b"]));
        controller.start(None).await;
        let first_a = current_tag(&controller);
        controller.switch_to("b");
        controller.switch_to("a");
        let second_a = current_tag(&controller);
        assert_ne!(first_a, second_a);

        connector.frame(&first_a, message("from the old stream"));
        connector.frame(&second_a, message("from the new stream"));
        controller.drain_pending();

        let contents: Vec<_> = controller
            .view()
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["from the new stream"]);
    }

    #[tokio::test]
    async fn stale_hydration_responses_are_dropped() {
        let (mut controller, _, _) = controller(FakeResources::with_sessions(&["a", "b"]));
        controller.start(None).await;
        let tag_a = current_tag(&controller);
        controller.switch_to("b");
        settle(&mut controller).await;

        controller.handle(ControllerEvent::HistoryLoaded {
            tag: tag_a.clone(),
            result: Ok(vec![Message::user("belongs to A")]),
        });
        controller.handle(ControllerEvent::PlanLoaded {
            tag: tag_a,
            result: Ok(Some(stripe_plan())),
        });

        assert!(controller.view().messages.is_empty());
        assert_eq!(controller.view().plan, None);
    }

    // -- Hydration ------------------------------------------------------------

    #[tokio::test]
    async fn hydration_loads_history_and_plan() {
        let resources = FakeResources::with_sessions(&["a"]);
        resources.history.lock().unwrap().insert(
            "a".to_string(),
            vec![Message::user("Research Stripe"), Message::assistant("Done.")],
        );
        resources
            .plans
            .lock()
            .unwrap()
            .insert("a".to_string(), stripe_plan());
        let (mut controller, _, _) = controller(resources);

        controller.start(None).await;
        assert!(!controller.is_hydrated());
        settle(&mut controller).await;

        assert!(controller.is_hydrated());
        assert_eq!(controller.view().messages.len(), 2);
        assert_eq!(controller.view().plan, Some(stripe_plan()));
        assert!(controller.view().plan_visible);
    }

    #[tokio::test]
    async fn history_is_placed_before_live_messages() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        let tag = current_tag(&controller);

        connector.frame(&tag, message("live"));
        controller.drain_pending();
        controller.handle(ControllerEvent::HistoryLoaded {
            tag: tag.clone(),
            result: Ok(vec![Message::user("earlier")]),
        });

        let contents: Vec<_> = controller
            .view()
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(contents, vec!["earlier", "live"]);
    }

    #[tokio::test]
    async fn fetched_plan_does_not_replace_streamed_plan() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        let tag = current_tag(&controller);

        connector.frame(
            &tag,
            ServerEvent::Plan {
                plan: Plan::new("Streamed"),
            },
        );
        controller.drain_pending();
        controller.handle(ControllerEvent::PlanLoaded {
            tag,
            result: Ok(Some(stripe_plan())),
        });

        assert_eq!(
            controller.view().plan.as_ref().map(|p| p.company_name.as_str()),
            Some("Streamed")
        );
    }

    #[tokio::test]
    async fn failed_history_leaves_session_usable() {
        let (mut controller, _, _) = controller(FakeResources {
            fail_history: true,
            ..FakeResources::with_sessions(&["a"])
        });
        controller.start(None).await;
        settle(&mut controller).await;

        assert!(controller.is_hydrated());
        assert!(controller.view().messages.is_empty());
        assert_eq!(controller.view().plan, None);
        controller.send_message("Research Stripe").unwrap();
    }

    // -- Sending --------------------------------------------------------------

    #[tokio::test]
    async fn research_request_streams_into_one_assistant_message() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        settle(&mut controller).await;
        let tag = current_tag(&controller);

        controller.send_message("Research Stripe").unwrap();
        assert!(controller.is_busy());
        for delta in ["Start", "ing ", "research"] {
            connector.frame(&tag, message(delta));
        }
        connector.frame(&tag, ServerEvent::Done);
        controller.drain_pending();

        let messages = &controller.view().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, MessageRole::User);
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].content, "Starting research");
        assert!(!controller.is_busy());
        assert_eq!(
            connector.sent(),
            vec![ClientFrame::Message {
                content: "Research Stripe".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn second_message_is_rejected_while_generating() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;

        controller.send_message("first").unwrap();
        assert!(matches!(
            controller.send_message("second"),
            Err(ClientError::Busy)
        ));
        assert!(matches!(
            controller.send_message("   "),
            Err(ClientError::EmptyMessage)
        ));
        assert_eq!(connector.sent().len(), 1);
    }

    #[tokio::test]
    async fn send_without_session_fails() {
        let (mut controller, _, _) = controller(FakeResources::default());
        assert!(matches!(
            controller.send_message("hello"),
            Err(ClientError::NoActiveSession)
        ));
        assert!(matches!(
            controller.request_plan(),
            Err(ClientError::NoActiveSession)
        ));
    }

    #[tokio::test]
    async fn send_composed_drains_composer_only_on_success() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;

        controller.composer_mut().set("Research Stripe");
        controller.send_composed().unwrap();
        assert_eq!(controller.composer().text(), "");

        controller.composer_mut().set("follow up");
        assert!(controller.send_composed().is_err());
        assert_eq!(controller.composer().text(), "follow up");
        assert_eq!(connector.sent().len(), 1);
    }

    #[tokio::test]
    async fn request_plan_sends_get_plan() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        controller.request_plan().unwrap();
        assert_eq!(connector.sent(), vec![ClientFrame::GetPlan]);
    }

    // -- Editing --------------------------------------------------------------

    #[tokio::test]
    async fn section_edit_applies_and_announces_once() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        let tag = current_tag(&controller);
        connector.frame(&tag, ServerEvent::Plan { plan: stripe_plan() });
        controller.drain_pending();

        controller.begin_edit(SectionKey::Leadership).unwrap();
        controller.set_edit_instructions("add CTO").unwrap();
        controller.submit_edit().unwrap();
        assert_eq!(controller.view().edit.phase(), EditPhase::Submitting);
        assert!(controller.is_busy());
        assert_eq!(
            connector.sent(),
            vec![ClientFrame::EditSection {
                section: "leadership".to_string(),
                instructions: "add CTO".to_string(),
            }]
        );

        let leadership = SectionValue::text("CTO: David Singleton");
        connector.frame(
            &tag,
            ServerEvent::SectionUpdated {
                section: "leadership".to_string(),
                updated_content: Some(leadership.clone()),
                full_plan: None,
            },
        );
        controller.drain_pending();

        let view = controller.view();
        assert_eq!(view.edit.phase(), EditPhase::Applied);
        assert_eq!(
            view.plan.as_ref().map(|p| p.section(SectionKey::Leadership)),
            Some(&leadership)
        );
        let system: Vec<_> = view
            .messages
            .iter()
            .filter(|m| m.role == MessageRole::System)
            .collect();
        assert_eq!(system.len(), 1);

        controller.acknowledge_edit();
        assert_eq!(controller.view().edit.phase(), EditPhase::Idle);
    }

    #[tokio::test]
    async fn edit_is_blocked_while_generating() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;

        controller.send_message("Research Stripe").unwrap();
        controller.begin_edit(SectionKey::RecentNews).unwrap();
        controller.set_edit_instructions("latest funding").unwrap();
        assert!(matches!(controller.submit_edit(), Err(ClientError::Busy)));
        assert_eq!(controller.view().edit.phase(), EditPhase::Editing);
        assert_eq!(connector.sent().len(), 1);
    }

    #[tokio::test]
    async fn message_is_blocked_while_edit_submitting() {
        let (mut controller, _, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;

        controller.begin_edit(SectionKey::Overview).unwrap();
        controller.set_edit_instructions("shorter").unwrap();
        controller.submit_edit().unwrap();
        assert!(matches!(
            controller.send_message("hello"),
            Err(ClientError::Busy)
        ));
        assert!(matches!(
            controller.begin_edit(SectionKey::RecentNews),
            Err(ClientError::Edit(_))
        ));
    }

    #[tokio::test]
    async fn backend_error_fails_pending_edit() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        let tag = current_tag(&controller);

        controller.begin_edit(SectionKey::Overview).unwrap();
        controller.set_edit_instructions("shorter").unwrap();
        controller.submit_edit().unwrap();
        connector.frame(
            &tag,
            ServerEvent::Error {
                message: "Section rewrite failed".to_string(),
            },
        );
        controller.drain_pending();

        assert_eq!(controller.view().edit.phase(), EditPhase::Error);
        assert_eq!(controller.view().edit.failure(), Some("Section rewrite failed"));
        assert!(!controller.is_busy());
    }

    // -- Session list ---------------------------------------------------------

    #[tokio::test]
    async fn deleting_only_session_creates_a_fresh_one() {
        let (mut controller, _, resources) = controller(FakeResources::with_sessions(&["only"]));
        controller.start(None).await;
        settle(&mut controller).await;

        controller.delete_session("only").await.unwrap();
        settle(&mut controller).await;

        assert_eq!(controller.active_session_id(), Some("created-1"));
        assert!(controller.view().messages.is_empty());
        assert_eq!(controller.view().plan, None);
        let ids: Vec<_> = controller.sessions().iter().map(|s| s.id.clone()).collect();
        assert_eq!(ids, vec!["created-1"]);
        assert_eq!(resources.sessions.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn deleting_active_session_moves_to_neighbor() {
        let (mut controller, _, _) = controller(FakeResources::with_sessions(&["a", "b", "c"]));
        controller.start(Some("b")).await;

        controller.delete_session("b").await.unwrap();
        assert_eq!(controller.active_session_id(), Some("c"));

        controller.delete_session("c").await.unwrap();
        assert_eq!(controller.active_session_id(), Some("a"));
    }

    #[tokio::test]
    async fn deleting_other_session_keeps_active() {
        let (mut controller, connector, _) = controller(FakeResources::with_sessions(&["a", "b"]));
        controller.start(None).await;

        controller.delete_session("b").await.unwrap();
        settle(&mut controller).await;

        assert_eq!(controller.active_session_id(), Some("a"));
        assert_eq!(connector.log(), vec!["connect a#1"]);
        let ids: Vec<_> = controller.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a"]);
    }

    #[tokio::test]
    async fn completed_plan_refreshes_session_labels() {
        let (mut controller, connector, resources) =
            controller(FakeResources::with_sessions(&["a"]));
        controller.start(None).await;
        settle(&mut controller).await;
        let tag = current_tag(&controller);

        resources.sessions.lock().unwrap()[0].label = Some("Stripe".to_string());
        connector.frame(&tag, ServerEvent::PlanComplete { plan: stripe_plan() });
        settle(&mut controller).await;

        assert_eq!(controller.sessions()[0].label.as_deref(), Some("Stripe"));
        assert!(controller.view().plan_visible);
    }

    #[tokio::test]
    async fn refreshed_list_keeps_unlisted_active_session() {
        let (mut controller, _, _) = controller(FakeResources::with_sessions(&["a"]));
        controller.start(Some("local-only")).await;

        controller.refresh_sessions();
        settle(&mut controller).await;

        let ids: Vec<_> = controller.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["local-only", "a"]);
    }

    // -- Voice and speech -----------------------------------------------------

    #[tokio::test]
    async fn dictation_fills_composer_through_the_queue() {
        let recognizer = FakeRecognizer::default();
        let sink_slot = recognizer.sink.clone();
        let (controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        let mut controller = controller.with_recognizer(Box::new(recognizer));
        controller.start(None).await;

        assert_eq!(controller.toggle_voice(), VoiceState::Listening);
        let sink = sink_slot.lock().unwrap().clone().unwrap();
        sink.interim("research str");
        sink.final_result("research Stripe");
        controller.drain_pending();
        assert_eq!(controller.composer().text(), "research Stripe");

        controller.send_composed().unwrap();
        assert_eq!(
            connector.sent(),
            vec![ClientFrame::Message {
                content: "research Stripe".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn capture_failure_becomes_a_notice() {
        let recognizer = FakeRecognizer {
            fail_with: Some(CaptureError::PermissionDenied),
            ..FakeRecognizer::default()
        };
        let (controller, _, _) = controller(FakeResources::with_sessions(&["a"]));
        let mut controller = controller.with_recognizer(Box::new(recognizer));
        controller.composer_mut().set("draft");

        assert_eq!(controller.toggle_voice(), VoiceState::Idle);
        assert_eq!(
            controller.take_notice().as_deref(),
            Some("Microphone permission denied")
        );
        assert_eq!(controller.take_notice(), None);
        assert_eq!(controller.composer().text(), "draft");
    }

    #[tokio::test]
    async fn finished_response_is_spoken_when_enabled() {
        let synthesizer = FakeSynthesizer::default();
        let spoken = synthesizer.spoken.clone();
        let (controller, connector, _) = controller(FakeResources::with_sessions(&["a"]));
        let mut controller = controller
            .with_synthesizer(Box::new(synthesizer))
            .with_speak_responses(true);
        controller.start(None).await;
        let tag = current_tag(&controller);

        controller.send_message("Research Stripe").unwrap();
        connector.frame(&tag, message("**Stripe** plan is ready"));
        connector.frame(&tag, ServerEvent::Done);
        controller.drain_pending();

        assert_eq!(*spoken.lock().unwrap(), vec!["Stripe plan is ready"]);
    }
}
