//! Chat turn orchestration for one session.
//!
//! A turn posts the query over HTTP while realtime events keep flowing; both are applied in
//! this task, one at a time. The final answer usually arrives on the response topic; the HTTP
//! body is only used when the realtime link is down when the request returns.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::api::{AdvisorApi, AnalyzeRequest, AnalyzeResponse, RequestError};
use crate::history::{LocalMessageStore, Message};
use crate::realtime::{RealtimeClient, RealtimeEvent};
use crate::timeline::{EventCorrelator, ReasoningStep, ToolCallEvent};

pub const GREETING: &str = "Hello! I'm your AI financial advisor. I can help you with:\n\n\
• Stock analysis and recommendations\n\
• Portfolio management advice\n\
• Risk assessment\n\
• Investment strategy planning\n\
• Market insights\n\n\
How can I assist you with your financial goals today?";

const FALLBACK_STATUS_ERROR: &str = "An error occurred";
const FALLBACK_REQUEST_ERROR: &str = "Failed to get response. Please try again.";
const RESPONSE_TIMEOUT_ERROR: &str = "No response received in time. Please try again.";

/// What the controller needs from the realtime side.
pub trait RealtimeLink: Send {
    fn is_connected(&self) -> bool;
    fn disconnect(&mut self);
}

impl RealtimeLink for RealtimeClient {
    fn is_connected(&self) -> bool {
        RealtimeClient::is_connected(self)
    }

    fn disconnect(&mut self) {
        RealtimeClient::disconnect(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    EmptyQuery,
    TurnInProgress,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::EmptyQuery => write!(f, "query is empty"),
            RejectReason::TurnInProgress => write!(f, "a query is already in progress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The turn finished before `send_query` returned.
    Settled,
    /// The HTTP call returned; the answer is expected on the realtime channel.
    AwaitingRealtime,
    Rejected(RejectReason),
}

/// Change notifications for a live view.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatUpdate {
    Message(Message),
    Reasoning(ReasoningStep),
    ToolStarted(ToolCallEvent),
    ToolFinished(ToolCallEvent),
    Connection { connected: bool },
    TransportError(String),
}

type Observer = Box<dyn FnMut(&ChatUpdate) + Send>;

pub struct ChatController {
    session_id: String,
    api: Arc<dyn AdvisorApi>,
    history: LocalMessageStore,
    link: Option<Box<dyn RealtimeLink>>,
    events: Option<mpsc::UnboundedReceiver<RealtimeEvent>>,
    messages: Vec<Message>,
    loading_since: Option<Instant>,
    response_timeout: Option<Duration>,
    correlator: EventCorrelator,
    observer: Option<Observer>,
}

impl ChatController {
    /// Restore the session's conversation; an empty history starts with the greeting.
    pub fn new(
        session_id: impl Into<String>,
        api: Arc<dyn AdvisorApi>,
        history: LocalMessageStore,
    ) -> Self {
        let session_id = session_id.into();
        let mut messages = history.load(&session_id);
        if messages.is_empty() {
            messages.push(Message::assistant(GREETING));
        }
        log::debug!(
            "chat controller for {} restored {} message(s)",
            session_id,
            messages.len()
        );
        Self {
            session_id,
            api,
            history,
            link: None,
            events: None,
            messages,
            loading_since: None,
            response_timeout: None,
            correlator: EventCorrelator::new(),
            observer: None,
        }
    }

    /// Attach a realtime link and the event stream it feeds.
    pub fn with_realtime(
        mut self,
        link: Box<dyn RealtimeLink>,
        events: mpsc::UnboundedReceiver<RealtimeEvent>,
    ) -> Self {
        self.link = Some(link);
        self.events = Some(events);
        self
    }

    pub fn with_response_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn on_update(&mut self, observer: impl FnMut(&ChatUpdate) + Send + 'static) {
        self.observer = Some(Box::new(observer));
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_loading(&self) -> bool {
        self.loading_since.is_some()
    }

    pub fn correlator(&self) -> &EventCorrelator {
        &self.correlator
    }

    /// Whether realtime events can still arrive.
    pub fn is_listening(&self) -> bool {
        self.events.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.link.as_ref().map(|l| l.is_connected()).unwrap_or(false)
    }

    fn notify(&mut self, update: ChatUpdate) {
        if let Some(observer) = self.observer.as_mut() {
            observer(&update);
        }
    }

    fn append(&mut self, message: Message) {
        self.messages.push(message.clone());
        self.history.save(&self.session_id, &self.messages);
        self.notify(ChatUpdate::Message(message));
    }

    fn finish_turn(&mut self, message: Message) {
        self.append(message);
        self.loading_since = None;
    }

    /// Run one turn: append the user message, post the query and apply realtime events that
    /// arrive meanwhile.
    pub async fn send_query(&mut self, text: &str) -> SendOutcome {
        let query = text.trim();
        if query.is_empty() {
            return SendOutcome::Rejected(RejectReason::EmptyQuery);
        }
        if self.is_loading() {
            return SendOutcome::Rejected(RejectReason::TurnInProgress);
        }

        self.append(Message::user(query));
        self.loading_since = Some(Instant::now());
        self.correlator.clear();

        let api = self.api.clone();
        let request = AnalyzeRequest {
            query: query.to_string(),
            session_id: self.session_id.clone(),
        };
        let call = api.analyze(&request);
        tokio::pin!(call);
        let result = loop {
            tokio::select! {
                res = &mut call => break res,
                ev = recv_event(&mut self.events) => self.apply(ev),
            }
        };
        self.settle_http(result);

        if self.is_loading() {
            SendOutcome::AwaitingRealtime
        } else {
            SendOutcome::Settled
        }
    }

    fn settle_http(&mut self, result: Result<AnalyzeResponse, RequestError>) {
        if !self.is_loading() {
            log::debug!("analyze returned after the turn ended; ignoring result");
            return;
        }
        match result {
            Ok(body) if body.is_success() => {
                if self.is_connected() {
                    log::debug!("analyze accepted; waiting for realtime response");
                    return;
                }
                log::info!("realtime link down; using HTTP response body");
                self.finish_turn(Message::assistant(body.response.unwrap_or_default()));
            }
            Ok(body) => {
                log::warn!("analyze returned status {}", body.status);
                let text = body
                    .message
                    .unwrap_or_else(|| FALLBACK_STATUS_ERROR.to_string());
                self.finish_turn(Message::error(text));
            }
            Err(e) => {
                log::error!("analyze request failed: {}", e);
                let text = e
                    .server_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| FALLBACK_REQUEST_ERROR.to_string());
                self.finish_turn(Message::error(text));
            }
        }
    }

    /// Wait for and apply the next realtime event. Returns false when the stream has ended,
    /// or when the response timeout fired and ended the turn.
    pub async fn next_event(&mut self) -> bool {
        let deadline = match (self.loading_since, self.response_timeout) {
            (Some(since), Some(limit)) => Some(since + limit),
            _ => None,
        };
        if self.events.is_none() && deadline.is_none() {
            return false;
        }
        tokio::select! {
            ev = recv_event(&mut self.events) => {
                let open = ev.is_some();
                self.apply(ev);
                open
            }
            _ = sleep_until(deadline) => {
                log::warn!("no response for session {} within {:?}", self.session_id, self.response_timeout);
                self.finish_turn(Message::error(RESPONSE_TIMEOUT_ERROR));
                false
            }
        }
    }

    /// Apply realtime events until the current turn ends (or the stream closes).
    pub async fn wait_for_turn(&mut self) {
        while self.is_loading() {
            let applied = self.next_event().await;
            if !applied && self.events.is_none() && self.response_timeout.is_none() {
                log::warn!("realtime stream closed while a turn was pending");
                break;
            }
        }
    }

    fn apply(&mut self, event: Option<RealtimeEvent>) {
        match event {
            Some(ev) => self.handle_event(ev),
            None => {
                log::debug!("realtime event stream closed");
                self.events = None;
            }
        }
    }

    /// Apply one realtime event to the conversation or the timeline.
    pub fn handle_event(&mut self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Connected => self.notify(ChatUpdate::Connection { connected: true }),
            RealtimeEvent::Disconnected => {
                self.notify(ChatUpdate::Connection { connected: false })
            }
            RealtimeEvent::Thinking(p) | RealtimeEvent::Reasoning(p) => {
                let step = self.correlator.push_reasoning(p.content, p.timestamp).clone();
                self.notify(ChatUpdate::Reasoning(step));
            }
            RealtimeEvent::ToolCall(p) => {
                let i = self.correlator.push_tool_call(p);
                let call = self.correlator.tool_calls()[i].clone();
                self.notify(ChatUpdate::ToolStarted(call));
            }
            RealtimeEvent::ToolResult(p) => {
                if let Some(i) = self.correlator.apply_tool_result(p) {
                    let call = self.correlator.tool_calls()[i].clone();
                    self.notify(ChatUpdate::ToolFinished(call));
                }
            }
            RealtimeEvent::Response(p) => {
                if !self.is_loading() {
                    log::debug!("dropping response with no turn pending");
                    return;
                }
                self.finish_turn(Message::assistant(p.content));
            }
            RealtimeEvent::Error(p) => {
                if !self.is_loading() {
                    log::debug!("dropping error event with no turn pending: {:?}", p.content);
                    return;
                }
                self.finish_turn(Message::error(
                    p.content
                        .unwrap_or_else(|| FALLBACK_STATUS_ERROR.to_string()),
                ));
            }
            RealtimeEvent::BrokerError(message) => {
                log::warn!("realtime broker error: {}", message);
                self.notify(ChatUpdate::TransportError(message.clone()));
                if self.is_loading() {
                    self.finish_turn(Message::error(message));
                }
            }
            RealtimeEvent::TransportError(reason) => {
                log::warn!("realtime transport error: {}", reason);
                self.notify(ChatUpdate::TransportError(reason));
            }
        }
    }

    /// Delete the stored conversation and start over from the greeting.
    pub fn clear_history(&mut self) {
        self.history.clear(&self.session_id);
        self.messages = vec![Message::assistant(GREETING)];
        self.correlator.clear();
    }

    /// Disconnect the realtime link; no events are applied afterwards.
    pub fn teardown(&mut self) {
        if let Some(link) = self.link.as_mut() {
            link.disconnect();
        }
        if let Some(mut events) = self.events.take() {
            events.close();
        }
        self.loading_since = None;
    }
}

impl Drop for ChatController {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn recv_event(
    events: &mut Option<mpsc::UnboundedReceiver<RealtimeEvent>>,
) -> Option<RealtimeEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}
