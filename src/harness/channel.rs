//! Request/response correlation over a long-lived event stream
//!
//! One background listener task owns the stream and is the only producer
//! of inbound envelopes; the channel's `send` is the only consumer. A
//! response for a later request may arrive first, so non-matching
//! responses are stashed until their caller asks for them.

use crate::harness::envelope::{RpcMessage, RpcRequest};
use crate::harness::sse::{
    open_event_stream, session_id_from_endpoint, submission_url, EnvelopePoster, FrameStream,
    HttpPoster, PostAck,
};
use crate::harness::ChannelError;
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upper bound on responses held for requests that have not claimed them
const STASH_LIMIT: usize = 256;

/// Result of a `send`: either the matching envelope or nothing in time
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Response(RpcMessage),
    TimedOut,
}

pub struct CorrelationChannel {
    session_id: String,
    submit_url: String,
    poster: Arc<dyn EnvelopePoster>,
    inbox: mpsc::UnboundedReceiver<RpcMessage>,
    stash: VecDeque<RpcMessage>,
    next_id: u64,
    stop: Option<oneshot::Sender<()>>,
    listener: Option<JoinHandle<()>>,
}

impl CorrelationChannel {
    /// Connect to an event stream and wait for its session announcement
    pub async fn open(
        url: &str,
        headers: &HashMap<String, String>,
        session_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let stream = open_event_stream(url, headers)?;
        let poster = Arc::new(HttpPoster::new(headers.clone()));
        Self::from_parts(url, stream, poster, session_timeout).await
    }

    /// Build a channel over an already-open frame stream
    pub async fn from_parts(
        stream_url: &str,
        stream: FrameStream,
        poster: Arc<dyn EnvelopePoster>,
        session_timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let (session_tx, session_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = oneshot::channel();
        let listener = tokio::spawn(listen(stream, inbox_tx, session_tx, stop_rx));

        let endpoint = match tokio::time::timeout(session_timeout, session_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                listener.abort();
                return Err(ChannelError::SessionNotEstablished(
                    "stream ended before a session was announced".to_string(),
                ));
            }
            Err(_) => {
                listener.abort();
                return Err(ChannelError::SessionNotEstablished(format!(
                    "no session announced within {:?}",
                    session_timeout
                )));
            }
        };

        let session_id = match session_id_from_endpoint(&endpoint) {
            Some(id) => id,
            None => {
                listener.abort();
                return Err(ChannelError::SessionNotEstablished(format!(
                    "announced endpoint '{}' has no session id",
                    endpoint
                )));
            }
        };
        debug!("Session {} established on {}", session_id, stream_url);

        Ok(Self {
            session_id,
            submit_url: submission_url(stream_url, &endpoint),
            poster,
            inbox,
            stash: VecDeque::new(),
            next_id: 0,
            stop: Some(stop_tx),
            listener: Some(listener),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn submit_url(&self) -> &str {
        &self.submit_url
    }

    pub fn is_closed(&self) -> bool {
        self.listener.is_none()
    }

    /// Submit a request and wait for the response carrying its id.
    ///
    /// Running out of time is a `Reply::TimedOut`, not an error.
    pub async fn send(
        &mut self,
        method: &str,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<Reply, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Closed);
        }

        self.next_id += 1;
        let id = self.next_id;
        let envelope = serde_json::to_value(RpcRequest::new(id, method, params))
            .map_err(|e| ChannelError::Post(e.to_string()))?;
        let deadline = Instant::now() + timeout;

        match tokio::time::timeout_at(deadline, self.poster.post(&self.submit_url, &envelope)).await
        {
            Err(_) => return Ok(Reply::TimedOut),
            Ok(Err(e)) => return Err(e),
            Ok(Ok(PostAck::Immediate(message))) => {
                if message.answers(id) {
                    return Ok(Reply::Response(message));
                }
                self.stash_response(message);
            }
            Ok(Ok(PostAck::Accepted)) => {}
        }

        if let Some(pos) = self.stash.iter().position(|m| m.answers(id)) {
            if let Some(message) = self.stash.remove(pos) {
                return Ok(Reply::Response(message));
            }
        }

        loop {
            match tokio::time::timeout_at(deadline, self.inbox.recv()).await {
                Err(_) => {
                    debug!("Request {} ({}) timed out after {:?}", id, method, timeout);
                    return Ok(Reply::TimedOut);
                }
                Ok(None) => return Err(ChannelError::ListenerStopped),
                Ok(Some(message)) if message.answers(id) => return Ok(Reply::Response(message)),
                Ok(Some(message)) => self.stash_response(message),
            }
        }
    }

    fn stash_response(&mut self, message: RpcMessage) {
        if !message.is_response() {
            debug!("Ignoring non-response envelope {:?}", message.method);
            return;
        }
        if self.stash.len() >= STASH_LIMIT {
            self.stash.pop_front();
        }
        self.stash.push_back(message);
    }

    /// Stop the listener and release the stream
    pub fn close(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.stash.clear();
    }
}

impl Drop for CorrelationChannel {
    fn drop(&mut self) {
        self.close();
    }
}

async fn listen(
    mut stream: FrameStream,
    inbox: mpsc::UnboundedSender<RpcMessage>,
    session_tx: oneshot::Sender<String>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut session_tx = Some(session_tx);

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            frame = stream.next() => match frame {
                Some(Ok(frame)) => {
                    if let Some(endpoint) = frame.announced_endpoint() {
                        if let Some(tx) = session_tx.take() {
                            let _ = tx.send(endpoint.to_string());
                        }
                        continue;
                    }
                    match serde_json::from_str::<RpcMessage>(&frame.data) {
                        Ok(message) => {
                            if inbox.send(message).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let excerpt: String = frame.data.chars().take(120).collect();
                            debug!("Dropping malformed {} frame ({}): {}", frame.event, e, excerpt);
                        }
                    }
                }
                Some(Err(e)) => {
                    warn!("Event stream failed: {}", e);
                    break;
                }
                None => break,
            }
        }
    }
}
