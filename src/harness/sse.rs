//! Server-sent event framing and envelope submission

use crate::harness::envelope::RpcMessage;
use crate::harness::ChannelError;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde_json::Value;
use std::collections::HashMap;

/// One `event:` / `data:` frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
}

impl SseFrame {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            event: "message".to_string(),
            data: data.into(),
        }
    }

    pub fn endpoint(path: impl Into<String>) -> Self {
        Self {
            event: "endpoint".to_string(),
            data: path.into(),
        }
    }

    /// The submission sub-endpoint, if this frame announces one
    pub fn announced_endpoint(&self) -> Option<&str> {
        let data = self.data.trim();
        let looks_like_path = data.starts_with('/') || data.starts_with("http");
        if (self.event == "endpoint" || looks_like_path) && data.contains("sessionId=") {
            Some(data)
        } else {
            None
        }
    }
}

pub type FrameStream = BoxStream<'static, Result<SseFrame, ChannelError>>;

/// Open a streaming GET and expose it as a stream of frames
pub fn open_event_stream(
    url: &str,
    headers: &HashMap<String, String>,
) -> Result<FrameStream, ChannelError> {
    let client = reqwest::Client::new();
    let mut request = client.get(url).header("Accept", "text/event-stream");
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let source = EventSource::new(request).map_err(|e| ChannelError::Connect(e.to_string()))?;
    let frames = source.filter_map(|event| {
        futures::future::ready(match event {
            Ok(Event::Open) => None,
            Ok(Event::Message(message)) => Some(Ok(SseFrame {
                event: message.event,
                data: message.data,
            })),
            Err(e) => Some(Err(ChannelError::Connect(e.to_string()))),
        })
    });
    Ok(frames.boxed())
}

/// `sessionId` query value of an announced endpoint
pub fn session_id_from_endpoint(endpoint: &str) -> Option<String> {
    let (_, rest) = endpoint.split_once("sessionId=")?;
    let id = rest.split('&').next().unwrap_or_default().trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Where envelopes are posted: the stream URL without its `/sse` suffix,
/// joined with the announced endpoint
pub fn submission_url(stream_url: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let base = stream_url.split('?').next().unwrap_or(stream_url);
    let base = base.trim_end_matches('/');
    let base = base.strip_suffix("/sse").unwrap_or(base);
    format!("{}/{}", base, endpoint.trim_start_matches('/'))
}

/// How the server acknowledged a posted envelope
#[derive(Debug, Clone, PartialEq)]
pub enum PostAck {
    /// The response will arrive on the stream
    Accepted,
    /// The response came back in the POST body
    Immediate(RpcMessage),
}

/// Submits envelopes to the session's sub-endpoint
#[async_trait::async_trait]
pub trait EnvelopePoster: Send + Sync {
    async fn post(&self, url: &str, envelope: &Value) -> Result<PostAck, ChannelError>;
}

pub struct HttpPoster {
    client: reqwest::Client,
    headers: HashMap<String, String>,
}

impl HttpPoster {
    pub fn new(headers: HashMap<String, String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            headers,
        }
    }
}

#[async_trait::async_trait]
impl EnvelopePoster for HttpPoster {
    async fn post(&self, url: &str, envelope: &Value) -> Result<PostAck, ChannelError> {
        let mut request = self.client.post(url).json(envelope);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChannelError::Post(e.to_string()))?;
        let status = response.status();
        if status.as_u16() == 202 {
            return Ok(PostAck::Accepted);
        }
        if !status.is_success() {
            return Err(ChannelError::Post(format!("submission returned {}", status)));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ChannelError::Post(e.to_string()))?;
        match serde_json::from_str::<RpcMessage>(&text) {
            Ok(message) if message.is_response() => Ok(PostAck::Immediate(message)),
            _ => Ok(PostAck::Accepted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_parsing() {
        assert_eq!(
            session_id_from_endpoint("/message?sessionId=abc123"),
            Some("abc123".to_string())
        );
        assert_eq!(
            session_id_from_endpoint("/submit?sessionId=xyz&foo=1"),
            Some("xyz".to_string())
        );
        assert_eq!(session_id_from_endpoint("/submit?sessionId="), None);
        assert_eq!(session_id_from_endpoint("/submit"), None);
    }

    #[test]
    fn test_submission_url() {
        assert_eq!(
            submission_url("https://host/svc/sse", "/message?sessionId=1"),
            "https://host/svc/message?sessionId=1"
        );
        assert_eq!(
            submission_url("https://host/svc/sse?key=k", "/message?sessionId=1"),
            "https://host/svc/message?sessionId=1"
        );
        assert_eq!(
            submission_url("https://host/sse", "https://other/submit?sessionId=2"),
            "https://other/submit?sessionId=2"
        );
    }

    #[test]
    fn test_endpoint_announcement_detection() {
        assert_eq!(
            SseFrame::endpoint("/message?sessionId=s1").announced_endpoint(),
            Some("/message?sessionId=s1")
        );
        assert_eq!(
            SseFrame::message("/submit?sessionId=s2").announced_endpoint(),
            Some("/submit?sessionId=s2")
        );
        assert_eq!(SseFrame::message(r#"{"id":1}"#).announced_endpoint(), None);
    }
}
