//! Incremental parser for OpenAI-style server-sent events.
//!
//! Network chunks do not respect line or even UTF-8 boundaries, so bytes are
//! buffered until a full line is available.

use serde::Deserialize;

use super::ProviderError;

/// Streaming chunk for chat completions.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChatChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChunkChoice {
    #[serde(default)]
    pub delta: ChatDelta,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatDelta {
    #[serde(default)]
    pub content: Option<String>,
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Text to forward; never empty.
    Delta(String),
    /// A choice reported a finish reason.
    Finished,
    /// `data: [DONE]`
    Done,
}

#[derive(Debug, Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every event completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<SseEvent>, ProviderError> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        while let Some(pos) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            parse_line(&String::from_utf8_lossy(&line), &mut events)?;
        }
        Ok(events)
    }

    /// Parse whatever is left once the byte stream has ended.
    pub fn finish(&mut self) -> Result<Vec<SseEvent>, ProviderError> {
        let rest = std::mem::take(&mut self.buf);
        let mut events = Vec::new();
        parse_line(&String::from_utf8_lossy(&rest), &mut events)?;
        Ok(events)
    }
}

fn parse_line(line: &str, events: &mut Vec<SseEvent>) -> Result<(), ProviderError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return Ok(());
    }
    let Some(data) = line.strip_prefix("data:") else {
        // `event:`, `id:`, `retry:` carry nothing we use.
        return Ok(());
    };
    let data = data.trim_start();
    if data == "[DONE]" {
        events.push(SseEvent::Done);
        return Ok(());
    }
    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| ProviderError::Decode(format!("bad SSE chunk: {}", e)))?;
    let mut finished = false;
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(SseEvent::Delta(content));
        }
        finished |= choice.finish_reason.is_some();
    }
    if finished {
        events.push(SseEvent::Finished);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str =
        r#"data: {"id":"x","choices":[{"index":0,"delta":{"content":"Hello"},"finish_reason":null}]}"#;

    #[test]
    fn parses_complete_lines() {
        let mut d = SseDecoder::new();
        let input = format!("{}\n\n{}\n\ndata: [DONE]\n\n", HELLO, HELLO.replace("Hello", " World"));
        let events = d.push(input.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                SseEvent::Delta("Hello".into()),
                SseEvent::Delta(" World".into()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn buffers_across_chunk_boundaries() {
        let mut d = SseDecoder::new();
        let line = format!("{}\n", HELLO.replace("Hello", "héllo"));
        let bytes = line.as_bytes();
        // Split inside the two-byte 'é'.
        let split = line.find('é').unwrap() + 1;
        assert!(d.push(&bytes[..split]).unwrap().is_empty());
        assert_eq!(
            d.push(&bytes[split..]).unwrap(),
            vec![SseEvent::Delta("héllo".into())]
        );
    }

    #[test]
    fn role_only_and_comments_produce_nothing() {
        let mut d = SseDecoder::new();
        let input = ": keep-alive\nevent: message\ndata: {\"choices\":[{\"delta\":{\"role\":\"assistant\"}}]}\n";
        assert!(d.push(input.as_bytes()).unwrap().is_empty());
    }

    #[test]
    fn finish_reason_is_reported() {
        let mut d = SseDecoder::new();
        let input = r#"data: {"choices":[{"delta":{"content":"!"},"finish_reason":"stop"}]}"#;
        assert!(d.push(input.as_bytes()).unwrap().is_empty());
        assert_eq!(
            d.finish().unwrap(),
            vec![SseEvent::Delta("!".into()), SseEvent::Finished]
        );
    }

    #[test]
    fn invalid_json_is_a_decode_error() {
        let mut d = SseDecoder::new();
        assert!(matches!(
            d.push(b"data: {invalid json}\n"),
            Err(ProviderError::Decode(_))
        ));
    }
}
