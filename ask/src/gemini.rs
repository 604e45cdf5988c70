use crate::activation::Secret;
use crate::AskError;
use serde::Deserialize;
use serde_json::json;
use std::io::{BufRead, BufReader};
use std::time::{Duration, Instant};

/// One streamed piece of a generated answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Chunk {
    /// `None` when the chunk carried no text (e.g. a blocked candidate).
    pub text: Option<String>,
    pub block_reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StreamSummary {
    pub text: String,
    pub chunks: usize,
    pub first_chunk_after: Option<Duration>,
    pub elapsed: Duration,
    pub block_reason: Option<String>,
}

pub trait TextGenerator {
    fn stream(&self, query: &str, on_chunk: &mut dyn FnMut(&Chunk)) -> Result<StreamSummary, AskError>;
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

/// Text of the first candidate; later candidates are ignored.
fn chunk_from(payload: GenerateContentResponse) -> Chunk {
    let mut text: Option<String> = None;
    if let Some(content) = payload.candidates.first().and_then(|c| c.content.as_ref()) {
        for part in &content.parts {
            if let Some(piece) = &part.text {
                text.get_or_insert_with(String::new).push_str(piece);
            }
        }
    }
    Chunk {
        text,
        block_reason: payload.prompt_feedback.and_then(|f| f.block_reason),
    }
}

pub struct GeminiClient {
    base_url: String,
    model: String,
    api_key: Secret,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(base_url: &str, model: &str, api_key: Secret, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            timeout,
        }
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.base_url, self.model
        )
    }
}

impl TextGenerator for GeminiClient {
    fn stream(&self, query: &str, on_chunk: &mut dyn FnMut(&Chunk)) -> Result<StreamSummary, AskError> {
        // A total timeout would also cut off long streamed answers.
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(self.timeout)
            .timeout(None::<Duration>)
            .build()?;
        let started = Instant::now();
        tracing::debug!(model = %self.model, "sending generation request");
        let response = client
            .post(self.stream_url())
            .header("x-goog-api-key", self.api_key.expose())
            .header("User-Agent", "ask-cli")
            .json(&json!({ "contents": [{ "parts": [{ "text": query }] }] }))
            .send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(generation_error(status.as_u16(), &body));
        }
        read_sse_stream(BufReader::new(response), started, on_chunk)
    }
}

/// Consumes `data:` events until the stream ends.
pub fn read_sse_stream(
    reader: impl BufRead,
    started: Instant,
    on_chunk: &mut dyn FnMut(&Chunk),
) -> Result<StreamSummary, AskError> {
    let mut summary = StreamSummary::default();
    for line in reader.lines() {
        let line = line?;
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() || data == "[DONE]" {
            continue;
        }
        let payload: GenerateContentResponse = serde_json::from_str(data)?;
        let chunk = chunk_from(payload);
        if summary.first_chunk_after.is_none() {
            summary.first_chunk_after = Some(started.elapsed());
        }
        summary.chunks += 1;
        if let Some(text) = &chunk.text {
            summary.text.push_str(text);
        }
        if chunk.block_reason.is_some() {
            summary.block_reason = chunk.block_reason.clone();
        }
        on_chunk(&chunk);
    }
    summary.elapsed = started.elapsed();
    Ok(summary)
}

fn generation_error(status: u16, body: &str) -> AskError {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string());
    let mut text = format!("generation failed: HTTP {status}: {message}");
    if let Some(hint) = failure_hint(status, &message) {
        text = format!("{text}\nHint: {hint}");
    }
    AskError::Generation(text)
}

pub fn failure_hint(status: u16, message: &str) -> Option<&'static str> {
    let lower = message.to_lowercase();
    if status == 401
        || status == 403
        || lower.contains("api key not valid")
        || lower.contains("permission denied")
        || lower.contains("authenticate")
    {
        return Some(
            "the API key may be invalid, expired or lack permissions. Reset the api_key line in \
config.yaml to \"INERT_API_KEY_PLACEHOLDER\" and re-run to activate again.",
        );
    }
    if status == 429 || lower.contains("quota") {
        return Some("quota exceeded; check your Google AI Studio usage limits.");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn sse_stream_collects_text_in_order() {
        let body = "data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"Hel\"}]}}]}\r\n\r\n\
data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"lo\"},{\"text\":\"!\"}]}}]}\n\n";
        let mut seen = Vec::new();
        let summary = read_sse_stream(Cursor::new(body), Instant::now(), &mut |chunk| {
            seen.push(chunk.text.clone())
        })
        .unwrap();
        assert_eq!(summary.text, "Hello!");
        assert_eq!(summary.chunks, 2);
        assert!(summary.first_chunk_after.is_some());
        assert_eq!(seen, vec![Some("Hel".to_string()), Some("lo!".to_string())]);
    }

    #[test]
    fn chunk_without_text_and_block_reason_are_reported() {
        let body = "data: {\"candidates\":[{\"finishReason\":\"SAFETY\"}],\"promptFeedback\":{\"blockReason\":\"SAFETY\"}}\n";
        let mut seen = Vec::new();
        let summary = read_sse_stream(Cursor::new(body), Instant::now(), &mut |chunk| {
            seen.push(chunk.clone())
        })
        .unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].text, None);
        assert_eq!(summary.block_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn malformed_event_is_an_error() {
        let result = read_sse_stream(Cursor::new("data: {not json\n"), Instant::now(), &mut |_| {});
        assert!(matches!(result, Err(AskError::Json(_))));
    }

    #[test]
    fn auth_failures_suggest_resetting_the_key() {
        let err = generation_error(
            400,
            r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#,
        );
        let text = err.to_string();
        assert!(text.contains("API key not valid"));
        assert!(text.contains("INERT_API_KEY_PLACEHOLDER"));
    }

    #[test]
    fn quota_and_unknown_failures() {
        assert!(failure_hint(429, "Resource exhausted")
            .unwrap()
            .contains("quota"));
        assert!(failure_hint(500, "internal").is_none());
    }

    #[test]
    fn slow_stream_outlives_request_timeout() {
        use std::io::{Read, Write};
        use std::net::TcpListener;
        use std::thread;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).unwrap();
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nConnection: close\r\n\r\n\
data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"slow \"}]}}]}\n\n",
                )
                .unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(1500));
            stream
                .write_all(b"data: {\"candidates\":[{\"content\":{\"parts\":[{\"text\":\"answer\"}]}}]}\n\n")
                .unwrap();
        });

        let client = GeminiClient::new(
            &format!("http://{addr}"),
            "gemini-test",
            Secret::new("k"),
            Duration::from_secs(1),
        );
        let summary = client.stream("q", &mut |_| {}).unwrap();
        server.join().unwrap();
        assert_eq!(summary.text, "slow answer");
        assert_eq!(summary.chunks, 2);
    }

    #[test]
    fn stream_url_targets_model() {
        let client = GeminiClient::new(
            "http://127.0.0.1:9/",
            "gemini-test",
            Secret::new("k"),
            Duration::from_secs(1),
        );
        assert_eq!(
            client.stream_url(),
            "http://127.0.0.1:9/v1beta/models/gemini-test:streamGenerateContent?alt=sse"
        );
    }
}
