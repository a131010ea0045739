use crate::audio::vad::SpeechSegment;
use crate::error::{Result, SpeechflowError};
use crate::queue::RequestId;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Text recognized from one speech segment.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedText {
    pub text: String,
    /// Service confidence in `[0, 1]`, when reported.
    pub confidence: Option<f32>,
}

impl RecognizedText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
        }
    }
}

/// Trait for speech-to-text services.
///
/// Implementations own the transport; the pipeline only sees this boundary.
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognize the speech in an encoded segment.
    ///
    /// # Arguments
    /// * `segment` - Encoded PCM segment emitted by the detector
    /// * `locale` - Recognition locale such as `en-us`
    /// * `request_id` - Identity to send along with the request
    async fn recognize(
        &self,
        segment: &SpeechSegment,
        locale: &str,
        request_id: RequestId,
    ) -> Result<RecognizedText>;

    /// Name of the backing service.
    fn name(&self) -> &str;
}

/// Mock recognizer for testing.
///
/// Responses, failures and delays are chosen by call order.
#[derive(Debug)]
pub struct MockRecognizer {
    name: String,
    responses: Vec<String>,
    failing_calls: Vec<usize>,
    delays: Vec<Duration>,
    calls: AtomicUsize,
    locales: Mutex<Vec<String>>,
}

impl MockRecognizer {
    /// Create a new mock recognizer answering "mock recognition".
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            responses: vec!["mock recognition".to_string()],
            failing_calls: Vec::new(),
            delays: Vec::new(),
            calls: AtomicUsize::new(0),
            locales: Mutex::new(Vec::new()),
        }
    }

    /// Answer every call with `response`.
    pub fn with_response(mut self, response: &str) -> Self {
        self.responses = vec![response.to_string()];
        self
    }

    /// Answer the n-th call with the n-th response (the last one repeats).
    pub fn with_responses(mut self, responses: &[&str]) -> Self {
        self.responses = responses.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Fail the call with the given index (0-based).
    pub fn with_failure_on(mut self, call: usize) -> Self {
        self.failing_calls.push(call);
        self
    }

    /// Fail every call.
    pub fn with_failure(self) -> Self {
        self.with_failure_on(usize::MAX)
    }

    /// Delay the n-th call by the n-th duration (later calls are not delayed).
    pub fn with_delays(mut self, delays: &[Duration]) -> Self {
        self.delays = delays.to_vec();
        self
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Locales passed to each call, in call order.
    pub fn locales(&self) -> Vec<String> {
        self.locales.lock().map(|l| l.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn recognize(
        &self,
        segment: &SpeechSegment,
        locale: &str,
        _request_id: RequestId,
    ) -> Result<RecognizedText> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut locales) = self.locales.lock() {
            locales.push(locale.to_string());
        }

        if let Some(delay) = self.delays.get(call) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing_calls.contains(&call) || self.failing_calls.contains(&usize::MAX) {
            return Err(SpeechflowError::Recognition {
                message: format!("mock recognition failure on call {}", call),
            });
        }
        if segment.bytes.is_empty() {
            return Err(SpeechflowError::Recognition {
                message: "empty audio".to_string(),
            });
        }

        let text = self
            .responses
            .get(call)
            .or(self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(RecognizedText {
            text,
            confidence: Some(0.9),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::SegmentEnd;
    use crate::audio::wav::SegmentContainer;
    use std::sync::Arc;

    fn segment() -> SpeechSegment {
        SpeechSegment {
            bytes: vec![0u8; 64],
            container: SegmentContainer::Raw,
            sample_rate: 16000,
            channels: 1,
            frame_count: 1,
            pre_roll_frames: 0,
            first_sequence: 0,
            last_sequence: 0,
            end_reason: SegmentEnd::Silence,
        }
    }

    #[tokio::test]
    async fn test_mock_recognizer_returns_response() {
        let recognizer = MockRecognizer::new("mock").with_response("hello world");
        let result = recognizer
            .recognize(&segment(), "en-us", RequestId::new())
            .await
            .unwrap();
        assert_eq!(result.text, "hello world");
        assert_eq!(recognizer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_recognizer_responses_by_call_order() {
        let recognizer = MockRecognizer::new("mock").with_responses(&["one", "two"]);
        let s = segment();
        let mut texts = Vec::new();
        for _ in 0..3 {
            texts.push(recognizer.recognize(&s, "en-us", RequestId::new()).await.unwrap().text);
        }
        assert_eq!(texts, vec!["one", "two", "two"]);
    }

    #[tokio::test]
    async fn test_mock_recognizer_fails_selected_call() {
        let recognizer = MockRecognizer::new("mock").with_failure_on(1);
        let s = segment();
        assert!(recognizer.recognize(&s, "en-us", RequestId::new()).await.is_ok());
        match recognizer.recognize(&s, "en-us", RequestId::new()).await {
            Err(SpeechflowError::Recognition { message }) => {
                assert_eq!(message, "mock recognition failure on call 1");
            }
            other => panic!("Expected Recognition error, got {:?}", other),
        }
        assert!(recognizer.recognize(&s, "en-us", RequestId::new()).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_recognizer_with_failure_fails_everything() {
        let recognizer = MockRecognizer::new("mock").with_failure();
        assert!(recognizer.recognize(&segment(), "en-us", RequestId::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_recognizer_rejects_empty_audio() {
        let recognizer = MockRecognizer::new("mock");
        let mut s = segment();
        s.bytes.clear();
        assert!(recognizer.recognize(&s, "en-us", RequestId::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_mock_recognizer_records_locales() {
        let recognizer = MockRecognizer::new("mock");
        recognizer.recognize(&segment(), "de-de", RequestId::new()).await.unwrap();
        assert_eq!(recognizer.locales(), vec!["de-de".to_string()]);
    }

    #[tokio::test]
    async fn test_recognizer_trait_is_object_safe() {
        let recognizer: Arc<dyn Recognizer> =
            Arc::new(MockRecognizer::new("boxed").with_response("boxed test"));
        assert_eq!(recognizer.name(), "boxed");
        let result = recognizer
            .recognize(&segment(), "en-us", RequestId::new())
            .await
            .unwrap();
        assert_eq!(result.text, "boxed test");
    }

    #[test]
    fn test_recognized_text_new() {
        let text = RecognizedText::new("hi");
        assert_eq!(text.text, "hi");
        assert_eq!(text.confidence, None);
    }
}
