//! Recognition pipeline: frame source → detector → ordered recognition requests.
//!
//! ```text
//! capture thread ──frames──▶ detector task ──segments──▶ OrderedStation ──▶ event mapper
//!                                 │                                             │
//!                                 └───────────── RecognitionEvent ◀─────────────┘
//! ```

use crate::audio::frame::{AudioFrame, AudioFrameSource};
use crate::audio::vad::{SpeechSegment, VadEvent, VoiceActivityDetector};
use crate::config::Config;
use crate::error::Result;
use crate::pipeline::types::{PipelineHandle, RecognitionEvent};
use crate::queue::{DispatchConfig, Operation, OrderedStation, QueueEvent, RequestId};
use crate::stt::{RecognizedText, Recognizer};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

/// Adapts a [`Recognizer`] to the station's operation interface.
struct RecognizeOperation {
    recognizer: Arc<dyn Recognizer>,
    locale: String,
}

#[async_trait]
impl Operation<SpeechSegment, RecognizedText> for RecognizeOperation {
    fn name(&self) -> &'static str {
        "recognize"
    }

    async fn run(&self, segment: SpeechSegment, request_id: RequestId) -> Result<RecognizedText> {
        self.recognizer
            .recognize(&segment, &self.locale, request_id)
            .await
    }
}

/// Continuous speech recognition over a frame source.
pub struct RecognitionPipeline {
    detector: VoiceActivityDetector,
    recognizer: Arc<dyn Recognizer>,
    locale: String,
    dispatch: DispatchConfig,
}

impl RecognitionPipeline {
    pub fn new(detector: VoiceActivityDetector, recognizer: Arc<dyn Recognizer>) -> Self {
        Self {
            detector,
            recognizer,
            locale: crate::defaults::DEFAULT_LOCALE.to_string(),
            dispatch: DispatchConfig::default(),
        }
    }

    /// Builds the pipeline from the `[capture]`, `[vad]` and `[recognition]` sections.
    pub fn from_config(config: &Config, recognizer: Arc<dyn Recognizer>) -> Result<Self> {
        Ok(Self::new(VoiceActivityDetector::from_config(config), recognizer)
            .with_locale(&config.recognition.locale)
            .with_dispatch(DispatchConfig::for_recognition(config)?))
    }

    pub fn with_locale(mut self, locale: &str) -> Self {
        self.locale = locale.to_string();
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Starts capture on a dedicated thread and the remaining stages as tokio tasks.
    ///
    /// Must be called from within a tokio runtime. The event channel closes once
    /// the source is exhausted (or the pipeline stopped) and every request resolved.
    pub fn start<S>(self, source: S) -> (mpsc::Receiver<RecognitionEvent>, PipelineHandle)
    where
        S: AudioFrameSource + 'static,
    {
        let buffer = self.dispatch.channel_buffer_size.max(1);
        let running = Arc::new(AtomicBool::new(true));

        let (frame_tx, frame_rx) = mpsc::channel::<Result<AudioFrame>>(buffer);
        let (segment_tx, segment_rx) = mpsc::channel::<SpeechSegment>(buffer);
        let (queue_tx, queue_rx) = mpsc::channel::<QueueEvent<RecognizedText>>(buffer);
        let (event_tx, event_rx) = mpsc::channel::<RecognitionEvent>(buffer);

        info!(
            recognizer = self.recognizer.name(),
            locale = %self.locale,
            "Recognition pipeline starting"
        );

        let capture = spawn_capture(source, frame_tx, running.clone());

        let detector_task = tokio::spawn(run_detector(
            self.detector,
            frame_rx,
            segment_tx,
            event_tx.clone(),
        ));

        let operation: Arc<dyn Operation<SpeechSegment, RecognizedText>> =
            Arc::new(RecognizeOperation {
                recognizer: self.recognizer,
                locale: self.locale,
            });
        let station = OrderedStation::new(operation, self.dispatch);
        let station_task = tokio::spawn(station.run(segment_rx, queue_tx));

        let mapper_task = tokio::spawn(forward_queue_events(queue_rx, event_tx));

        let handle = PipelineHandle::new(
            running,
            vec![detector_task, station_task, mapper_task],
            Some(capture),
        );
        (event_rx, handle)
    }
}

/// Pulls frames on a dedicated thread until stopped, exhausted or failed.
///
/// A source failure is passed down the frame channel as the last item.
fn spawn_capture<S>(
    mut source: S,
    frames: mpsc::Sender<Result<AudioFrame>>,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()>
where
    S: AudioFrameSource + 'static,
{
    thread::spawn(move || {
        while running.load(Ordering::SeqCst) {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    if frames.blocking_send(Ok(frame)).is_err() {
                        break;
                    }
                }
                Ok(None) => {
                    debug!("Frame source exhausted");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Frame capture failed");
                    let _ = frames.blocking_send(Err(e));
                    break;
                }
            }
        }
        running.store(false, Ordering::SeqCst);
    })
}

/// Runs the detector over incoming frames and submits finished segments.
async fn run_detector(
    mut detector: VoiceActivityDetector,
    mut frames: mpsc::Receiver<Result<AudioFrame>>,
    segments: mpsc::Sender<SpeechSegment>,
    events: mpsc::Sender<RecognitionEvent>,
) {
    while let Some(captured) = frames.recv().await {
        let frame = match captured {
            Ok(frame) => frame,
            Err(cause) => {
                let _ = events
                    .send(RecognitionEvent::Error {
                        cause,
                        sequence: None,
                        request_id: None,
                    })
                    .await;
                break;
            }
        };
        let sequence = frame.sequence;
        match detector.process(frame) {
            Ok(Some(VadEvent::SpeechStart { sequence })) => {
                let _ = events
                    .send(RecognitionEvent::VoiceDetected {
                        frame_sequence: sequence,
                    })
                    .await;
            }
            Ok(Some(VadEvent::SpeechEnd(segment))) => {
                if !submit(segment, &segments, &events).await {
                    return;
                }
            }
            Ok(None) => {}
            Err(cause) => {
                error!(sequence, error = %cause, "Frame rejected by detector");
                let _ = events
                    .send(RecognitionEvent::Error {
                        cause,
                        sequence: None,
                        request_id: None,
                    })
                    .await;
            }
        }
    }

    match detector.flush() {
        Ok(Some(segment)) => {
            submit(segment, &segments, &events).await;
        }
        Ok(None) => {}
        Err(cause) => {
            let _ = events
                .send(RecognitionEvent::Error {
                    cause,
                    sequence: None,
                    request_id: None,
                })
                .await;
        }
    }
}

async fn submit(
    segment: SpeechSegment,
    segments: &mpsc::Sender<SpeechSegment>,
    events: &mpsc::Sender<RecognitionEvent>,
) -> bool {
    let _ = events
        .send(RecognitionEvent::VoiceEnded {
            first_frame: segment.first_sequence,
            last_frame: segment.last_sequence,
            frame_count: segment.frame_count,
            end_reason: segment.end_reason,
        })
        .await;
    segments.send(segment).await.is_ok()
}

/// Translates station output into recognition events.
async fn forward_queue_events(
    mut queue: mpsc::Receiver<QueueEvent<RecognizedText>>,
    events: mpsc::Sender<RecognitionEvent>,
) {
    while let Some(event) = queue.recv().await {
        let mapped = match event {
            QueueEvent::ActivityStarted => RecognitionEvent::NetworkActivityStarted,
            QueueEvent::ActivityEnded => RecognitionEvent::NetworkActivityEnded,
            QueueEvent::Submitted { .. } => continue,
            QueueEvent::Delivered {
                sequence,
                request_id,
                payload,
            } => RecognitionEvent::Text {
                sequence,
                request_id,
                result: payload,
            },
            QueueEvent::Failed {
                sequence,
                request_id,
                cause,
            } => RecognitionEvent::Error {
                cause,
                sequence: Some(sequence),
                request_id: Some(request_id),
            },
        };
        if events.send(mapped).await.is_err() {
            break;
        }
    }
}
