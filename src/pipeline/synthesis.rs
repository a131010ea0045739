//! Synthesis pipeline: text → SSML → ordered synthesis requests → decode → player.
//!
//! Requests are synthesized concurrently (or one at a time in serialized mode)
//! but always played in the order they were spoken.

use crate::audio::wav::{self, DecodedAudio};
use crate::config::Config;
use crate::error::{Result, SpeechflowError};
use crate::pipeline::sink::AudioPlayer;
use crate::pipeline::types::{PipelineHandle, PlayedCallback, SynthesisEvent, SynthesisRequest};
use crate::queue::{DispatchConfig, Operation, OrderedStation, QueueEvent, RequestId};
use crate::tts::{OutputFormat, Synthesizer, Voice, ssml};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info, warn};

/// One SSML document and the callback owed once its audio has played.
struct SynthesisJob {
    ssml: String,
    on_played: Option<PlayedCallback>,
}

/// Decoded audio travelling to the player with its callback.
struct Playback {
    audio: DecodedAudio,
    on_played: Option<PlayedCallback>,
}

impl std::fmt::Debug for Playback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Playback")
            .field("audio", &self.audio)
            .field("on_played", &self.on_played.is_some())
            .finish()
    }
}

/// Synthesizes one SSML document and decodes it for playback.
///
/// A failed job drops its callback with it.
struct SynthesizeOperation {
    synthesizer: Arc<dyn Synthesizer>,
    format: OutputFormat,
}

#[async_trait]
impl Operation<SynthesisJob, Playback> for SynthesizeOperation {
    fn name(&self) -> &'static str {
        "synthesize"
    }

    async fn run(&self, job: SynthesisJob, request_id: RequestId) -> Result<Playback> {
        let bytes = self
            .synthesizer
            .synthesize(&job.ssml, self.format, request_id)
            .await?;
        Ok(Playback {
            audio: wav::decode(&bytes, self.format)?,
            on_played: job.on_played,
        })
    }
}

/// Text-to-speech with in-order playback.
pub struct SynthesisPipeline {
    synthesizer: Arc<dyn Synthesizer>,
    voice: Voice,
    format: OutputFormat,
    dispatch: DispatchConfig,
}

impl SynthesisPipeline {
    pub fn new(synthesizer: Arc<dyn Synthesizer>) -> Self {
        Self {
            synthesizer,
            voice: Voice::default(),
            format: OutputFormat::default(),
            dispatch: DispatchConfig::default(),
        }
    }

    /// Builds the pipeline from the `[synthesis]` section.
    pub fn from_config(config: &Config, synthesizer: Arc<dyn Synthesizer>) -> Result<Self> {
        Ok(Self::new(synthesizer)
            .with_voice(config.synthesis.voice())
            .with_format(config.synthesis.output_format)
            .with_dispatch(DispatchConfig::for_synthesis(config)?))
    }

    /// Voice used for requests that do not carry their own.
    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.voice = voice;
        self
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_dispatch(mut self, dispatch: DispatchConfig) -> Self {
        self.dispatch = dispatch;
        self
    }

    /// Starts the pipeline. Must be called from within a tokio runtime.
    ///
    /// Dropping every [`SynthesisHandle`] (or calling
    /// [`PipelineHandle::stop`]) lets the pipeline finish the requests already
    /// accepted, after which the event channel closes.
    pub fn start<P: AudioPlayer>(
        self,
        player: P,
    ) -> (SynthesisHandle, mpsc::Receiver<SynthesisEvent>, PipelineHandle) {
        let buffer = self.dispatch.channel_buffer_size.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let stopped = Arc::new(Notify::new());

        let (request_tx, request_rx) = mpsc::channel::<SynthesisRequest>(buffer);
        let (job_tx, job_rx) = mpsc::channel::<SynthesisJob>(buffer);
        let (queue_tx, queue_rx) = mpsc::channel::<QueueEvent<Playback>>(buffer);
        let (event_tx, event_rx) = mpsc::channel::<SynthesisEvent>(buffer);

        info!(
            synthesizer = self.synthesizer.name(),
            format = %self.format,
            voice = %self.voice.name,
            "Synthesis pipeline starting"
        );

        let forwarder = tokio::spawn(forward_requests(
            request_rx,
            job_tx,
            self.voice,
            running.clone(),
            stopped.clone(),
        ));

        let operation: Arc<dyn Operation<SynthesisJob, Playback>> =
            Arc::new(SynthesizeOperation {
                synthesizer: self.synthesizer,
                format: self.format,
            });
        let station = OrderedStation::new(operation, self.dispatch);
        let station_task = tokio::spawn(station.run(job_rx, queue_tx));

        let player_task = tokio::spawn(play_in_order(player, queue_rx, event_tx));

        let handle = PipelineHandle::new(
            running.clone(),
            vec![forwarder, station_task, player_task],
            None,
        )
        .with_stop_signal(stopped);
        (
            SynthesisHandle {
                requests: request_tx,
                running,
            },
            event_rx,
            handle,
        )
    }
}

/// Submits text to a running [`SynthesisPipeline`].
#[derive(Clone)]
pub struct SynthesisHandle {
    requests: mpsc::Sender<SynthesisRequest>,
    running: Arc<AtomicBool>,
}

impl SynthesisHandle {
    /// Speaks `text` with the pipeline's default voice.
    pub async fn speak(&self, text: impl Into<String>) -> Result<()> {
        self.submit(SynthesisRequest::new(text)).await
    }

    /// Queues a request. Fails once the pipeline has stopped.
    ///
    /// A request accepted here is played (or reported as an error) even if
    /// the pipeline is stopped before it is synthesized.
    pub async fn submit(&self, request: SynthesisRequest) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(closed());
        }
        self.requests.send(request).await.map_err(|_| closed())
    }
}

fn closed() -> SpeechflowError {
    SpeechflowError::PipelineClosed {
        message: "synthesis pipeline is no longer accepting requests".to_string(),
    }
}

/// Turns requests into SSML jobs until every handle is dropped or the
/// pipeline is stopped. On stop, intake is closed and the requests already
/// buffered are still forwarded.
async fn forward_requests(
    mut requests: mpsc::Receiver<SynthesisRequest>,
    jobs: mpsc::Sender<SynthesisJob>,
    default_voice: Voice,
    running: Arc<AtomicBool>,
    stopped: Arc<Notify>,
) {
    let mut closing = false;
    loop {
        let received = tokio::select! {
            received = requests.recv() => received,
            _ = stopped.notified(), if !closing => {
                debug!("Closing synthesis intake");
                requests.close();
                closing = true;
                continue;
            }
        };
        let Some(request) = received else {
            break;
        };

        let voice = request.voice.as_ref().unwrap_or(&default_voice);
        let job = SynthesisJob {
            ssml: ssml::build(&request.text, voice),
            on_played: request.on_played,
        };
        if jobs.send(job).await.is_err() {
            break;
        }
    }
    running.store(false, Ordering::SeqCst);
}

/// Plays released audio in order and reports per-request outcomes.
async fn play_in_order<P: AudioPlayer>(
    mut player: P,
    mut queue: mpsc::Receiver<QueueEvent<Playback>>,
    events: mpsc::Sender<SynthesisEvent>,
) {
    while let Some(event) = queue.recv().await {
        let mapped = match event {
            QueueEvent::ActivityStarted => SynthesisEvent::NetworkActivityStarted,
            QueueEvent::ActivityEnded => SynthesisEvent::NetworkActivityEnded,
            QueueEvent::Submitted {
                sequence,
                request_id,
            } => SynthesisEvent::Queued {
                sequence,
                request_id,
            },
            QueueEvent::Delivered {
                sequence,
                request_id,
                payload: Playback { audio, on_played },
            } => match player.play(&audio).await {
                Ok(()) => {
                    debug!(sequence, player = player.name(), "Played");
                    if let Some(callback) = on_played {
                        callback();
                    }
                    SynthesisEvent::Played {
                        sequence,
                        request_id,
                        duration: audio.duration(),
                    }
                }
                Err(cause) => {
                    warn!(sequence, error = %cause, "Playback failed");
                    SynthesisEvent::Error {
                        cause,
                        sequence,
                        request_id,
                    }
                }
            },
            QueueEvent::Failed {
                sequence,
                request_id,
                cause,
            } => SynthesisEvent::Error {
                cause,
                sequence,
                request_id,
            },
        };
        if events.send(mapped).await.is_err() {
            break;
        }
    }
}
