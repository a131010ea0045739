//! Async dispatcher feeding a [`ReassemblyQueue`].
//!
//! Inputs are submitted to the queue the moment they arrive, then run as
//! independent tokio tasks. Completions come back to the station over a
//! channel, so the queue is only ever touched by the station's own task and
//! needs no lock. Results leave the station in submission order.

use crate::config::Config;
use crate::defaults;
use crate::error::{Result, SpeechflowError};
use crate::queue::ordered::{CollectorSink, Delivery, ReassemblyQueue, Ticket};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

/// Identity of one request, handed to the operation and echoed on its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Generates a random (v4) request id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An asynchronous request whose result must be released in submission order.
#[async_trait]
pub trait Operation<I, T>: Send + Sync {
    /// Short name used in logs and timeout errors.
    fn name(&self) -> &'static str;

    /// Runs one request.
    async fn run(&self, input: I, request_id: RequestId) -> Result<T>;
}

/// Dispatch policy of a station.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Requests allowed to run at once (`None` = unlimited, `Some(1)` = serialized).
    pub max_in_flight: Option<usize>,
    /// Converts a request that has not resolved in time into a failure.
    pub request_timeout: Option<Duration>,
    /// Capacity of the channels created around the station.
    pub channel_buffer_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_in_flight: None,
            request_timeout: None,
            channel_buffer_size: defaults::CHANNEL_BUFFER_SIZE,
        }
    }
}

impl DispatchConfig {
    /// One request at a time.
    pub fn serialized() -> Self {
        Self {
            max_in_flight: Some(1),
            ..Self::default()
        }
    }

    /// Creates the recognition dispatch policy from the `[recognition]` section.
    pub fn for_recognition(config: &Config) -> Result<Self> {
        let recognition = &config.recognition;
        Ok(Self {
            max_in_flight: (recognition.max_in_flight > 0).then_some(recognition.max_in_flight),
            request_timeout: recognition.timeout()?,
            ..Self::default()
        })
    }

    /// Creates the synthesis dispatch policy from the `[synthesis]` section.
    pub fn for_synthesis(config: &Config) -> Result<Self> {
        let synthesis = &config.synthesis;
        Ok(Self {
            max_in_flight: (!synthesis.parallel_requests).then_some(1),
            request_timeout: synthesis.timeout()?,
            ..Self::default()
        })
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = (max_in_flight > 0).then_some(max_in_flight);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

/// Events emitted by a station, in submission order for outcomes.
#[derive(Debug)]
pub enum QueueEvent<T> {
    /// The queue went from empty to non-empty.
    ActivityStarted,
    /// An input was accepted and assigned a sequence.
    Submitted { sequence: u64, request_id: RequestId },
    /// A result released in order.
    Delivered {
        sequence: u64,
        request_id: RequestId,
        payload: T,
    },
    /// A failed request, skipped in order.
    Failed {
        sequence: u64,
        request_id: RequestId,
        cause: SpeechflowError,
    },
    /// The queue drained back to empty.
    ActivityEnded,
}

struct Job<I> {
    ticket: Ticket,
    request_id: RequestId,
    input: I,
}

type Completion<T> = (Ticket, Result<T>);

/// Station dispatching inputs to an [`Operation`] and releasing results in order.
pub struct OrderedStation<I, T> {
    operation: Arc<dyn Operation<I, T>>,
    config: DispatchConfig,
}

impl<I, T> OrderedStation<I, T>
where
    I: Send + 'static,
    T: Send + 'static,
{
    pub fn new(operation: Arc<dyn Operation<I, T>>, config: DispatchConfig) -> Self {
        Self { operation, config }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs until `input` is closed and every submitted request was released.
    ///
    /// Stops early if `output` is dropped.
    pub async fn run(self, mut input: mpsc::Receiver<I>, output: mpsc::Sender<QueueEvent<T>>) {
        let mut queue = ReassemblyQueue::new(CollectorSink::new());
        let mut request_ids: HashMap<u64, RequestId> = HashMap::new();
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Completion<T>>();
        let (job_tx, job_rx) = mpsc::unbounded_channel::<Job<I>>();

        let dispatcher = tokio::spawn(dispatch(
            job_rx,
            self.operation.clone(),
            self.config.clone(),
            done_tx,
        ));

        let mut input_open = true;
        loop {
            if !input_open && queue.is_empty() {
                break;
            }

            tokio::select! {
                received = input.recv(), if input_open => {
                    let Some(item) = received else {
                        input_open = false;
                        continue;
                    };

                    let was_empty = queue.is_empty();
                    let ticket = queue.submit();
                    let request_id = RequestId::new();
                    request_ids.insert(ticket.sequence(), request_id);

                    if was_empty && output.send(QueueEvent::ActivityStarted).await.is_err() {
                        break;
                    }
                    let submitted = QueueEvent::Submitted {
                        sequence: ticket.sequence(),
                        request_id,
                    };
                    if output.send(submitted).await.is_err() {
                        break;
                    }
                    if job_tx.send(Job { ticket, request_id, input: item }).is_err() {
                        warn!("Dispatcher stopped, dropping request");
                        break;
                    }
                }
                Some((ticket, result)) = done_rx.recv() => {
                    let resolved = match result {
                        Ok(payload) => queue.complete(ticket, payload),
                        Err(cause) => queue.fail(ticket, cause),
                    };
                    if let Err(e) = resolved {
                        warn!(ticket = %ticket, error = %e, "Ignoring completion");
                        continue;
                    }

                    if !forward(queue.sink_mut().take(), &mut request_ids, &output).await {
                        break;
                    }
                    if queue.is_empty() && output.send(QueueEvent::ActivityEnded).await.is_err() {
                        break;
                    }
                }
            }
        }

        drop(job_tx);
        dispatcher.abort();
        debug!(name = self.operation.name(), "Station stopped");
    }
}

/// Sends released items to `output`. Returns false once the receiver is gone.
async fn forward<T>(
    released: Vec<Delivery<T>>,
    request_ids: &mut HashMap<u64, RequestId>,
    output: &mpsc::Sender<QueueEvent<T>>,
) -> bool {
    for delivery in released {
        let sequence = delivery.sequence();
        let request_id = request_ids.remove(&sequence).unwrap_or_default();
        let event = match delivery {
            Delivery::Delivered { sequence, payload } => QueueEvent::Delivered {
                sequence,
                request_id,
                payload,
            },
            Delivery::Failed(failure) => QueueEvent::Failed {
                sequence: failure.sequence,
                request_id,
                cause: failure.cause,
            },
        };
        if output.send(event).await.is_err() {
            return false;
        }
    }
    true
}

/// Starts jobs in submission order, holding back when `max_in_flight` are running.
async fn dispatch<I, T>(
    mut jobs: mpsc::UnboundedReceiver<Job<I>>,
    operation: Arc<dyn Operation<I, T>>,
    config: DispatchConfig,
    done: mpsc::UnboundedSender<Completion<T>>,
) where
    I: Send + 'static,
    T: Send + 'static,
{
    let semaphore = config.max_in_flight.map(|n| Arc::new(Semaphore::new(n)));

    while let Some(job) = jobs.recv().await {
        let permit = match &semaphore {
            Some(semaphore) => match semaphore.clone().acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        tokio::spawn(execute(
            job,
            operation.clone(),
            config.request_timeout,
            permit,
            done.clone(),
        ));
    }
}

async fn execute<I, T>(
    job: Job<I>,
    operation: Arc<dyn Operation<I, T>>,
    timeout: Option<Duration>,
    permit: Option<OwnedSemaphorePermit>,
    done: mpsc::UnboundedSender<Completion<T>>,
) where
    I: Send + 'static,
    T: Send + 'static,
{
    let Job {
        ticket,
        request_id,
        input,
    } = job;
    let name = operation.name();
    debug!(operation = name, ticket = %ticket, %request_id, "Request started");

    let mut handle = tokio::spawn(async move { operation.run(input, request_id).await });

    let joined = match timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                warn!(operation = name, ticket = %ticket, "Request timed out");
                let _ = done.send((
                    ticket,
                    Err(SpeechflowError::OperationTimeout {
                        operation: name.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    }),
                ));
                return;
            }
        },
        None => handle.await,
    };

    let result = joined.unwrap_or_else(|e| {
        Err(SpeechflowError::OperationPanicked {
            operation: name.to_string(),
            message: e.to_string(),
        })
    });

    drop(permit);
    let _ = done.send((ticket, result));
}
