//! Sequence-preserving reassembly of out-of-order completions.
//!
//! Items are submitted in order and resolved (completed or failed) in any
//! order. Resolved items are released strictly in submission order: a pending
//! head blocks everything behind it, a failed head is skipped.

use crate::error::{Result, SpeechflowError};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Handle identifying one submitted item.
///
/// Carries identity only; the queue owns the item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket {
    sequence: u64,
}

impl Ticket {
    /// Submission order of the item, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl std::fmt::Display for Ticket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.sequence)
    }
}

/// A failed item, reported in place of a delivery.
#[derive(Debug)]
pub struct ItemFailure {
    pub sequence: u64,
    pub cause: SpeechflowError,
}

/// Callback run with the payload just before it is handed to the sink.
pub type DeliveryCallback<T> = Box<dyn FnOnce(&T) + Send>;

/// Receiver of released items, in submission order.
pub trait DeliverySink<T> {
    /// Called once per successfully completed item.
    fn deliver(&mut self, sequence: u64, payload: T);

    /// Called once per failed item when the head reaches it.
    fn reject(&mut self, failure: ItemFailure);
}

enum Slot<T> {
    Pending,
    Ready(T),
    Failed(SpeechflowError),
}

struct QueueItem<T> {
    slot: Slot<T>,
    on_delivered: Option<DeliveryCallback<T>>,
}

/// Ordered store of in-flight items.
///
/// Items live in a deque indexed by `sequence - head`, so resolution and head
/// removal are O(1).
pub struct ReassemblyQueue<T, S: DeliverySink<T>> {
    items: VecDeque<QueueItem<T>>,
    head: u64,
    next: u64,
    sink: S,
}

impl<T, S: DeliverySink<T>> ReassemblyQueue<T, S> {
    /// Creates an empty queue releasing into `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            items: VecDeque::new(),
            head: 0,
            next: 0,
            sink,
        }
    }

    /// Appends a pending item and returns its ticket.
    pub fn submit(&mut self) -> Ticket {
        self.push(None)
    }

    /// Like [`submit`](Self::submit), running `on_delivered` when the item is released.
    pub fn submit_with(&mut self, on_delivered: impl FnOnce(&T) + Send + 'static) -> Ticket {
        self.push(Some(Box::new(on_delivered)))
    }

    fn push(&mut self, on_delivered: Option<DeliveryCallback<T>>) -> Ticket {
        let ticket = Ticket {
            sequence: self.next,
        };
        self.next += 1;
        self.items.push_back(QueueItem {
            slot: Slot::Pending,
            on_delivered,
        });
        debug!(sequence = ticket.sequence, pending = self.items.len(), "Item submitted");
        ticket
    }

    /// Marks the item ready with its payload and releases whatever became deliverable.
    pub fn complete(&mut self, ticket: Ticket, payload: T) -> Result<usize> {
        *self.pending_slot(ticket)? = Slot::Ready(payload);
        Ok(self.drain())
    }

    /// Marks the item failed and releases whatever became deliverable.
    pub fn fail(&mut self, ticket: Ticket, cause: SpeechflowError) -> Result<usize> {
        *self.pending_slot(ticket)? = Slot::Failed(cause);
        Ok(self.drain())
    }

    fn pending_slot(&mut self, ticket: Ticket) -> Result<&mut Slot<T>> {
        let sequence = ticket.sequence;
        if sequence >= self.next {
            return Err(SpeechflowError::UnknownTicket { sequence });
        }
        if sequence < self.head {
            return Err(SpeechflowError::TicketAlreadyResolved { sequence });
        }
        let index = (sequence - self.head) as usize;
        match self.items.get_mut(index) {
            Some(item) if matches!(item.slot, Slot::Pending) => Ok(&mut item.slot),
            Some(_) => Err(SpeechflowError::TicketAlreadyResolved { sequence }),
            None => Err(SpeechflowError::UnknownTicket { sequence }),
        }
    }

    /// Releases resolved items from the head until a pending one is reached.
    ///
    /// Returns the number of items released. Calling it again without new
    /// resolutions releases nothing.
    pub fn drain(&mut self) -> usize {
        let mut released = 0;
        while let Some(QueueItem { slot, on_delivered }) = self.items.pop_front() {
            let sequence = self.head;
            match slot {
                Slot::Pending => {
                    self.items.push_front(QueueItem {
                        slot: Slot::Pending,
                        on_delivered,
                    });
                    break;
                }
                Slot::Ready(payload) => {
                    if let Some(callback) = on_delivered {
                        callback(&payload);
                    }
                    debug!(sequence, "Item delivered");
                    self.sink.deliver(sequence, payload);
                }
                Slot::Failed(cause) => {
                    warn!(sequence, error = %cause, "Skipping failed item");
                    self.sink.reject(ItemFailure { sequence, cause });
                }
            }
            self.head += 1;
            released += 1;
        }
        released
    }

    /// True once every submitted item has been released.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Items submitted but not yet released.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Sequence the next submission will receive.
    pub fn next_sequence(&self) -> u64 {
        self.next
    }

    /// Sequence of the current head item, if any.
    pub fn head_sequence(&self) -> Option<u64> {
        (!self.items.is_empty()).then_some(self.head)
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

/// One released item, as recorded by [`CollectorSink`].
#[derive(Debug)]
pub enum Delivery<T> {
    Delivered { sequence: u64, payload: T },
    Failed(ItemFailure),
}

impl<T> Delivery<T> {
    pub fn sequence(&self) -> u64 {
        match self {
            Delivery::Delivered { sequence, .. } => *sequence,
            Delivery::Failed(failure) => failure.sequence,
        }
    }
}

/// Sink buffering released items until taken.
#[derive(Debug)]
pub struct CollectorSink<T> {
    released: Vec<Delivery<T>>,
}

impl<T> Default for CollectorSink<T> {
    fn default() -> Self {
        Self {
            released: Vec::new(),
        }
    }
}

impl<T> CollectorSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns everything released so far.
    pub fn take(&mut self) -> Vec<Delivery<T>> {
        std::mem::take(&mut self.released)
    }

    pub fn len(&self) -> usize {
        self.released.len()
    }

    pub fn is_empty(&self) -> bool {
        self.released.is_empty()
    }
}

impl<T> DeliverySink<T> for CollectorSink<T> {
    fn deliver(&mut self, sequence: u64, payload: T) {
        self.released.push(Delivery::Delivered { sequence, payload });
    }

    fn reject(&mut self, failure: ItemFailure) {
        self.released.push(Delivery::Failed(failure));
    }
}

/// Sink forwarding to a pair of closures.
pub struct CallbackSink<D, R> {
    on_deliver: D,
    on_reject: R,
}

impl<D, R> CallbackSink<D, R> {
    pub fn new(on_deliver: D, on_reject: R) -> Self {
        Self {
            on_deliver,
            on_reject,
        }
    }
}

impl<T, D, R> DeliverySink<T> for CallbackSink<D, R>
where
    D: FnMut(u64, T),
    R: FnMut(ItemFailure),
{
    fn deliver(&mut self, sequence: u64, payload: T) {
        (self.on_deliver)(sequence, payload);
    }

    fn reject(&mut self, failure: ItemFailure) {
        (self.on_reject)(failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn queue() -> ReassemblyQueue<&'static str, CollectorSink<&'static str>> {
        ReassemblyQueue::new(CollectorSink::new())
    }

    fn delivered(sink: &mut CollectorSink<&'static str>) -> Vec<&'static str> {
        sink.take()
            .into_iter()
            .filter_map(|d| match d {
                Delivery::Delivered { payload, .. } => Some(payload),
                Delivery::Failed(_) => None,
            })
            .collect()
    }

    fn failure(message: &str) -> SpeechflowError {
        SpeechflowError::Recognition {
            message: message.to_string(),
        }
    }

    #[test]
    fn test_submit_assigns_increasing_sequences() {
        let mut q = queue();
        let a = q.submit();
        let b = q.submit();
        let c = q.submit();
        assert_eq!((a.sequence(), b.sequence(), c.sequence()), (0, 1, 2));
        assert_eq!(q.len(), 3);
        assert_eq!(q.next_sequence(), 3);
        assert_eq!(q.head_sequence(), Some(0));
    }

    #[test]
    fn test_out_of_order_completion_delivers_in_order() {
        let mut q = queue();
        let a = q.submit();
        let b = q.submit();
        let c = q.submit();

        assert_eq!(q.complete(c, "C").unwrap(), 0);
        assert_eq!(q.complete(a, "A").unwrap(), 1);
        assert_eq!(delivered(q.sink_mut()), vec!["A"]);
        assert_eq!(q.complete(b, "B").unwrap(), 2);
        assert_eq!(delivered(q.sink_mut()), vec!["B", "C"]);
        assert!(q.is_empty());
    }

    #[test]
    fn test_failed_head_is_skipped() {
        let mut q = queue();
        let a = q.submit();
        let b = q.submit();

        q.fail(a, failure("boom")).unwrap();
        q.complete(b, "B").unwrap();

        let released = q.sink_mut().take();
        assert_eq!(released.len(), 2);
        match &released[0] {
            Delivery::Failed(f) => {
                assert_eq!(f.sequence, 0);
                assert_eq!(f.cause.to_string(), "Recognition failed: boom");
            }
            other => panic!("Expected failure, got {:?}", other),
        }
        assert!(matches!(released[1], Delivery::Delivered { sequence: 1, payload: "B" }));
    }

    #[test]
    fn test_pending_head_blocks_later_items() {
        let mut q = queue();
        let a = q.submit();
        let b = q.submit();

        q.complete(b, "B").unwrap();
        assert!(q.sink().is_empty());
        assert_eq!(q.drain(), 0);
        assert_eq!(q.drain(), 0);
        assert!(q.sink().is_empty());
        assert_eq!(q.len(), 2);
        assert_eq!(q.head_sequence(), Some(0));

        assert_eq!(q.complete(a, "A").unwrap(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_drain_is_idempotent() {
        let mut q = queue();
        let a = q.submit();
        q.complete(a, "A").unwrap();
        assert_eq!(q.sink().len(), 1);
        assert_eq!(q.drain(), 0);
        assert_eq!(q.drain(), 0);
        assert_eq!(q.sink().len(), 1);
    }

    #[test]
    fn test_double_resolution_is_rejected() {
        let mut q = queue();
        let a = q.submit();
        let b = q.submit();

        q.complete(b, "B").unwrap();
        assert!(matches!(
            q.complete(b, "B2"),
            Err(SpeechflowError::TicketAlreadyResolved { sequence: 1 })
        ));

        q.complete(a, "A").unwrap();
        assert!(matches!(
            q.fail(a, failure("late")),
            Err(SpeechflowError::TicketAlreadyResolved { sequence: 0 })
        ));
        assert_eq!(delivered(q.sink_mut()), vec!["A", "B"]);
    }

    #[test]
    fn test_foreign_ticket_is_unknown() {
        let mut other = queue();
        other.submit();
        other.submit();
        let foreign = other.submit();

        let mut q = queue();
        q.submit();
        assert!(matches!(
            q.complete(foreign, "X"),
            Err(SpeechflowError::UnknownTicket { sequence: 2 })
        ));
    }

    #[test]
    fn test_on_delivered_callback_runs_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut q = queue();

        let tickets: Vec<Ticket> = (0..3)
            .map(|_| {
                let seen = seen.clone();
                q.submit_with(move |payload: &&'static str| seen.lock().unwrap().push(*payload))
            })
            .collect();

        q.complete(tickets[2], "C").unwrap();
        q.complete(tickets[1], "B").unwrap();
        assert!(seen.lock().unwrap().is_empty());
        q.complete(tickets[0], "A").unwrap();

        assert_eq!(*seen.lock().unwrap(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_on_delivered_not_called_for_failed_item() {
        let called = Arc::new(Mutex::new(false));
        let mut q = queue();
        let flag = called.clone();
        let a = q.submit_with(move |_| *flag.lock().unwrap() = true);

        q.fail(a, failure("nope")).unwrap();
        assert!(!*called.lock().unwrap());
        assert!(q.is_empty());
    }

    #[test]
    fn test_every_permutation_of_four_delivers_in_order() {
        let payloads = ["A", "B", "C", "D"];
        let mut order = [0usize, 1, 2, 3];
        let mut permutations = vec![order];
        // Heap's algorithm, iterative
        let mut c = [0usize; 4];
        let mut i = 1;
        while i < 4 {
            if c[i] < i {
                if i % 2 == 0 {
                    order.swap(0, i);
                } else {
                    order.swap(c[i], i);
                }
                permutations.push(order);
                c[i] += 1;
                i = 1;
            } else {
                c[i] = 0;
                i += 1;
            }
        }
        assert_eq!(permutations.len(), 24);

        for permutation in permutations {
            let mut q = queue();
            let tickets: Vec<Ticket> = (0..4).map(|_| q.submit()).collect();
            for &index in &permutation {
                q.complete(tickets[index], payloads[index]).unwrap();
            }
            assert_eq!(delivered(q.sink_mut()), payloads.to_vec(), "order {:?}", permutation);
            assert!(q.is_empty());
        }
    }

    #[test]
    fn test_callback_sink_forwards() {
        let delivered = Arc::new(Mutex::new(Vec::new()));
        let rejected = Arc::new(Mutex::new(Vec::new()));
        let d = delivered.clone();
        let r = rejected.clone();
        let sink = CallbackSink::new(
            move |seq: u64, payload: String| d.lock().unwrap().push((seq, payload)),
            move |f: ItemFailure| r.lock().unwrap().push(f.sequence),
        );
        let mut q = ReassemblyQueue::new(sink);
        let a = q.submit();
        let b = q.submit();
        q.complete(b, "second".to_string()).unwrap();
        q.fail(a, failure("x")).unwrap();

        assert_eq!(*delivered.lock().unwrap(), vec![(1, "second".to_string())]);
        assert_eq!(*rejected.lock().unwrap(), vec![0]);
    }

    #[test]
    fn test_sequences_continue_after_drain() {
        let mut q = queue();
        let a = q.submit();
        q.complete(a, "A").unwrap();
        assert!(q.is_empty());
        assert_eq!(q.head_sequence(), None);

        let b = q.submit();
        assert_eq!(b.sequence(), 1);
        assert_eq!(q.head_sequence(), Some(1));
        q.complete(b, "B").unwrap();

        let released = q.into_sink().take();
        let sequences: Vec<u64> = released.iter().map(Delivery::sequence).collect();
        assert_eq!(sequences, vec![0, 1]);
    }

    #[test]
    fn test_ticket_display() {
        let mut q = queue();
        q.submit();
        let t = q.submit();
        assert_eq!(t.to_string(), "#1");
    }
}
