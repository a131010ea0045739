//! Ordered reassembly of concurrent request results.

pub mod ordered;
pub mod station;

pub use ordered::{
    CallbackSink, CollectorSink, Delivery, DeliveryCallback, DeliverySink, ItemFailure,
    ReassemblyQueue, Ticket,
};
pub use station::{DispatchConfig, Operation, OrderedStation, QueueEvent, RequestId};
