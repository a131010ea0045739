//! End-to-end speech pipelines built on the detector and the ordered station.
//!
//! Recognition runs capture on a dedicated thread and everything downstream as
//! tokio tasks connected by bounded mpsc channels. Synthesis is fully async.

pub mod recognition;
pub mod sink;
pub mod synthesis;
pub mod types;

pub use recognition::RecognitionPipeline;
pub use sink::{AudioPlayer, CollectorPlayer};
pub use synthesis::{SynthesisHandle, SynthesisPipeline};
pub use types::{
    PipelineHandle, PlayedCallback, RecognitionEvent, SynthesisEvent, SynthesisRequest,
};
