//! Per-channel frame history backing the detector's utterance buffer.

use crate::audio::frame::AudioFrame;
use std::collections::VecDeque;

#[derive(Debug, Clone)]
struct StoredFrame {
    sequence: u64,
    channels: Vec<Vec<f32>>,
}

/// Samples taken out of the history for one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct HistorySpan {
    /// Concatenated samples per channel.
    pub channels: Vec<Vec<f32>>,
    /// Number of frames in the span.
    pub frame_count: usize,
    /// Frames preceding the trigger frame.
    pub pre_roll_frames: usize,
    pub first_sequence: u64,
    pub last_sequence: u64,
}

/// Frames retained since the last clear, with a start marker for the
/// current candidate utterance.
#[derive(Debug, Clone, Default)]
pub struct FrameHistory {
    frames: VecDeque<StoredFrame>,
    start: Option<usize>,
    pre_roll: usize,
}

impl FrameHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame's samples. The spectrum is not retained.
    pub fn push(&mut self, frame: AudioFrame) {
        self.frames.push_back(StoredFrame {
            sequence: frame.sequence,
            channels: frame.channels,
        });
    }

    /// Number of frames retained.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Drops the oldest frames until at most `max_frames` remain.
    ///
    /// Has no effect while an utterance is marked.
    pub fn trim_to(&mut self, max_frames: usize) {
        if self.start.is_some() {
            return;
        }
        while self.frames.len() > max_frames {
            self.frames.pop_front();
        }
    }

    /// Marks the newest frame as the speech trigger and sets the start marker
    /// `pre_roll` frames before it (clamped at the oldest retained frame).
    pub fn mark_start(&mut self, pre_roll: usize) {
        let trigger = self.frames.len().saturating_sub(1);
        let start = trigger.saturating_sub(pre_roll);
        self.pre_roll = trigger - start;
        self.start = Some(start);
    }

    /// Whether a start marker is set.
    pub fn is_marked(&self) -> bool {
        self.start.is_some()
    }

    /// Frames from the start marker to the newest frame, inclusive.
    pub fn frames_since_start(&self) -> usize {
        self.start.map_or(0, |start| self.frames.len() - start)
    }

    /// Removes the marked span and clears the history.
    ///
    /// Returns `None` if no start marker was set.
    pub fn take_span(&mut self) -> Option<HistorySpan> {
        let start = self.start?;
        let channel_count = self.frames.front().map_or(0, |f| f.channels.len());
        let marked: Vec<StoredFrame> = self.frames.drain(..).skip(start).collect();
        let pre_roll_frames = self.pre_roll;
        self.clear();

        let first_sequence = marked.first()?.sequence;
        let last_sequence = marked.last()?.sequence;
        let mut channels: Vec<Vec<f32>> = (0..channel_count)
            .map(|c| {
                Vec::with_capacity(
                    marked
                        .iter()
                        .map(|f| f.channels.get(c).map_or(0, Vec::len))
                        .sum(),
                )
            })
            .collect();
        for frame in &marked {
            for (out, samples) in channels.iter_mut().zip(&frame.channels) {
                out.extend_from_slice(samples);
            }
        }

        Some(HistorySpan {
            channels,
            frame_count: marked.len(),
            pre_roll_frames,
            first_sequence,
            last_sequence,
        })
    }

    /// Drops all frames and the start marker.
    pub fn clear(&mut self) {
        self.frames.clear();
        self.start = None;
        self.pre_roll = 0;
    }
}
