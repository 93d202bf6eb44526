//! Frame stream plumbing
//!
//! One producer per request feeds a broadcast node; the original client
//! and any coalesced dedup subscribers each consume their own receiver.
//! A bounded replay buffer lets late subscribers catch up on frames
//! emitted before they attached. Reasoning steps carry a per-request
//! sequence number that only ever moves forward.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use wiki_agent_core::{Frame, StepPhase};

/// Producer half: emits frames to every subscriber
pub struct FrameSink {
    tx: broadcast::Sender<Frame>,
    replay: Mutex<VecDeque<Frame>>,
    replay_cap: usize,
    seq: AtomicU64,
}

impl FrameSink {
    /// Create a sink and the primary subscriber stream
    pub fn new(replay_cap: usize) -> (Arc<Self>, FrameStream) {
        let (tx, rx) = broadcast::channel(replay_cap.max(16));
        let sink = Arc::new(Self {
            tx,
            replay: Mutex::new(VecDeque::with_capacity(replay_cap)),
            replay_cap,
            seq: AtomicU64::new(0),
        });
        let stream = FrameStream {
            backlog: VecDeque::new(),
            rx,
        };
        (sink, stream)
    }

    /// Attach a late subscriber: buffered frames first, then live ones.
    /// Snapshot and subscription happen under the replay lock so no frame
    /// is duplicated or lost between them.
    pub fn subscribe(&self) -> FrameStream {
        let replay = self.replay.lock();
        let rx = self.tx.subscribe();
        let backlog: VecDeque<Frame> = replay.iter().cloned().collect();
        FrameStream { backlog, rx }
    }

    /// Emit a frame to all subscribers. Returns `false` when every
    /// receiver is gone, which the pipeline treats as client disconnect.
    pub fn emit(&self, frame: Frame) -> bool {
        let mut replay = self.replay.lock();
        if replay.len() == self.replay_cap {
            replay.pop_front();
        }
        replay.push_back(frame.clone());
        self.tx.send(frame).is_ok()
    }

    /// Emit a reasoning step with the next sequence number
    pub fn step(&self, phase: StepPhase, message: impl Into<String>) -> bool {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        self.emit(Frame::Step {
            seq,
            phase,
            message: message.into(),
        })
    }

    /// Steps emitted so far
    pub fn steps_emitted(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }
}

/// Consumer half: one subscriber's ordered view of the stream
#[derive(Debug)]
pub struct FrameStream {
    backlog: VecDeque<Frame>,
    rx: broadcast::Receiver<Frame>,
}

impl FrameStream {
    /// Next frame, or `None` when the stream is finished
    pub async fn next(&mut self) -> Option<Frame> {
        if let Some(frame) = self.backlog.pop_front() {
            return Some(frame);
        }
        loop {
            match self.rx.recv().await {
                Ok(frame) => return Some(frame),
                Err(broadcast::error::RecvError::Closed) => return None,
                // A lagged subscriber skips ahead rather than erroring
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Frame subscriber lagged");
                    continue;
                }
            }
        }
    }

    /// Drain the stream to completion, collecting every frame
    pub async fn collect_all(mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next().await {
            let terminal = frame.is_terminal();
            frames.push(frame);
            if terminal {
                break;
            }
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn steps_are_sequenced() {
        let (sink, mut stream) = FrameSink::new(64);
        assert!(sink.step(StepPhase::Analyzing, "analyzing"));
        assert!(sink.step(StepPhase::Retrieving, "retrieving"));

        match stream.next().await.unwrap() {
            Frame::Step { seq, phase, .. } => {
                assert_eq!(seq, 0);
                assert_eq!(phase, StepPhase::Analyzing);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        match stream.next().await.unwrap() {
            Frame::Step { seq, .. } => assert_eq!(seq, 1),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn late_subscriber_replays_buffered_frames() {
        let (sink, _primary) = FrameSink::new(64);
        sink.step(StepPhase::Analyzing, "analyzing");
        sink.emit(Frame::Token {
            text: "hello".into(),
        });

        let mut late = sink.subscribe();
        match late.next().await.unwrap() {
            Frame::Step { seq: 0, .. } => {}
            other => panic!("unexpected frame: {:?}", other),
        }
        match late.next().await.unwrap() {
            Frame::Token { text } => assert_eq!(text, "hello"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn replay_buffer_is_bounded() {
        let (sink, _primary) = FrameSink::new(4);
        for i in 0..10 {
            sink.emit(Frame::Token {
                text: format!("t{}", i),
            });
        }
        assert_eq!(sink.replay.lock().len(), 4);
        let mut late = sink.subscribe();
        match late.next().await.unwrap() {
            Frame::Token { text } => assert_eq!(text, "t6"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[tokio::test]
    async fn emit_reports_disconnect() {
        let (sink, stream) = FrameSink::new(64);
        assert!(sink.emit(Frame::Token { text: "a".into() }));
        drop(stream);
        assert!(!sink.emit(Frame::Token { text: "b".into() }));
    }
}
