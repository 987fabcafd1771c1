//! Outbound work queue for a connection's write loop.
//!
//! Control frames (OPEN, rejections) are written first. After that, streams
//! with pending output take turns: each ready stream gets one frame per turn
//! and goes to the back of the queue if it has more.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use rivulet_core::{Frame, StreamId};
use tokio::sync::Notify;

#[derive(Debug)]
pub(crate) enum Work {
    Control(Frame),
    Stream(StreamId),
}

#[derive(Debug, Default)]
pub(crate) struct Outbox {
    state: Mutex<OutboxState>,
    wake: Notify,
}

#[derive(Debug, Default)]
struct OutboxState {
    control: VecDeque<Frame>,
    ready: VecDeque<StreamId>,
    queued: HashSet<StreamId>,
    closed: bool,
}

impl Outbox {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_control(&self, frame: Frame) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.control.push_back(frame);
        }
        self.wake.notify_one();
    }

    /// Schedule a turn for `stream_id`. A stream already waiting for its turn
    /// is not queued twice.
    pub(crate) fn mark_ready(&self, stream_id: StreamId) {
        {
            let mut state = self.state.lock();
            if state.closed || !state.queued.insert(stream_id) {
                return;
            }
            state.ready.push_back(stream_id);
        }
        self.wake.notify_one();
    }

    /// Next unit of work, or `None` once closed.
    pub(crate) async fn next(&self) -> Option<Work> {
        loop {
            let woken = self.wake.notified();
            tokio::pin!(woken);
            woken.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(frame) = state.control.pop_front() {
                    return Some(Work::Control(frame));
                }
                if let Some(stream_id) = state.ready.pop_front() {
                    state.queued.remove(&stream_id);
                    return Some(Work::Stream(stream_id));
                }
            }

            woken.await;
        }
    }

    pub(crate) fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.control.is_empty() && state.ready.is_empty()
    }

    pub(crate) fn close(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.control.clear();
            state.ready.clear();
            state.queued.clear();
        }
        self.wake.notify_one();
    }
}
