//! Bounded message channels.
//!
//! A [`MessageChannel`] carries the messages of one direction of one call. It
//! is a bounded FIFO with a closed flag and an optional terminal error:
//!
//! - `push` suspends while the queue is full (backpressure)
//! - `pop` suspends while the queue is empty and the channel is open
//! - `close` forbids new pushes but keeps queued messages for the consumer
//! - `fail` closes and records an error that consumers see once drained
//!
//! Closing or failing wakes every suspended producer and consumer.

use std::collections::VecDeque;

use parking_lot::Mutex;
use rivulet_core::{Message, RpcError};
use tokio::sync::Notify;

/// Result of a non-suspending [`MessageChannel::try_pop`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryPop {
    Message(Message),
    /// Open but nothing queued.
    Empty,
    /// Closed and drained, with the terminal error if the channel failed.
    Closed(Option<RpcError>),
}

#[derive(Debug)]
pub struct MessageChannel {
    capacity: usize,
    state: Mutex<ChannelState>,
    /// Signalled when a message is queued or the channel closes.
    readable: Notify,
    /// Signalled when a message is taken or the channel closes.
    writable: Notify,
}

#[derive(Debug, Default)]
struct ChannelState {
    queue: VecDeque<Message>,
    closed: bool,
    error: Option<RpcError>,
}

impl MessageChannel {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(ChannelState {
                queue: VecDeque::with_capacity(capacity),
                ..Default::default()
            }),
            readable: Notify::new(),
            writable: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Queue a message, suspending while the channel is full.
    ///
    /// Fails with [`RpcError::ChannelClosed`] once closed, or with the terminal
    /// error once failed.
    pub async fn push(&self, message: Message) -> Result<(), RpcError> {
        loop {
            let writable = self.writable.notified();
            tokio::pin!(writable);
            // Register before checking so a wakeup between the check and the
            // await is not lost.
            writable.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(err) = &state.error {
                    return Err(err.clone());
                }
                if state.closed {
                    return Err(RpcError::ChannelClosed);
                }
                if state.queue.len() < self.capacity {
                    state.queue.push_back(message);
                    drop(state);
                    self.readable.notify_waiters();
                    return Ok(());
                }
            }

            writable.await;
        }
    }

    /// Take the next message, suspending while the channel is empty and open.
    ///
    /// Returns `Ok(None)` at end of stream. A failed channel still yields its
    /// queued messages before returning the terminal error.
    pub async fn pop(&self) -> Result<Option<Message>, RpcError> {
        loop {
            let readable = self.readable.notified();
            tokio::pin!(readable);
            readable.as_mut().enable();

            match self.try_pop() {
                TryPop::Message(message) => return Ok(Some(message)),
                TryPop::Closed(Some(err)) => return Err(err),
                TryPop::Closed(None) => return Ok(None),
                TryPop::Empty => {}
            }

            readable.await;
        }
    }

    pub fn try_pop(&self) -> TryPop {
        let mut state = self.state.lock();
        if let Some(message) = state.queue.pop_front() {
            drop(state);
            self.writable.notify_waiters();
            return TryPop::Message(message);
        }
        if state.closed {
            return TryPop::Closed(state.error.clone());
        }
        TryPop::Empty
    }

    /// Forbid further pushes. Idempotent; queued messages stay available.
    pub fn close(&self) {
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.wake_all();
    }

    /// Close with a terminal error. The first error recorded wins.
    pub fn fail(&self, err: RpcError) {
        {
            let mut state = self.state.lock();
            if state.error.is_none() {
                state.error = Some(err);
            }
            state.closed = true;
        }
        self.wake_all();
    }

    /// Close and drop everything queued. Used when nobody will read again.
    pub(crate) fn discard(&self) {
        {
            let mut state = self.state.lock();
            state.closed = true;
            state.queue.clear();
        }
        self.wake_all();
    }

    fn wake_all(&self) {
        self.readable.notify_waiters();
        self.writable.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn msg(payload: &'static str) -> Message {
        Message::new(1, payload)
    }

    #[tokio::test]
    async fn test_fifo_order() {
        let channel = MessageChannel::new(4);
        for p in ["a", "b", "c"] {
            channel.push(msg(p)).await.unwrap();
        }
        channel.close();

        let mut seen = Vec::new();
        while let Some(m) = channel.pop().await.unwrap() {
            seen.push(m.into_payload());
        }
        assert_eq!(seen, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_close_keeps_queued_messages() {
        let channel = MessageChannel::new(8);
        for p in ["1", "2", "3", "4", "5"] {
            channel.push(msg(p)).await.unwrap();
        }
        channel.close();
        channel.close();

        for _ in 0..5 {
            assert!(channel.pop().await.unwrap().is_some());
        }
        assert_eq!(channel.pop().await.unwrap(), None);
        assert_eq!(channel.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_after_close() {
        let channel = MessageChannel::new(1);
        channel.close();
        assert_eq!(channel.push(msg("late")).await, Err(RpcError::ChannelClosed));
    }

    #[tokio::test]
    async fn test_push_suspends_when_full() {
        let channel = Arc::new(MessageChannel::new(2));
        channel.push(msg("1")).await.unwrap();
        channel.push(msg("2")).await.unwrap();

        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.push(msg("3")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());
        assert_eq!(channel.len(), 2);

        assert_eq!(channel.pop().await.unwrap().unwrap().payload(), b"1");
        tokio::time::timeout(WAIT, producer)
            .await
            .expect("producer should resume after a pop")
            .unwrap()
            .unwrap();
        assert_eq!(channel.len(), 2);
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_consumer() {
        let channel = Arc::new(MessageChannel::new(2));
        let consumer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.close();

        let popped = tokio::time::timeout(WAIT, consumer).await.unwrap().unwrap();
        assert_eq!(popped, Ok(None));
    }

    #[tokio::test]
    async fn test_fail_wakes_blocked_producer() {
        let channel = Arc::new(MessageChannel::new(1));
        channel.push(msg("full")).await.unwrap();

        let producer = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.push(msg("blocked")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        channel.fail(RpcError::ConnectionLost);

        let pushed = tokio::time::timeout(WAIT, producer).await.unwrap().unwrap();
        assert_eq!(pushed, Err(RpcError::ConnectionLost));
    }

    #[tokio::test]
    async fn test_failed_channel_drains_then_errors() {
        let channel = MessageChannel::new(4);
        channel.push(msg("kept")).await.unwrap();
        channel.fail(RpcError::Cancelled);
        channel.fail(RpcError::ConnectionLost);

        assert_eq!(channel.pop().await.unwrap().unwrap().payload(), b"kept");
        assert_eq!(channel.pop().await, Err(RpcError::Cancelled));
        assert_eq!(channel.try_pop(), TryPop::Closed(Some(RpcError::Cancelled)));
    }

    #[tokio::test]
    async fn test_try_pop() {
        let channel = MessageChannel::new(2);
        assert_eq!(channel.try_pop(), TryPop::Empty);

        channel.push(msg("x")).await.unwrap();
        assert_eq!(channel.try_pop(), TryPop::Message(msg("x")));

        channel.close();
        assert_eq!(channel.try_pop(), TryPop::Closed(None));
    }

    #[tokio::test]
    async fn test_discard_drops_queue() {
        let channel = MessageChannel::new(2);
        channel.push(msg("x")).await.unwrap();
        channel.discard();
        assert!(channel.is_empty());
        assert_eq!(channel.pop().await, Ok(None));
    }
}
