//! Completion handles for asynchronously executed device operations.
//!
//! Every enqueued operation resolves one [`Event`]. An operation declares the events it
//! must wait for (its wait-list) and only starts once all of them have resolved; this is
//! the only ordering mechanism between operations.

use std::sync::{Arc, Mutex};

use futures::{
    FutureExt,
    future::{Shared, try_join_all},
};
use thiserror::Error;

use super::platform::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("operation was dropped before completion")]
    Canceled,
    #[error("operation failed: {0}")]
    Failed(Arc<str>),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId;

type EventFuture = Shared<BoxFuture<'static, Result<(), EventError>>>;

/// Marks the completion of one enqueued operation. Cloning shares the same completion.
#[derive(Clone)]
pub struct Event {
    id: uid::Id<EventId>,
    future: EventFuture,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("complete", &self.future.peek().is_some())
            .finish()
    }
}

impl Event {
    /// An event that has already completed.
    pub fn ready() -> Self {
        let id = uid::Id::new();
        let future = futures::future::ready(Ok(())).boxed().shared();
        Self { id, future }
    }

    /// Creates a pending event and the sender that resolves it.
    /// Dropping the sender without sending resolves the event as [`EventError::Canceled`].
    pub fn pending() -> (flume::Sender<Result<(), EventError>>, Self) {
        let (sender, receiver) = flume::bounded(1);
        let id = uid::Id::new();
        let future = async move {
            match receiver.recv_async().await {
                Ok(result) => result,
                Err(_) => Err(EventError::Canceled),
            }
        }
        .boxed()
        .shared();
        (sender, Self { id, future })
    }

    #[inline]
    pub fn id(&self) -> uid::Id<EventId> {
        self.id
    }

    /// Returns `true` if the operation has finished, successfully or not. Never blocks.
    pub fn is_complete(&self) -> bool {
        self.future.peek().is_some() || self.future.clone().now_or_never().is_some()
    }

    /// Waits for the operation to finish.
    pub async fn wait(&self) -> Result<(), EventError> {
        self.future.clone().await
    }

    /// Waits for every event of a wait-list. Fails with the first failure observed.
    pub async fn wait_all(events: impl IntoIterator<Item = Event>) -> Result<(), EventError> {
        let futures = events.into_iter().map(|event| event.future);
        try_join_all(futures).await.map(|_| ())
    }
}

/// Synchronization state of one device buffer.
///
/// Holds the completion of the last operation writing the buffer, plus the operations
/// reading it since. Readers wait for the last write; writers wait for the last write
/// and every outstanding read.
#[derive(Debug)]
pub struct Fence {
    write: Event,
    reads: Mutex<Vec<Event>>,
}

impl Fence {
    pub fn new(write: Event) -> Self {
        let reads = Mutex::new(Vec::new());
        Self { write, reads }
    }

    /// Completion of the operation that last wrote the buffer.
    #[inline]
    pub fn completion(&self) -> Event {
        self.write.clone()
    }

    /// Wait-list of an operation that reads the buffer.
    #[inline]
    pub fn read_list(&self) -> Vec<Event> {
        vec![self.write.clone()]
    }

    /// Wait-list of an operation that writes the buffer.
    pub fn write_list(&self) -> Vec<Event> {
        let reads = self.reads.lock().expect("failed to lock");
        std::iter::once(self.write.clone())
            .chain(reads.iter().cloned())
            .collect()
    }

    /// Records an enqueued operation reading the buffer.
    pub fn track_read(&self, event: Event) {
        let mut reads = self.reads.lock().expect("failed to lock");
        reads.retain(|event| !event.is_complete());
        reads.push(event);
    }

    /// Records an enqueued operation writing the buffer. It supersedes all prior accesses,
    /// since it was made to wait for them.
    pub fn track_write(&mut self, event: Event) {
        self.write = event;
        self.reads.get_mut().expect("failed to lock").clear();
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::{Event, EventError, Fence};

    #[tokio::test]
    async fn test_wait_all() -> Result<(), Box<dyn Error>> {
        let (sender_a, a) = Event::pending();
        let (sender_b, b) = Event::pending();
        assert!(!a.is_complete());

        let waiter = tokio::spawn(Event::wait_all([a.clone(), b.clone(), Event::ready()]));
        sender_b.send_async(Ok(())).await?;
        assert!(b.is_complete());
        assert!(!a.is_complete());

        sender_a.send_async(Ok(())).await?;
        waiter.await??;
        assert!(a.is_complete());
        Ok(())
    }

    #[tokio::test]
    async fn test_canceled() {
        let (sender, event) = Event::pending();
        drop(sender);
        assert_eq!(event.wait().await, Err(EventError::Canceled));
        assert_eq!(
            Event::wait_all([Event::ready(), event]).await,
            Err(EventError::Canceled)
        );
    }

    #[tokio::test]
    async fn test_fence() -> Result<(), Box<dyn Error>> {
        let (write, event) = Event::pending();
        let mut fence = Fence::new(event.clone());
        assert_eq!(fence.read_list().len(), 1);

        let (read, reader) = Event::pending();
        fence.track_read(reader.clone());
        let list = fence.write_list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[1].id(), reader.id());

        // completed reads are pruned on the next record
        write.send_async(Ok(())).await?;
        read.send_async(Ok(())).await?;
        fence.track_read(Event::ready());
        assert_eq!(fence.write_list().len(), 2);

        let next = Event::ready();
        fence.track_write(next.clone());
        assert_eq!(fence.write_list().len(), 1);
        assert_eq!(fence.completion().id(), next.id());
        Ok(())
    }
}
