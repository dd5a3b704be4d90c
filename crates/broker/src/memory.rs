//! In-memory broker for testing.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, mpsc};

use crate::delivery::{
    Acknowledger, ConsumeOptions, Delivery, MessageBroker, SessionHandle, Subscription,
};
use crate::error::{BrokerError, Result};

#[derive(Debug, Clone)]
struct StoredMessage {
    body: Vec<u8>,
    redelivered: bool,
}

#[derive(Debug)]
struct InFlight {
    queue: String,
    message: StoredMessage,
    session: u64,
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    queues: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<u64, InFlight>,
    acked: Vec<Vec<u8>>,
    discarded: Vec<Vec<u8>>,
    next_tag: u64,
    next_session: u64,
    live_sessions: Vec<u64>,
    connect_failures: u32,
    connect_attempts: u32,
}

/// In-memory queue broker with manual acknowledgement and prefetch.
///
/// Models the broker behaviors the worker depends on: deliveries left
/// unsettled when a connection drops are requeued and flagged as
/// redelivered, and at most `prefetch` deliveries are outstanding per
/// subscription.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<InMemoryBrokerState>>,
    notify: Arc<Notify>,
}

impl InMemoryBroker {
    /// Creates an empty broker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` subscribe calls fail with a connection error.
    pub fn fail_next_connects(&self, count: u32) {
        self.state.lock().unwrap().connect_failures = count;
    }

    /// Number of subscribe attempts seen so far, failed ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.state.lock().unwrap().connect_attempts
    }

    /// Simulates the broker dropping every open connection.
    pub fn drop_connections(&self) {
        let mut state = self.state.lock().unwrap();
        state.live_sessions.clear();
        requeue_orphans(&mut state);
        drop(state);
        self.notify.notify_waiters();
    }

    /// Messages still waiting in `queue`.
    pub fn queued(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map_or(0, VecDeque::len)
    }

    /// Bodies of all acknowledged messages, in settlement order.
    pub fn acked(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().acked.clone()
    }

    /// Bodies of all discarded messages, in settlement order.
    pub fn discarded(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().discarded.clone()
    }

    /// Number of delivered but unsettled messages.
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight.len()
    }

    fn take_next(&self, queue: &str, session: u64) -> Option<Result<(u64, StoredMessage)>> {
        let mut state = self.state.lock().unwrap();
        if !state.live_sessions.contains(&session) {
            return Some(Err(BrokerError::ChannelClosed));
        }
        let message = state.queues.get_mut(queue)?.pop_front()?;
        state.next_tag += 1;
        let tag = state.next_tag;
        state.in_flight.insert(
            tag,
            InFlight {
                queue: queue.to_string(),
                message: message.clone(),
                session,
            },
        );
        Some(Ok((tag, message)))
    }

    fn is_live(&self, session: u64) -> bool {
        self.state.lock().unwrap().live_sessions.contains(&session)
    }

    fn retire(&self, session: u64) {
        let mut state = self.state.lock().unwrap();
        state.live_sessions.retain(|s| *s != session);
        requeue_orphans(&mut state);
        drop(state);
        self.notify.notify_waiters();
    }

    async fn pump(
        self,
        queue: String,
        session: u64,
        limit: Arc<Semaphore>,
        tx: mpsc::Sender<Delivery>,
    ) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Ok(permit) = limit.clone().try_acquire_owned() {
                match self.take_next(&queue, session) {
                    Some(Ok((tag, message))) => {
                        let delivery = Delivery::new(
                            tag,
                            message.body,
                            message.redelivered,
                            Box::new(InMemoryAcker {
                                broker: self.clone(),
                                session,
                                permit: Mutex::new(Some(permit)),
                            }),
                        );
                        if tx.send(delivery).await.is_err() {
                            self.retire(session);
                            return;
                        }
                        continue;
                    }
                    Some(Err(_)) => return,
                    None => drop(permit),
                }
            } else if !self.is_live(session) {
                return;
            }

            tokio::select! {
                () = &mut notified => {}
                () = tx.closed() => {
                    self.retire(session);
                    return;
                }
            }
        }
    }

    fn settle(&self, delivery_tag: u64, session: u64, outcome: Settlement) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        let owned = state
            .in_flight
            .get(&delivery_tag)
            .is_some_and(|f| f.session == session);
        if !owned || !state.live_sessions.contains(&session) {
            return Err(BrokerError::Acknowledge {
                delivery_tag,
                reason: "unknown delivery tag on this channel".to_string(),
            });
        }
        let Some(entry) = state.in_flight.remove(&delivery_tag) else {
            return Err(BrokerError::ChannelClosed);
        };
        match outcome {
            Settlement::Ack => state.acked.push(entry.message.body),
            Settlement::Discard => state.discarded.push(entry.message.body),
            Settlement::Requeue => state
                .queues
                .entry(entry.queue)
                .or_default()
                .push_front(StoredMessage {
                    body: entry.message.body,
                    redelivered: true,
                }),
        }
        Ok(())
    }
}

fn requeue_orphans(state: &mut InMemoryBrokerState) {
    let live = state.live_sessions.clone();
    let mut orphaned: Vec<u64> = state
        .in_flight
        .iter()
        .filter(|(_, f)| !live.contains(&f.session))
        .map(|(tag, _)| *tag)
        .collect();
    orphaned.sort_unstable_by(|a, b| b.cmp(a));
    for tag in orphaned {
        if let Some(entry) = state.in_flight.remove(&tag) {
            state
                .queues
                .entry(entry.queue)
                .or_default()
                .push_front(StoredMessage {
                    body: entry.message.body,
                    redelivered: true,
                });
        }
    }
}

enum Settlement {
    Ack,
    Discard,
    Requeue,
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn publish(&self, queue: &str, body: &[u8]) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(StoredMessage {
                body: body.to_vec(),
                redelivered: false,
            });
        self.notify.notify_waiters();
        Ok(())
    }

    async fn subscribe(&self, queue: &str, options: ConsumeOptions) -> Result<Subscription> {
        let (session, pending) = {
            let mut state = self.state.lock().unwrap();
            state.connect_attempts += 1;
            if state.connect_failures > 0 {
                state.connect_failures -= 1;
                return Err(BrokerError::Connection("connection refused".to_string()));
            }
            state.next_session += 1;
            let session = state.next_session;
            state.live_sessions.push(session);
            let pending = state.queues.entry(queue.to_string()).or_default().len();
            (session, u32::try_from(pending).unwrap_or(u32::MAX))
        };

        let (tx, rx) = mpsc::channel(options.buffer.max(1));
        let limit = Arc::new(Semaphore::new(usize::from(options.prefetch.max(1))));
        tokio::spawn(self.clone().pump(queue.to_string(), session, limit, tx));

        Ok(Subscription::new(
            queue,
            pending,
            rx,
            Box::new(InMemorySession {
                broker: self.clone(),
                session,
            }),
        ))
    }
}

struct InMemoryAcker {
    broker: InMemoryBroker,
    session: u64,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl InMemoryAcker {
    fn release(&self) {
        self.permit.lock().unwrap().take();
    }
}

#[async_trait]
impl Acknowledger for InMemoryAcker {
    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        let result = self.broker.settle(delivery_tag, self.session, Settlement::Ack);
        self.release();
        self.broker.notify.notify_waiters();
        result
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<()> {
        let outcome = if requeue {
            Settlement::Requeue
        } else {
            Settlement::Discard
        };
        let result = self.broker.settle(delivery_tag, self.session, outcome);
        self.release();
        self.broker.notify.notify_waiters();
        result
    }
}

struct InMemorySession {
    broker: InMemoryBroker,
    session: u64,
}

#[async_trait]
impl SessionHandle for InMemorySession {
    async fn close(&self) -> Result<()> {
        self.broker.retire(self.session);
        Ok(())
    }
}
