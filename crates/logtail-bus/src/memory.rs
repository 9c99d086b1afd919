//! In-process bus with a bounded, offset-addressed log per topic.
//!
//! Consumers start at the oldest retained message, so a watcher that joins
//! mid-build still sees the job's output from the beginning as long as it is
//! retained. A consumer that falls behind retention skips forward.
//!
//! Topics are reclaimed in two ways. A topic nothing was ever produced to is
//! dropped with its last consumer. Any topic with no consumer and no produce
//! for `topic_idle_ttl` is dropped by [`MemoryBus::reclaim_idle`], which the
//! reclaimer task runs periodically and topic creation runs when the
//! `max_topics` limit is reached.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::{BusError, BusMessage, LogBus, LogConsumer};

/// Tuning for [`MemoryBus`].
#[derive(Clone, Debug)]
pub struct MemoryBusConfig {
    /// Messages kept per topic before the oldest are evicted.
    pub retention_per_topic: usize,
    /// Topics held at once.
    pub max_topics: usize,
    /// Unused topics older than this are reclaimed.
    pub topic_idle_ttl: Duration,
}

impl Default for MemoryBusConfig {
    fn default() -> Self {
        Self {
            retention_per_topic: 10_000,
            max_topics: 10_000,
            topic_idle_ttl: Duration::from_secs(3600),
        }
    }
}

type TopicMap = DashMap<String, Arc<TopicLog>>;

#[derive(Clone, Copy, Debug, Default)]
struct Head {
    next_offset: u64,
    closed: bool,
}

struct Retained {
    first_offset: u64,
    messages: VecDeque<Bytes>,
}

enum Read {
    Found(u64, Bytes),
    Lagged(u64),
    Pending,
}

struct TopicLog {
    retained: Mutex<Retained>,
    head: watch::Sender<Head>,
    capacity: usize,
    last_active: Mutex<Instant>,
}

impl TopicLog {
    fn new(capacity: usize) -> Self {
        let (head, _) = watch::channel(Head::default());
        Self {
            retained: Mutex::new(Retained {
                first_offset: 0,
                messages: VecDeque::new(),
            }),
            head,
            capacity: capacity.max(1),
            last_active: Mutex::new(Instant::now()),
        }
    }

    fn append(&self, payload: Bytes) -> u64 {
        let next = {
            let mut retained = self.retained.lock();
            retained.messages.push_back(payload);
            while retained.messages.len() > self.capacity {
                let _ = retained.messages.pop_front();
                retained.first_offset += 1;
            }
            retained.first_offset + retained.messages.len() as u64
        };
        self.head.send_modify(|h| h.next_offset = next);
        next - 1
    }

    fn read(&self, offset: u64) -> Read {
        let retained = self.retained.lock();
        if offset < retained.first_offset {
            return Read::Lagged(retained.first_offset);
        }
        let index = usize::try_from(offset - retained.first_offset).unwrap_or(usize::MAX);
        match retained.messages.get(index) {
            Some(payload) => Read::Found(offset, payload.clone()),
            None => Read::Pending,
        }
    }

    fn first_offset(&self) -> u64 {
        self.retained.lock().first_offset
    }

    fn len(&self) -> usize {
        self.retained.lock().messages.len()
    }

    fn touch(&self) {
        *self.last_active.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_active.lock().elapsed()
    }

    fn close(&self) {
        self.head.send_modify(|h| h.closed = true);
    }

    fn is_closed(&self) -> bool {
        self.head.borrow().closed
    }
}

/// Retained in-process bus.
pub struct MemoryBus {
    topics: Arc<TopicMap>,
    config: MemoryBusConfig,
    closed: AtomicBool,
}

impl MemoryBus {
    pub fn new(config: MemoryBusConfig) -> Self {
        Self {
            topics: Arc::new(DashMap::new()),
            config,
            closed: AtomicBool::new(false),
        }
    }

    fn topic_log(&self, topic: &str) -> Result<Arc<TopicLog>, BusError> {
        if self.is_closed() {
            return Err(BusError::Closed);
        }
        let existing = self.topics.get(topic).map(|entry| Arc::clone(entry.value()));
        if let Some(log) = existing {
            log.touch();
            return Ok(log);
        }

        if self.topics.len() >= self.config.max_topics {
            let reclaimed = self.reclaim_idle();
            if self.topics.len() >= self.config.max_topics {
                warn!(topic, max_topics = self.config.max_topics, reclaimed, "topic limit reached");
                return Err(BusError::TopicUnavailable(format!(
                    "{topic}: limit of {} topics reached",
                    self.config.max_topics
                )));
            }
        }
        self.insert_topic(topic)
    }

    fn insert_topic(&self, topic: &str) -> Result<Arc<TopicLog>, BusError> {
        let log = Arc::clone(
            self.topics
                .entry(topic.to_owned())
                .or_insert_with(|| Arc::new(TopicLog::new(self.config.retention_per_topic)))
                .value(),
        );
        log.touch();
        // close() may have walked the map before this entry landed.
        if self.is_closed() {
            log.close();
            return Err(BusError::Closed);
        }
        Ok(log)
    }

    /// Drop every topic with no consumer that has been idle past
    /// `topic_idle_ttl`. Returns how many were dropped.
    pub fn reclaim_idle(&self) -> usize {
        let ttl = self.config.topic_idle_ttl;
        let mut reclaimed = 0;
        self.topics.retain(|topic, log| {
            // The map's own reference is the only one when nothing uses it.
            let keep = Arc::strong_count(log) > 1 || log.idle_for() < ttl;
            if !keep {
                reclaimed += 1;
                debug!(topic, retained = log.len(), "reclaimed idle topic");
            }
            keep
        });
        reclaimed
    }

    /// Run [`reclaim_idle`](Self::reclaim_idle) every `every` until the bus
    /// is closed or dropped.
    pub fn spawn_reclaimer(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let bus: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(every.max(Duration::from_millis(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let _ = tick.tick().await;
            loop {
                let _ = tick.tick().await;
                let Some(bus) = bus.upgrade() else { break };
                if bus.is_closed() {
                    break;
                }
                let reclaimed = bus.reclaim_idle();
                if reclaimed > 0 {
                    info!(reclaimed, remaining = bus.topic_count(), "reclaimed idle topics");
                }
            }
        })
    }

    /// Number of messages currently retained for `topic`.
    pub fn retained(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, |log| log.len())
    }

    /// Names of all live topics (sorted).
    pub fn topics(&self) -> Vec<String> {
        let mut names: Vec<String> = self.topics.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the bus. Pending and future consumes fail with [`BusError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for entry in self.topics.iter() {
            entry.value().close();
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new(MemoryBusConfig::default())
    }
}

#[async_trait]
impl LogBus for MemoryBus {
    async fn produce(&self, topic: &str, payload: Bytes) -> Result<(), BusError> {
        let log = self.topic_log(topic)?;
        let offset = log.append(payload);
        debug!(topic, offset, "produced");
        Ok(())
    }

    async fn new_consumer(&self, topic: &str) -> Result<Box<dyn LogConsumer>, BusError> {
        let log = self.topic_log(topic)?;
        let next_offset = log.first_offset();
        let head = log.head.subscribe();
        Ok(Box::new(MemoryConsumer {
            topic: topic.to_owned(),
            log,
            head,
            next_offset,
            topics: Arc::downgrade(&self.topics),
        }))
    }
}

/// Consumer over one [`MemoryBus`] topic.
pub struct MemoryConsumer {
    topic: String,
    log: Arc<TopicLog>,
    head: watch::Receiver<Head>,
    next_offset: u64,
    topics: Weak<TopicMap>,
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn consume(&mut self) -> Result<BusMessage, BusError> {
        loop {
            // Mark the current head as seen before reading, so an append that
            // lands after the read still wakes `changed()` below.
            let head = *self.head.borrow_and_update();
            match self.log.read(self.next_offset) {
                Read::Found(offset, payload) => {
                    self.next_offset = offset + 1;
                    return Ok(BusMessage {
                        topic: self.topic.clone(),
                        offset,
                        payload,
                    });
                }
                Read::Lagged(first) => {
                    warn!(
                        topic = %self.topic,
                        skipped = first - self.next_offset,
                        "consumer fell behind retention, skipping ahead"
                    );
                    self.next_offset = first;
                    continue;
                }
                Read::Pending => {}
            }
            if head.closed {
                return Err(BusError::Closed);
            }
            trace!(
                topic = %self.topic,
                waiting_at = self.next_offset,
                head = head.next_offset,
                "waiting for data"
            );
            if self.head.changed().await.is_err() {
                return Err(BusError::Closed);
            }
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let Some(topics) = self.topics.upgrade() else {
            return;
        };
        // Map + this consumer are the only holders of a topic nobody produced to.
        let removed = topics.remove_if(&self.topic, |_, log| {
            Arc::ptr_eq(log, &self.log) && Arc::strong_count(log) <= 2 && log.len() == 0
        });
        if removed.is_some() {
            debug!(topic = %self.topic, "dropped unused topic with its last consumer");
        }
    }
}
