use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, channel};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::discovery::{
    DiscoveryOptions, DiscoveryResponse, DiscoveryService, RelationshipStats, ServiceError,
};

pub const STATISTICS_KEY: &str = "statistics";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 250 }
    }
}

impl RetryPolicy {
    // Exponential backoff: base, 2x base, 4x base, ...
    fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.base_delay_ms << attempt.saturating_sub(1).min(16))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DebouncePolicy {
    pub search_quiet_ms: u64,
}

impl Default for DebouncePolicy {
    fn default() -> Self {
        Self { search_quiet_ms: 300 }
    }
}

// What the session reacts to when it drains the lifecycle each tick.
#[derive(Debug)]
pub enum LifecycleEvent {
    DiscoveryReady { key: String, response: DiscoveryResponse },
    DiscoveryFailed { key: String, error: String, recoverable: bool },
    StatisticsReady(RelationshipStats),
    StatisticsFailed(String),
    SearchFired(String),
}

enum WorkerResult {
    Discovery(Result<DiscoveryResponse, ServiceError>),
    Statistics(Result<RelationshipStats, ServiceError>),
}

struct WorkerMsg {
    key: String,
    generation: Uuid,
    attempt: u32,
    result: WorkerResult,
}

struct InFlight {
    generation: Uuid,
    resource_type: String,
    resource_id: String,
    opts: DiscoveryOptions,
}

struct PendingRetry {
    key: String,
    generation: Uuid,
    attempt: u32,
    due: Instant,
}

// Cancellation/dedup/retry wrapper around the discovery collaborator.
//
// Service calls run on detached worker threads and report back over an mpsc
// channel the session drains once per tick (the same broker shape the GUI
// uses for any cross-thread work). Cancellation is cooperative: each request
// carries a generation id, and a response whose generation no longer matches
// the in-flight table is dropped on the floor - a cancelled request can
// therefore never mutate state, no matter how late it lands.
pub struct RequestLifecycle {
    service: Arc<dyn DiscoveryService>,
    tx: Sender<WorkerMsg>,
    rx: Receiver<WorkerMsg>,
    retry: RetryPolicy,
    debounce: DebouncePolicy,
    inflight: HashMap<String, InFlight>,
    retries: Vec<PendingRetry>,
    // The one discovery key allowed to be outstanding; a new key cancels it.
    current_discovery: Option<String>,
    pending_search: Option<(String, Instant)>,
    active: bool,
}

impl RequestLifecycle {
    pub fn new(
        service: Arc<dyn DiscoveryService>,
        retry: RetryPolicy,
        debounce: DebouncePolicy,
    ) -> Self {
        let (tx, rx) = channel();
        Self {
            service,
            tx,
            rx,
            retry,
            debounce,
            inflight: HashMap::new(),
            retries: Vec::new(),
            current_discovery: None,
            pending_search: None,
            active: true,
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inflight.contains_key(key)
    }

    pub fn has_pending_work(&self) -> bool {
        !self.inflight.is_empty() || !self.retries.is_empty() || self.pending_search.is_some()
    }

    // Kick off discovery for one resource. At most one request per key may be
    // outstanding: a repeat while pending is suppressed (not queued), and a
    // request for a different resource cancels whatever was running.
    // Returns whether a new request was actually started.
    pub fn start_discovery(
        &mut self,
        resource_type: &str,
        resource_id: &str,
        opts: DiscoveryOptions,
    ) -> bool {
        if !self.active {
            return false;
        }
        let key = format!("{resource_type}/{resource_id}");
        if self.inflight.contains_key(&key) {
            log::debug!("discovery for {key} already pending; suppressing duplicate");
            return false;
        }
        if let Some(prev) = self.current_discovery.take()
            && prev != key
        {
            self.cancel(&prev);
        }

        let generation = Uuid::now_v7();
        self.inflight.insert(
            key.clone(),
            InFlight {
                generation,
                resource_type: resource_type.to_string(),
                resource_id: resource_id.to_string(),
                opts,
            },
        );
        self.current_discovery = Some(key.clone());
        self.spawn_discovery(&key, generation, 1);
        true
    }

    pub fn request_statistics(&mut self) -> bool {
        if !self.active || self.inflight.contains_key(STATISTICS_KEY) {
            return false;
        }
        let generation = Uuid::now_v7();
        self.inflight.insert(
            STATISTICS_KEY.to_string(),
            InFlight {
                generation,
                resource_type: String::new(),
                resource_id: String::new(),
                opts: DiscoveryOptions::default(),
            },
        );
        self.spawn_statistics(generation, 1);
        true
    }

    // Debounced free-text search: every keystroke restarts the quiet period;
    // the search fires once input has been calm for the configured window.
    pub fn set_search_text(&mut self, text: &str, now: Instant) {
        if !self.active {
            return;
        }
        let text = text.trim();
        if text.is_empty() {
            self.pending_search = None;
            return;
        }
        let due = now + Duration::from_millis(self.debounce.search_quiet_ms);
        self.pending_search = Some((text.to_string(), due));
    }

    pub fn cancel(&mut self, key: &str) {
        if self.inflight.remove(key).is_some() {
            log::debug!("cancelled request {key}");
        }
        self.retries.retain(|r| r.key != key);
        if self.current_discovery.as_deref() == Some(key) {
            self.current_discovery = None;
        }
    }

    // Drain worker results, fire due retries and the debounced search.
    // Everything that arrives for a cancelled or superseded generation is
    // discarded here, before it can touch any state.
    pub fn poll(&mut self, now: Instant) -> Vec<LifecycleEvent> {
        let mut events = Vec::new();
        if !self.active {
            // Drain and drop: teardown already happened.
            while self.rx.try_recv().is_ok() {}
            return events;
        }

        while let Ok(msg) = self.rx.try_recv() {
            let Some(inflight) = self.inflight.get(&msg.key) else {
                log::debug!("ignoring response for cancelled request {}", msg.key);
                continue;
            };
            if inflight.generation != msg.generation {
                log::debug!("ignoring stale response for {}", msg.key);
                continue;
            }
            match msg.result {
                WorkerResult::Discovery(Ok(response)) => {
                    self.inflight.remove(&msg.key);
                    if self.current_discovery.as_deref() == Some(msg.key.as_str()) {
                        self.current_discovery = None;
                    }
                    events.push(LifecycleEvent::DiscoveryReady { key: msg.key, response });
                }
                WorkerResult::Discovery(Err(err)) => {
                    if err.is_transient() && msg.attempt < self.retry.max_attempts {
                        let due = now + self.retry.delay_for(msg.attempt);
                        log::debug!(
                            "discovery {} attempt {} failed ({err}); retrying",
                            msg.key,
                            msg.attempt
                        );
                        self.retries.push(PendingRetry {
                            key: msg.key,
                            generation: msg.generation,
                            attempt: msg.attempt + 1,
                            due,
                        });
                    } else {
                        self.inflight.remove(&msg.key);
                        if self.current_discovery.as_deref() == Some(msg.key.as_str()) {
                            self.current_discovery = None;
                        }
                        events.push(LifecycleEvent::DiscoveryFailed {
                            key: msg.key,
                            error: err.to_string(),
                            recoverable: err.is_transient(),
                        });
                    }
                }
                WorkerResult::Statistics(Ok(stats)) => {
                    self.inflight.remove(&msg.key);
                    events.push(LifecycleEvent::StatisticsReady(stats));
                }
                WorkerResult::Statistics(Err(err)) => {
                    if err.is_transient() && msg.attempt < self.retry.max_attempts {
                        let due = now + self.retry.delay_for(msg.attempt);
                        self.retries.push(PendingRetry {
                            key: msg.key,
                            generation: msg.generation,
                            attempt: msg.attempt + 1,
                            due,
                        });
                    } else {
                        self.inflight.remove(&msg.key);
                        events.push(LifecycleEvent::StatisticsFailed(err.to_string()));
                    }
                }
            }
        }

        // Fire due retries; the generation is unchanged so a cancel between
        // attempts still kills the whole request.
        let due: Vec<PendingRetry> = {
            let mut split = Vec::new();
            let mut keep = Vec::new();
            for retry in self.retries.drain(..) {
                if retry.due <= now { split.push(retry) } else { keep.push(retry) }
            }
            self.retries = keep;
            split
        };
        for retry in due {
            let still_current =
                self.inflight.get(&retry.key).map(|i| i.generation) == Some(retry.generation);
            if !still_current {
                continue;
            }
            if retry.key == STATISTICS_KEY {
                self.spawn_statistics(retry.generation, retry.attempt);
            } else {
                self.spawn_discovery(&retry.key, retry.generation, retry.attempt);
            }
        }

        if let Some((text, due)) = &self.pending_search
            && *due <= now
        {
            let text = text.clone();
            self.pending_search = None;
            events.push(LifecycleEvent::SearchFired(text));
        }

        events
    }

    // Cancel everything and stop accepting work. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.active = false;
        self.inflight.clear();
        self.retries.clear();
        self.current_discovery = None;
        self.pending_search = None;
    }

    fn spawn_discovery(&self, key: &str, generation: Uuid, attempt: u32) {
        let Some(inflight) = self.inflight.get(key) else { return };
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        let key = key.to_string();
        let resource_type = inflight.resource_type.clone();
        let resource_id = inflight.resource_id.clone();
        let opts = inflight.opts;
        std::thread::spawn(move || {
            let result = service.discover(&resource_type, &resource_id, &opts);
            let _ = tx.send(WorkerMsg {
                key,
                generation,
                attempt,
                result: WorkerResult::Discovery(result),
            });
        });
    }

    fn spawn_statistics(&self, generation: Uuid, attempt: u32) {
        let service = Arc::clone(&self.service);
        let tx = self.tx.clone();
        std::thread::spawn(move || {
            let result = service.statistics();
            let _ = tx.send(WorkerMsg {
                key: STATISTICS_KEY.to_string(),
                generation,
                attempt,
                result: WorkerResult::Statistics(result),
            });
        });
    }
}
