use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex, PoisonError},
};

pub const DEFAULT_RECENT_CAPACITY: usize = 1024;

/// Outcome of remembering an EventSub message id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageIdOutcome {
    Inserted,
    Duplicate,
}

/// Bounded set of recently processed EventSub message ids.
///
/// Twitch redelivers a notification when it does not see a timely 2xx; the
/// ids let the handler acknowledge a redelivery without posting twice. The
/// oldest id is evicted once `capacity` is reached.
#[derive(Clone)]
pub struct RecentMessageIds {
    capacity: usize,
    inner: Arc<Mutex<RecentInner>>,
}

#[derive(Default)]
struct RecentInner {
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentMessageIds {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Arc::new(Mutex::new(RecentInner::default())),
        }
    }

    pub fn insert(&self, message_id: &str) -> MessageIdOutcome {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.seen.contains(message_id) {
            return MessageIdOutcome::Duplicate;
        }

        if inner.order.len() >= self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.seen.remove(&evicted);
            }
        }
        inner.order.push_back(message_id.to_string());
        inner.seen.insert(message_id.to_string());
        MessageIdOutcome::Inserted
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RecentMessageIds {
    fn default() -> Self {
        Self::new(DEFAULT_RECENT_CAPACITY)
    }
}
