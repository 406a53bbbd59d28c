//! 事件分发：显式订阅者列表 + 有界历史。

use std::collections::{HashMap, VecDeque};

use tc_shared_protocol::PairingEvent;
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::debug;
use uuid::Uuid;

/// 一个事件订阅。丢弃 receiver 后会在下一次广播时被清理。
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::UnboundedReceiver<PairingEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<PairingEvent> {
        self.receiver.recv().await
    }
}

pub(crate) struct EventHub {
    subscribers: RwLock<HashMap<Uuid, mpsc::UnboundedSender<PairingEvent>>>,
    history: Mutex<VecDeque<PairingEvent>>,
    capacity: usize,
}

impl EventHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub(crate) async fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.subscribers.write().await.insert(id, sender);
        Subscription { id, receiver }
    }

    pub(crate) async fn unsubscribe(&self, id: Uuid) -> bool {
        self.subscribers.write().await.remove(&id).is_some()
    }

    #[cfg(test)]
    pub(crate) async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// 写入历史并推送给所有订阅者，顺带清理已失效的订阅。
    pub(crate) async fn publish(&self, event: PairingEvent) {
        {
            let mut history = self.history.lock().await;
            if self.capacity > 0 {
                while history.len() >= self.capacity {
                    history.pop_front();
                }
                history.push_back(event.clone());
            }
        }

        let mut stale = Vec::new();
        {
            let guard = self.subscribers.read().await;
            for (id, sender) in guard.iter() {
                if sender.send(event.clone()).is_err() {
                    stale.push(*id);
                }
            }
        }
        debug!(
            "pairing event published kind={} id={}",
            event.kind(),
            event.event_id
        );

        if stale.is_empty() {
            return;
        }
        let mut guard = self.subscribers.write().await;
        for id in stale {
            guard.remove(&id);
        }
    }

    /// 最近的事件，最新的在最后。
    pub(crate) async fn recent(&self) -> Vec<PairingEvent> {
        self.history.lock().await.iter().cloned().collect()
    }
}
