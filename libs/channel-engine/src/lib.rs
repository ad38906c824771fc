pub mod error;
pub mod faults;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, RwLock, mpsc};

use harness_api::{
    ChannelError, ChannelEvent, ChannelPublisher, ChannelSubscriber, ChannelSubscription,
    OverflowPolicy,
};

pub use error::ChannelEngineError;
pub use faults::{FaultAction, FaultPlan};

// ═══════════════════════════════════════════════════════════════
//  Subscriber
// ═══════════════════════════════════════════════════════════════

struct Subscriber {
    tx: mpsc::Sender<ChannelEvent>,
    overflow: OverflowPolicy,
    /// Пусто = все события.
    events: HashSet<String>,
}

impl Subscriber {
    fn accepts(&self, event: &str) -> bool {
        self.events.is_empty() || self.events.contains(event)
    }
}

// ═══════════════════════════════════════════════════════════════
//  MpscSubscription (ChannelSubscription impl)
// ═══════════════════════════════════════════════════════════════

pub struct MpscSubscription {
    rx: mpsc::Receiver<ChannelEvent>,
}

impl ChannelSubscription for MpscSubscription {
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ChannelEvent>> + Send + '_>> {
        Box::pin(async { self.rx.recv().await })
    }
}

// ═══════════════════════════════════════════════════════════════
//  Channel
// ═══════════════════════════════════════════════════════════════

/// Именованный loopback channel: fan-out всем подписчикам
/// через mpsc с overflow policy, плюс опциональные искажения из FaultPlan.
pub struct Channel {
    pub name: String,
    subscribers: RwLock<Vec<Subscriber>>,
    faults: FaultPlan,
    held: Mutex<Vec<ChannelEvent>>,
    closed: AtomicBool,
}

impl Channel {
    pub fn new(name: String, faults: FaultPlan) -> Self {
        Self {
            name,
            subscribers: RwLock::new(Vec::new()),
            faults,
            held: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Подписаться на channel. Возвращает MpscSubscription.
    pub async fn subscribe(
        &self,
        event_types: &[String],
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Result<MpscSubscription, ChannelEngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelEngineError::Closed(self.name.clone()));
        }
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let mut subs = self.subscribers.write().await;
        subs.push(Subscriber {
            tx,
            overflow,
            events: event_types.iter().cloned().collect(),
        });
        Ok(MpscSubscription { rx })
    }

    /// Живые подписки. Закрытые вычищаются при следующей доставке.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Опубликовать событие: применить FaultPlan → отправить подписчикам.
    ///
    /// Придержанные (Hold) события уходят сразу после следующего
    /// доставленного publish'а.
    pub async fn publish(&self, event: ChannelEvent) -> Result<(), ChannelEngineError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ChannelEngineError::Closed(self.name.clone()));
        }

        let mut batch = Vec::with_capacity(2);
        match self.faults.decide(&event.payload) {
            FaultAction::Deliver => batch.push(event),
            FaultAction::Duplicate => {
                batch.push(event.clone());
                batch.push(event);
            }
            FaultAction::Drop => {
                tracing::debug!(channel = %self.name, "fault plan: dropping event");
            }
            FaultAction::Hold => {
                tracing::debug!(channel = %self.name, "fault plan: holding event back");
                self.held.lock().await.push(event);
                return Ok(());
            }
            FaultAction::Fail => {
                let sequence_id = faults::sequence_of(&event.payload).unwrap_or_default();
                return Err(ChannelEngineError::InjectedFailure {
                    channel: self.name.clone(),
                    sequence_id,
                });
            }
        }
        batch.append(&mut *self.held.lock().await);

        for event in batch {
            self.deliver(event).await;
        }
        Ok(())
    }

    async fn deliver(&self, event: ChannelEvent) {
        // Write lock держится на всё время отправки: все подписчики
        // видят события одного channel'а в одном и том же порядке.
        let mut subs = self.subscribers.write().await;
        let mut i = 0;
        while i < subs.len() {
            let sub = &subs[i];
            if sub.tx.is_closed() {
                subs.swap_remove(i);
                continue;
            }
            if !sub.accepts(&event.event) {
                i += 1;
                continue;
            }
            match sub.overflow {
                OverflowPolicy::Drop => match sub.tx.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(channel = %self.name, "subscriber channel full, dropping");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        subs.swap_remove(i);
                        continue;
                    }
                },
                OverflowPolicy::BackPressure => {
                    if sub.tx.send(event.clone()).await.is_err() {
                        tracing::warn!(channel = %self.name, "subscriber closed during backpressure send");
                        subs.swap_remove(i);
                        continue;
                    }
                }
            }
            i += 1;
        }
    }

    /// Закрыть channel: придержанные события доставляются,
    /// подписки завершаются (recv → None), новые publish'и отвергаются.
    pub async fn close(&self) {
        let held: Vec<ChannelEvent> = std::mem::take(&mut *self.held.lock().await);
        for event in held {
            self.deliver(event).await;
        }
        self.closed.store(true, Ordering::Release);
        self.subscribers.write().await.clear();
    }
}

// ═══════════════════════════════════════════════════════════════
//  ChannelRegistry
// ═══════════════════════════════════════════════════════════════

/// Реестр channel'ов. Channel создаётся лениво при первом
/// subscribe/publish. Реализует ChannelPublisher и ChannelSubscriber.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    faults: FaultPlan,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::with_faults(FaultPlan::default())
    }

    /// Все channel'ы реестра получают один и тот же FaultPlan.
    pub fn with_faults(faults: FaultPlan) -> Self {
        if !faults.is_empty() {
            tracing::warn!(faults = ?faults, "loopback channel runs with fault injection");
        }
        Self {
            channels: RwLock::new(HashMap::new()),
            faults,
        }
    }

    pub async fn channel(&self, key: &str) -> Arc<Channel> {
        if let Some(ch) = self.channels.read().await.get(key) {
            return ch.clone();
        }
        let mut channels = self.channels.write().await;
        channels
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Channel::new(key.to_string(), self.faults.clone())))
            .clone()
    }

    /// Закрыть и удалить channel. Следующий publish/subscribe создаст новый.
    pub async fn close(&self, key: &str) {
        let removed = self.channels.write().await.remove(key);
        if let Some(ch) = removed {
            ch.close().await;
        }
    }

    pub async fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl ChannelPublisher for ChannelRegistry {
    fn publish(
        &self,
        channel_key: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>> {
        let key = channel_key.to_string();
        let event = ChannelEvent {
            event: event_type.to_string(),
            payload,
        };
        Box::pin(async move {
            let ch = self.channel(&key).await;
            ch.publish(event)
                .await
                .map_err(ChannelEngineError::into_channel_error)
        })
    }
}

impl ChannelSubscriber for ChannelRegistry {
    fn subscribe(
        &self,
        channel_key: &str,
        event_types: &[String],
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChannelSubscription>, ChannelError>> + Send + '_>> {
        let key = channel_key.to_string();
        let event_types = event_types.to_vec();
        Box::pin(async move {
            let ch = self.channel(&key).await;
            let sub = ch
                .subscribe(&event_types, buffer, overflow)
                .await
                .map_err(ChannelEngineError::into_channel_error)?;
            Ok(Box::new(sub) as Box<dyn ChannelSubscription>)
        })
    }
}
