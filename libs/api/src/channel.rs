use std::future::Future;
use std::pin::Pin;

use crate::{ChannelError, OverflowPolicy};

// ════════════════════════════════════════════════════════════════
//  Channel Traits
// ════════════════════════════════════════════════════════════════

/// Событие, доставленное подписчику channel'а.
#[derive(Debug, Clone)]
pub struct ChannelEvent {
    /// Имя события (например, `generate.event`).
    pub event: String,
    /// Структурированный payload в том виде, в каком его отдал транспорт.
    pub payload: serde_json::Value,
}

/// Подписка на channel: асинхронный поток событий.
///
/// Порядок и надёжность доставки определяются транспортом
/// (не гарантируются in-order / exactly-once, именно это и проверяется).
pub trait ChannelSubscription: Send {
    /// Получить следующее событие. None = channel закрыт / подписка отменена.
    fn recv(&mut self) -> Pin<Box<dyn Future<Output = Option<ChannelEvent>> + Send + '_>>;
}

/// Публикация событий в channel.
pub trait ChannelPublisher: Send + Sync {
    /// Опубликовать событие. Future завершается, когда транспорт принял
    /// (или отверг) publish; ошибка транспорта: `ErrorKind::Transport`.
    fn publish(
        &self,
        channel_key: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<(), ChannelError>> + Send + '_>>;
}

/// Подписка на real-time поток событий channel'а.
pub trait ChannelSubscriber: Send + Sync {
    /// Подписаться на channel.
    ///
    /// - `event_types`: какие события доставлять (пусто = все)
    /// - `buffer`: размер буфера подписки
    /// - `overflow`: стратегия при переполнении (Drop или BackPressure)
    #[allow(clippy::type_complexity)]
    fn subscribe(
        &self,
        channel_key: &str,
        event_types: &[String],
        buffer: usize,
        overflow: OverflowPolicy,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ChannelSubscription>, ChannelError>> + Send + '_>>;
}
