//! Общие типы и трейты harness'а: wire envelope, политики,
//! абстрактный channel (publish / subscribe) и ошибки на его границе.
//!
//! Crate не зависит от tokio: реализации channel'а (loopback engine,
//! внешние транспорты) подключаются через трейты из [`channel`].

mod channel;
mod error;
mod types;
mod util;

pub use channel::{ChannelEvent, ChannelPublisher, ChannelSubscriber, ChannelSubscription};
pub use error::{ChannelError, ErrorKind};
pub use types::{
    BackpressurePolicy, Envelope, EnvelopeData, EventType, OverflowPolicy,
    DEFAULT_EVENT_NAME, channel_key,
};
pub use util::now_ms;
