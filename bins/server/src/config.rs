use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use channel_engine::FaultPlan;
use harness_api::{BackpressurePolicy, DEFAULT_EVENT_NAME, OverflowPolicy};
use harness_core::{RunLimits, RunSettings};

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "harness-server", about = "Проверка целостности доставки pub/sub channel'а")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить HTTP control surface
    Serve(ServeArgs),
    /// Выполнить один прогон против loopback channel'а и напечатать результат
    Run(RunArgs),
}

#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    /// Порт API (перекрывает api_port из конфига)
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// Путь к TOML конфиг файлу
    #[arg(long, default_value = "config.toml", env = "CONFIG_PATH")]
    pub config: String,

    #[arg(long, default_value = "cli")]
    pub channel_id: String,

    /// Число content-сообщений
    #[arg(long, default_value_t = 100)]
    pub count: i64,

    #[arg(long, default_value_t = 1)]
    pub min_size: i64,

    #[arg(long, default_value_t = 5000)]
    pub max_size: i64,

    /// await-each | fire-and-forget
    #[arg(long, default_value_t = BackpressurePolicy::AwaitEach)]
    pub mode: BackpressurePolicy,

    #[arg(long)]
    pub seed: Option<i64>,

    /// Ожидание completion marker, мс
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Пауза после каждого content-publish'а, мс
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Прогнать обе backpressure policy на одном и том же workload'е
    #[arg(long)]
    pub compare: bool,

    /// Напечатать полный outcome в JSON
    #[arg(long)]
    pub json: bool,
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct HarnessConfig {
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    /// Имя события в channel'е.
    #[serde(default = "default_event_name")]
    pub event_name: String,
    /// Размер буфера подписки recorder'а.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Стратегия переполнения подписки recorder'а.
    #[serde(default = "default_subscriber_overflow")]
    pub subscriber_overflow: OverflowPolicy,
    /// Потолок одновременных publish'ей в fire-and-forget. 0 = без ограничения.
    #[serde(default)]
    pub max_in_flight: usize,
    #[serde(default)]
    pub publish_timeout_ms: Option<u64>,
    #[serde(default = "default_run_timeout_ms")]
    pub run_timeout_ms: u64,
    #[serde(default = "default_max_count")]
    pub max_count: u64,
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: u64,
    /// Искажения loopback channel'а.
    #[serde(default)]
    pub faults: FaultPlan,
}

fn default_api_port() -> u16 {
    9300
}
fn default_event_name() -> String {
    DEFAULT_EVENT_NAME.to_string()
}
fn default_subscriber_buffer() -> usize {
    4096
}
fn default_subscriber_overflow() -> OverflowPolicy {
    OverflowPolicy::BackPressure
}
fn default_run_timeout_ms() -> u64 {
    30_000
}
fn default_max_count() -> u64 {
    RunLimits::default().max_count
}
fn default_max_message_bytes() -> u64 {
    RunLimits::default().max_message_bytes
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            event_name: default_event_name(),
            subscriber_buffer: default_subscriber_buffer(),
            subscriber_overflow: default_subscriber_overflow(),
            max_in_flight: 0,
            publish_timeout_ms: None,
            run_timeout_ms: default_run_timeout_ms(),
            max_count: default_max_count(),
            max_message_bytes: default_max_message_bytes(),
            faults: FaultPlan::default(),
        }
    }
}

impl HarnessConfig {
    /// Отсутствующий файл не ошибка, берутся значения по умолчанию.
    pub fn load(path: &str) -> Result<Self, ServerError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(config = %path, "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ServerError::Config { context: "read", detail: format!("'{path}': {e}") });
            }
        };
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn settings(&self) -> RunSettings {
        RunSettings {
            event_name: self.event_name.clone(),
            subscriber_buffer: self.subscriber_buffer,
            subscriber_overflow: self.subscriber_overflow,
            max_in_flight: self.max_in_flight,
            publish_timeout: self.publish_timeout_ms.map(Duration::from_millis),
            run_timeout: Duration::from_millis(self.run_timeout_ms),
            limits: RunLimits {
                max_count: self.max_count,
                max_message_bytes: self.max_message_bytes,
            },
        }
    }
}
