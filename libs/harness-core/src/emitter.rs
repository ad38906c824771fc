use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Semaphore;
use futures::StreamExt;
use futures::stream::FuturesUnordered;

use harness_api::{
    BackpressurePolicy, ChannelError, ChannelPublisher, DEFAULT_EVENT_NAME, Envelope,
    channel_key, now_ms,
};

use crate::{LatencyStats, Manifest, ManifestEntry, MessageDescriptor, payload};

// ═══════════════════════════════════════════════════════════════
//  Report types
// ═══════════════════════════════════════════════════════════════

/// Тайминг одного publish'а.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmissionRecord {
    pub sequence_id: i64,
    /// Unix ms момента подачи publish'а.
    pub publish_started_at: i64,
    /// None: publish не завершился (pending).
    pub publish_ended_at: Option<i64>,
    /// Монотонная длительность publish'а.
    pub duration_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishFailure {
    pub sequence_id: i64,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmissionReport {
    pub channel_id: String,
    pub policy: BackpressurePolicy,
    pub manifest: Manifest,
    /// По одной записи на элемент manifest'а, в порядке sequenceId.
    pub records: Vec<EmissionRecord>,
    pub failures: Vec<PublishFailure>,
    pub total_ms: f64,
    /// Длительности publish'ей content-сообщений. Осмысленны в await-each.
    pub emit_stats: LatencyStats,
}

impl EmissionReport {
    pub fn sizes(&self) -> Vec<u64> {
        self.manifest.sizes()
    }
}

// ═══════════════════════════════════════════════════════════════
//  EmissionController
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub struct EmissionConfig {
    pub event_name: String,
    /// Потолок одновременных publish'ей в fire-and-forget. 0 = без ограничения.
    pub max_in_flight: usize,
    /// Publish, не завершившийся за это время, считается ошибкой транспорта.
    pub publish_timeout: Option<Duration>,
    /// Пауза после каждого content-publish'а, в том числе перед completion marker.
    pub delay: Duration,
}

impl Default for EmissionConfig {
    fn default() -> Self {
        Self {
            event_name: DEFAULT_EVENT_NAME.to_string(),
            max_in_flight: 0,
            publish_timeout: None,
            delay: Duration::ZERO,
        }
    }
}

/// Публикует manifest в channel под выбранной backpressure policy.
///
/// Ошибки publish'ей не прерывают прогон и не повторяются:
/// они попадают в `EmissionReport::failures`, а completion marker
/// публикуется в любом случае.
pub struct EmissionController {
    publisher: Arc<dyn ChannelPublisher>,
    config: EmissionConfig,
}

struct Outcome {
    record: EmissionRecord,
    error: Option<ChannelError>,
}

impl EmissionController {
    pub fn new(publisher: Arc<dyn ChannelPublisher>, config: EmissionConfig) -> Self {
        Self { publisher, config }
    }

    pub async fn run(
        &self,
        channel_id: &str,
        manifest: Manifest,
        policy: BackpressurePolicy,
    ) -> EmissionReport {
        let key = channel_key(channel_id);
        tracing::info!(
            channel = %key,
            count = manifest.count(),
            policy = %policy,
            max_in_flight = self.config.max_in_flight,
            "emission started"
        );

        let start = Instant::now();
        let outcomes = match policy {
            BackpressurePolicy::AwaitEach => self.run_await_each(&key, channel_id, &manifest).await,
            BackpressurePolicy::FireAndForget => {
                self.run_fire_and_forget(&key, channel_id, &manifest).await
            }
        };
        let total_ms = start.elapsed().as_secs_f64() * 1000.0;

        let mut records = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        for outcome in outcomes {
            if let Some(e) = outcome.error {
                tracing::warn!(
                    channel = %key,
                    sequence_id = outcome.record.sequence_id,
                    error = ?e,
                    "publish failed"
                );
                failures.push(PublishFailure {
                    sequence_id: outcome.record.sequence_id,
                    error: e.to_string(),
                });
            }
            records.push(outcome.record);
        }
        records.sort_by_key(|r| r.sequence_id);
        failures.sort_by_key(|f| f.sequence_id);

        let completion = manifest.completion_sequence_id();
        let emit_stats = LatencyStats::from_samples(
            records
                .iter()
                .filter(|r| r.sequence_id != completion)
                .filter_map(|r| r.duration_ms),
        );

        tracing::info!(
            channel = %key,
            published = records.len() - failures.len(),
            failed = failures.len(),
            total_ms = format_args!("{total_ms:.1}"),
            avg_emit_ms = format_args!("{:.3}", emit_stats.mean),
            p95_emit_ms = format_args!("{:.3}", emit_stats.p95),
            "emission complete"
        );

        EmissionReport {
            channel_id: channel_id.to_string(),
            policy,
            manifest,
            records,
            failures,
            total_ms,
            emit_stats,
        }
    }

    /// Строго последовательно: следующий publish только после завершения предыдущего.
    async fn run_await_each(&self, key: &str, channel_id: &str, manifest: &Manifest) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(manifest.entry_count());
        for (i, entry) in manifest.entries().enumerate() {
            if i > 0 && !self.config.delay.is_zero() {
                tokio::time::sleep(self.config.delay).await;
            }
            outcomes.push(self.submit(key, channel_id, entry).await);
        }
        outcomes
    }

    /// Все publish'и подаются в порядке sequenceId, не дожидаясь завершения
    /// предыдущих, и выполняются конкурентно в одной задаче. Completion
    /// marker подаётся последним; отчёт строится, когда завершились все.
    async fn run_fire_and_forget(
        &self,
        key: &str,
        channel_id: &str,
        manifest: &Manifest,
    ) -> Vec<Outcome> {
        let ceiling = (self.config.max_in_flight > 0)
            .then(|| Semaphore::new(self.config.max_in_flight));
        let ceiling = ceiling.as_ref();

        let in_flight: FuturesUnordered<_> = manifest
            .entries()
            .enumerate()
            .map(move |(i, entry)| {
                let not_before = self.config.delay.saturating_mul(i as u32);
                async move {
                    if !not_before.is_zero() {
                        tokio::time::sleep(not_before).await;
                    }
                    let _permit = match ceiling {
                        Some(sem) => sem.acquire().await.ok(),
                        None => None,
                    };
                    self.submit(key, channel_id, entry).await
                }
            })
            .collect();
        in_flight.collect::<Vec<_>>().await
    }

    async fn submit(
        &self,
        key: &str,
        channel_id: &str,
        entry: ManifestEntry,
    ) -> Outcome {
        // Payload генерируется до начала замера.
        let envelope = match entry {
            ManifestEntry::Content(desc) => content_envelope(channel_id, &desc),
            ManifestEntry::Complete { sequence_id } => {
                Envelope::complete(channel_id, sequence_id, now_ms())
            }
        };
        timed_publish(
            self.publisher.as_ref(),
            key,
            &self.config.event_name,
            envelope,
            self.config.publish_timeout,
        )
        .await
    }
}

fn content_envelope(channel_id: &str, desc: &MessageDescriptor) -> Envelope {
    let content = payload::generate(desc.byte_size as usize);
    Envelope::content(channel_id, desc.sequence_id, content, now_ms())
}

async fn timed_publish(
    publisher: &dyn ChannelPublisher,
    key: &str,
    event_name: &str,
    envelope: Envelope,
    timeout: Option<Duration>,
) -> Outcome {
    let sequence_id = envelope.data.sequence_id;
    let payload = match envelope.to_json() {
        Ok(v) => v,
        Err(e) => {
            return Outcome {
                record: EmissionRecord {
                    sequence_id,
                    publish_started_at: now_ms(),
                    publish_ended_at: None,
                    duration_ms: None,
                },
                error: Some(ChannelError::from(e)),
            };
        }
    };

    let started_at = now_ms();
    let start = Instant::now();
    let publish = publisher.publish(key, event_name, payload);
    let (result, settled) = match timeout {
        Some(limit) => match tokio::time::timeout(limit, publish).await {
            Ok(r) => (r, true),
            Err(_) => (
                Err(ChannelError::transport(format!(
                    "publish timed out after {} ms",
                    limit.as_millis()
                ))),
                false,
            ),
        },
        None => (publish.await, true),
    };
    let elapsed = start.elapsed();

    Outcome {
        record: EmissionRecord {
            sequence_id,
            publish_started_at: started_at,
            publish_ended_at: settled.then(now_ms),
            duration_ms: settled.then(|| elapsed.as_secs_f64() * 1000.0),
        },
        error: result.err(),
    }
}
