use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use harness_api::{ChannelSubscription, Envelope, EventType, now_ms};

use crate::HarnessError;

// ═══════════════════════════════════════════════════════════════
//  ArrivalRecord
// ═══════════════════════════════════════════════════════════════

/// Одно наблюдённое прибытие. `arrival_index`: единственный
/// авторитетный порядок получения; `sequence_id`: это содержимое payload'а.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrivalRecord {
    /// -1 если payload не удалось разобрать.
    pub sequence_id: i64,
    pub event_type: EventType,
    pub observed_byte_size: u64,
    pub arrival_index: u64,
    /// Unix ms.
    pub arrival_timestamp: i64,
    pub sender_timestamp: Option<i64>,
}

struct Observed {
    sequence_id: i64,
    event_type: EventType,
    observed_byte_size: u64,
    sender_timestamp: Option<i64>,
}

impl Observed {
    fn from_payload(payload: &serde_json::Value) -> Self {
        match Envelope::from_json(payload) {
            Ok(env) => Self {
                sequence_id: env.data.sequence_id,
                event_type: env.event_type,
                observed_byte_size: env.content_len(),
                sender_timestamp: env.data.server_sent_at,
            },
            Err(e) => {
                // Не отбрасываем: битый payload тоже факт о channel'е.
                tracing::warn!(error = %e, "undecodable arrival payload, recording leniently");
                let data = payload.get("data");
                Self {
                    sequence_id: data
                        .and_then(|d| d.get("sequenceId"))
                        .and_then(|v| v.as_i64())
                        .unwrap_or(-1),
                    event_type: match payload.get("type").and_then(|v| v.as_str()) {
                        Some("complete") => EventType::Complete,
                        _ => EventType::Content,
                    },
                    observed_byte_size: data
                        .and_then(|d| d.get("content"))
                        .and_then(|v| v.as_str())
                        .map(|c| c.chars().count() as u64)
                        .unwrap_or(0),
                    sender_timestamp: data
                        .and_then(|d| d.get("serverSentAt"))
                        .and_then(|v| v.as_i64()),
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  ArrivalRecorder
// ═══════════════════════════════════════════════════════════════

#[derive(Default)]
struct RecorderState {
    run_key: Option<String>,
    active: bool,
    log: Vec<ArrivalRecord>,
    complete_seen: bool,
    /// Прибытия вне активного прогона, в журнал не попали.
    stray: u64,
}

/// Append-only журнал прибытий одного прогона.
///
/// `record` вызывается прямо из callback'а доставки и может
/// вызываться конкурентно: индекс назначается и запись добавляется
/// под одним mutex, поэтому индексы 1..M без пропусков и повторов
/// и совпадают с порядком захвата lock'а.
#[derive(Default)]
pub struct ArrivalRecorder {
    state: Mutex<RecorderState>,
    completed: Notify,
}

impl ArrivalRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Начать прогон: журнал очищается. Вызывать до первого publish'а.
    pub fn begin(&self, run_key: &str) -> Result<(), HarnessError> {
        let mut state = self.lock();
        if state.active {
            return Err(HarnessError::State(format!(
                "run '{}' is still active",
                state.run_key.as_deref().unwrap_or_default()
            )));
        }
        *state = RecorderState {
            run_key: Some(run_key.to_string()),
            active: true,
            ..Default::default()
        };
        tracing::debug!(run = %run_key, "recorder armed");
        Ok(())
    }

    /// Завершить прогон. Журнал остаётся доступным до reset/begin.
    pub fn finish(&self) -> Result<(), HarnessError> {
        let mut state = self.lock();
        if !state.active {
            return Err(HarnessError::State("no active run to finish".into()));
        }
        state.active = false;
        Ok(())
    }

    /// Очистить журнал между прогонами.
    pub fn reset(&self) -> Result<(), HarnessError> {
        let mut state = self.lock();
        if state.active {
            return Err(HarnessError::State(format!(
                "cannot reset while run '{}' is active",
                state.run_key.as_deref().unwrap_or_default()
            )));
        }
        *state = RecorderState::default();
        Ok(())
    }

    /// Записать прибытие с текущим wall-clock временем.
    pub fn record(&self, payload: &serde_json::Value) -> Option<ArrivalRecord> {
        self.record_at(payload, now_ms())
    }

    /// Записать прибытие с явным временем (Unix ms).
    ///
    /// Вне активного прогона запись не добавляется, только считается
    /// в `stray_count`: опоздавшие события не меняют журнал завершённого прогона.
    pub fn record_at(&self, payload: &serde_json::Value, arrival_ms: i64) -> Option<ArrivalRecord> {
        let observed = Observed::from_payload(payload);

        let mut state = self.lock();
        if !state.active {
            state.stray += 1;
            tracing::debug!(
                sequence_id = observed.sequence_id,
                stray = state.stray,
                "arrival outside an active run, not recorded"
            );
            return None;
        }
        let record = ArrivalRecord {
            sequence_id: observed.sequence_id,
            event_type: observed.event_type,
            observed_byte_size: observed.observed_byte_size,
            arrival_index: state.log.len() as u64 + 1,
            arrival_timestamp: arrival_ms,
            sender_timestamp: observed.sender_timestamp,
        };
        state.log.push(record.clone());
        let just_completed = record.event_type == EventType::Complete && !state.complete_seen;
        if just_completed {
            state.complete_seen = true;
        }
        drop(state);

        if just_completed {
            self.completed.notify_waiters();
        }
        Some(record)
    }

    /// Копия журнала в порядке arrival_index.
    pub fn snapshot(&self) -> Vec<ArrivalRecord> {
        self.lock().log.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().log.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    pub fn run_key(&self) -> Option<String> {
        self.lock().run_key.clone()
    }

    pub fn stray_count(&self) -> u64 {
        self.lock().stray
    }

    pub fn complete_seen(&self) -> bool {
        self.lock().complete_seen
    }

    /// Ждать completion marker не дольше `timeout`.
    /// `false`: marker не пришёл вовремя (это результат, не ошибка).
    pub async fn wait_for_completion(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.completed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.complete_seen() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.complete_seen();
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Arrival task (subscription → recorder.record)
// ═══════════════════════════════════════════════════════════════

/// Перекачивать подписку в recorder, пока подписка жива или не отменён token.
/// Уже полученные транспортом события забираются раньше отмены.
pub fn spawn_arrival_task(
    recorder: Arc<ArrivalRecorder>,
    mut subscription: Box<dyn ChannelSubscription>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                event = subscription.recv() => {
                    match event {
                        Some(event) => {
                            recorder.record(&event.payload);
                        }
                        None => break,
                    }
                }
                _ = token.cancelled() => break,
            }
        }
        tracing::debug!(recorded = recorder.len(), "arrival task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn content(seq: i64, content: &str) -> serde_json::Value {
        Envelope::content("run", seq, content.to_string(), 1_000).to_json().unwrap()
    }

    #[test]
    fn assigns_gapless_indices_in_receipt_order() {
        let recorder = ArrivalRecorder::new();
        recorder.begin("generate:r").unwrap();
        recorder.record_at(&content(2, "ab"), 1_010);
        recorder.record_at(&content(1, "a"), 1_020);
        let rec = recorder.record_at(&content(2, "ab"), 1_030).unwrap();

        assert_eq!(rec.arrival_index, 3);
        let log = recorder.snapshot();
        let idx: Vec<u64> = log.iter().map(|r| r.arrival_index).collect();
        let seq: Vec<i64> = log.iter().map(|r| r.sequence_id).collect();
        assert_eq!(idx, vec![1, 2, 3]);
        assert_eq!(seq, vec![2, 1, 2]);
        assert_eq!(log[0].observed_byte_size, 2);
        assert_eq!(log[0].sender_timestamp, Some(1_000));
        assert_eq!(log[1].arrival_timestamp, 1_020);
    }

    #[test]
    fn malformed_payload_is_recorded_not_dropped() {
        let recorder = ArrivalRecorder::new();
        recorder.begin("generate:r").unwrap();
        let rec = recorder.record_at(&json!({"unexpected": true}), 5).unwrap();
        assert_eq!(rec.sequence_id, -1);
        assert_eq!(rec.event_type, EventType::Content);
        assert_eq!(rec.sender_timestamp, None);

        let partial = recorder.record_at(
            &json!({"type": "complete", "data": {"sequenceId": 9}}),
            6,
        ).unwrap();
        assert_eq!(partial.sequence_id, 9);
        assert_eq!(partial.event_type, EventType::Complete);
        assert!(recorder.complete_seen());
        assert_eq!(recorder.len(), 2);
    }

    #[test]
    fn lifecycle_rejects_reset_while_active() {
        let recorder = ArrivalRecorder::new();
        recorder.begin("generate:a").unwrap();
        recorder.record_at(&content(1, "x"), 1);

        assert!(matches!(recorder.reset(), Err(HarnessError::State(_))));
        assert!(matches!(recorder.begin("generate:b"), Err(HarnessError::State(_))));

        recorder.finish().unwrap();
        assert!(matches!(recorder.finish(), Err(HarnessError::State(_))));
        assert_eq!(recorder.len(), 1);

        recorder.reset().unwrap();
        assert!(recorder.is_empty());
        assert_eq!(recorder.run_key(), None);
    }

    #[test]
    fn begin_clears_previous_run() {
        let recorder = ArrivalRecorder::new();
        recorder.begin("generate:a").unwrap();
        recorder.record_at(&content(1, "x"), 1);
        recorder.finish().unwrap();

        recorder.begin("generate:b").unwrap();
        assert!(recorder.is_empty());
        assert_eq!(recorder.run_key().as_deref(), Some("generate:b"));
        let rec = recorder.record_at(&content(1, "x"), 2).unwrap();
        assert_eq!(rec.arrival_index, 1);
    }

    #[test]
    fn arrivals_outside_a_run_are_counted_not_logged() {
        let recorder = ArrivalRecorder::new();
        assert!(recorder.record_at(&content(1, "x"), 1).is_none());

        recorder.begin("generate:s").unwrap();
        recorder.record_at(&content(1, "x"), 2).unwrap();
        recorder.finish().unwrap();

        assert!(recorder.record_at(&content(1, "x"), 3).is_none());
        assert!(recorder.record_at(&Envelope::complete("s", 2, 0).to_json().unwrap(), 4).is_none());

        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.stray_count(), 2);
        assert!(!recorder.complete_seen());
        assert_eq!(recorder.snapshot()[0].arrival_timestamp, 2);
    }

    #[tokio::test]
    async fn wait_for_completion_times_out_then_succeeds() {
        let recorder = Arc::new(ArrivalRecorder::new());
        recorder.begin("generate:w").unwrap();
        assert!(!recorder.wait_for_completion(Duration::from_millis(20)).await);

        let r = recorder.clone();
        let waiter = tokio::spawn(async move { r.wait_for_completion(Duration::from_secs(5)).await });
        tokio::task::yield_now().await;
        recorder.record(&Envelope::complete("run", 1, 0).to_json().unwrap());
        assert!(waiter.await.unwrap());
    }
}
