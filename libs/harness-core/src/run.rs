use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use harness_api::{
    BackpressurePolicy, ChannelPublisher, ChannelSubscriber, DEFAULT_EVENT_NAME, OverflowPolicy,
    channel_key,
};

use crate::{
    ArrivalRecord, ArrivalRecorder, EmissionConfig, EmissionController, EmissionReport,
    HarnessError, Manifest, Rng, VerificationResult, plan, spawn_arrival_task, verify,
};

// ═══════════════════════════════════════════════════════════════
//  Request / settings
// ═══════════════════════════════════════════════════════════════

/// Параметры одного прогона, как они приходят по HTTP или из CLI.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub channel_id: String,
    pub count: i64,
    pub min_size: i64,
    pub max_size: i64,
    #[serde(default)]
    pub backpressure_mode: BackpressurePolicy,
    /// None или 0: seed от текущего времени.
    #[serde(default)]
    pub seed: Option<i64>,
    /// Сколько ждать completion marker после emission.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Пауза после каждого content-publish'а.
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl RunRequest {
    pub fn validate(&self, limits: &RunLimits) -> Result<(), HarnessError> {
        if self.channel_id.trim().is_empty() {
            return Err(HarnessError::InvalidParameters(
                "channelId must not be empty".into(),
            ));
        }
        if self.count < 0 {
            return Err(HarnessError::InvalidParameters(format!(
                "count must be >= 0, got {}",
                self.count
            )));
        }
        if self.count as u64 > limits.max_count {
            return Err(HarnessError::InvalidParameters(format!(
                "count {} exceeds limit {}",
                self.count, limits.max_count
            )));
        }
        if self.min_size < 0 {
            return Err(HarnessError::InvalidParameters(format!(
                "minSize must be >= 0, got {}",
                self.min_size
            )));
        }
        if self.max_size < self.min_size {
            return Err(HarnessError::InvalidParameters(format!(
                "maxSize ({}) must be >= minSize ({})",
                self.max_size, self.min_size
            )));
        }
        if self.max_size as u64 > limits.max_message_bytes {
            return Err(HarnessError::InvalidParameters(format!(
                "maxSize {} exceeds limit {}",
                self.max_size, limits.max_message_bytes
            )));
        }
        Ok(())
    }
}

/// Верхние границы workload'а, принимаемого от клиента.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub max_count: u64,
    pub max_message_bytes: u64,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_count: 100_000,
            max_message_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub event_name: String,
    pub subscriber_buffer: usize,
    pub subscriber_overflow: OverflowPolicy,
    pub max_in_flight: usize,
    pub publish_timeout: Option<Duration>,
    /// Ожидание completion marker, если запрос не задал своё.
    pub run_timeout: Duration,
    pub limits: RunLimits,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            event_name: DEFAULT_EVENT_NAME.to_string(),
            subscriber_buffer: 4096,
            subscriber_overflow: OverflowPolicy::BackPressure,
            max_in_flight: 0,
            publish_timeout: None,
            run_timeout: Duration::from_millis(30_000),
            limits: RunLimits::default(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Outcome
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub report: EmissionReport,
    pub arrivals: Vec<ArrivalRecord>,
    pub verification: VerificationResult,
    /// Completion marker не пришёл за отведённое время.
    pub timed_out: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe_error: Option<String>,
}

// ═══════════════════════════════════════════════════════════════
//  Harness
// ═══════════════════════════════════════════════════════════════

/// Активный прогон на recorder'е. Если future `execute` бросили на
/// полпути (клиент отключился), Drop останавливает arrival task и
/// завершает recorder, иначе channelId остался бы занят навсегда.
struct ActiveRun {
    recorder: Arc<ArrivalRecorder>,
    token: CancellationToken,
    key: String,
    settled: bool,
}

impl ActiveRun {
    fn begin(recorder: Arc<ArrivalRecorder>, key: &str) -> Result<Self, HarnessError> {
        recorder.begin(key)?;
        Ok(Self {
            recorder,
            token: CancellationToken::new(),
            key: key.to_string(),
            settled: false,
        })
    }

    fn finish(&mut self) -> Result<(), HarnessError> {
        self.settled = true;
        self.recorder.finish()
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.token.cancel();
        if !self.settled && self.recorder.finish().is_ok() {
            tracing::warn!(channel = %self.key, "run abandoned before completion");
        }
    }
}

/// Оркестрация одного прогона: planner → recorder → emitter → verify.
pub struct Harness {
    publisher: Arc<dyn ChannelPublisher>,
    subscriber: Arc<dyn ChannelSubscriber>,
    settings: RunSettings,
}

impl Harness {
    pub fn new(
        publisher: Arc<dyn ChannelPublisher>,
        subscriber: Arc<dyn ChannelSubscriber>,
        settings: RunSettings,
    ) -> Self {
        Self { publisher, subscriber, settings }
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    /// Проверить запрос и построить manifest. Ничего не публикует.
    pub fn prepare(&self, request: &RunRequest) -> Result<Manifest, HarnessError> {
        request.validate(&self.settings.limits)?;
        let mut rng = Rng::new(request.seed.unwrap_or(0));
        plan(request.count, request.min_size, request.max_size, &mut rng)
    }

    /// Прогон с собственным recorder'ом.
    pub async fn run(&self, request: &RunRequest) -> Result<RunOutcome, HarnessError> {
        let manifest = self.prepare(request)?;
        let recorder = Arc::new(ArrivalRecorder::new());
        self.execute(request, manifest, recorder).await
    }

    /// Выполнить прогон по готовому manifest'у.
    ///
    /// Recorder подписывается до первого publish'а. Ошибка подписки не
    /// прерывает прогон: emission всё равно выполняется, а в outcome
    /// попадает `subscribe_error` и пустой журнал.
    pub async fn execute(
        &self,
        request: &RunRequest,
        manifest: Manifest,
        recorder: Arc<ArrivalRecorder>,
    ) -> Result<RunOutcome, HarnessError> {
        let key = channel_key(&request.channel_id);
        let mut active = ActiveRun::begin(recorder.clone(), &key)?;

        let subscribed = self
            .subscriber
            .subscribe(
                &key,
                std::slice::from_ref(&self.settings.event_name),
                self.settings.subscriber_buffer,
                self.settings.subscriber_overflow,
            )
            .await;
        let (pump, subscribe_error) = match subscribed {
            Ok(subscription) => (
                Some(spawn_arrival_task(recorder.clone(), subscription, active.token.clone())),
                None,
            ),
            Err(source) => {
                let e = HarnessError::Transport { context: format!("subscribe {key}"), source };
                tracing::warn!(channel = %key, error = %e, "subscribe failed, arrivals will not be recorded");
                (None, Some(e.to_string()))
            }
        };

        let controller = EmissionController::new(
            self.publisher.clone(),
            EmissionConfig {
                event_name: self.settings.event_name.clone(),
                max_in_flight: self.settings.max_in_flight,
                publish_timeout: self.settings.publish_timeout,
                delay: Duration::from_millis(request.delay_ms.unwrap_or(0)),
            },
        );
        let report = controller
            .run(&request.channel_id, manifest, request.backpressure_mode)
            .await;

        let wait = request
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.settings.run_timeout);
        let completed = match pump {
            Some(_) => recorder.wait_for_completion(wait).await,
            None => false,
        };

        active.token.cancel();
        if let Some(pump) = pump {
            if let Err(e) = pump.await {
                tracing::warn!(channel = %key, error = %e, "arrival task failed");
            }
        }
        active.finish()?;

        let arrivals = recorder.snapshot();
        let verification = verify(&report.manifest, &arrivals);

        if !completed {
            tracing::warn!(
                channel = %key,
                wait_ms = wait.as_millis() as u64,
                received = arrivals.len(),
                "completion marker not observed"
            );
        }
        if verification.is_clean() {
            tracing::info!(
                channel = %key,
                received = verification.received_count,
                lag_p95_ms = verification.lag.p95,
                "delivery verified"
            );
        } else {
            tracing::warn!(
                channel = %key,
                in_order = verification.in_order,
                missing = verification.missing.len(),
                duplicates = verification.duplicate_count,
                unexpected = verification.unexpected.len(),
                mismatches = verification.mismatches.len(),
                "delivery anomalies detected"
            );
        }

        Ok(RunOutcome {
            report,
            arrivals,
            verification,
            timed_out: !completed,
            subscribe_error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(count: i64, min: i64, max: i64) -> RunRequest {
        RunRequest {
            channel_id: "unit".into(),
            count,
            min_size: min,
            max_size: max,
            backpressure_mode: BackpressurePolicy::default(),
            seed: Some(7),
            timeout_ms: None,
            delay_ms: None,
        }
    }

    #[test]
    fn request_deserializes_with_defaults() {
        let req: RunRequest = serde_json::from_str(
            r#"{"channelId":"abc","count":3,"minSize":1,"maxSize":10}"#,
        )
        .unwrap();
        assert_eq!(req.backpressure_mode, BackpressurePolicy::AwaitEach);
        assert_eq!(req.seed, None);

        let req: RunRequest = serde_json::from_str(
            r#"{"channelId":"abc","count":3,"minSize":1,"maxSize":10,"backpressureMode":"fire-and-forget","delayMs":5}"#,
        )
        .unwrap();
        assert_eq!(req.backpressure_mode, BackpressurePolicy::FireAndForget);
        assert_eq!(req.delay_ms, Some(5));
    }

    #[test]
    fn validate_enforces_bounds_and_limits() {
        let limits = RunLimits { max_count: 10, max_message_bytes: 100 };
        assert!(request(10, 0, 100).validate(&limits).is_ok());
        assert!(request(0, 0, 0).validate(&limits).is_ok());

        for bad in [
            request(-1, 0, 10),
            request(11, 0, 10),
            request(1, -1, 10),
            request(1, 10, 9),
            request(1, 0, 101),
        ] {
            assert!(matches!(bad.validate(&limits), Err(HarnessError::InvalidParameters(_))));
        }

        let mut blank = request(1, 0, 1);
        blank.channel_id = "  ".into();
        assert!(matches!(blank.validate(&limits), Err(HarnessError::InvalidParameters(_))));
    }
}
