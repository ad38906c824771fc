use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use harness_core::{ArrivalRecord, ArrivalRecorder, HarnessError, RunOutcome, VerificationResult};

struct RunSlot {
    recorder: Arc<ArrivalRecorder>,
    outcome: Option<Arc<RunOutcome>>,
}

/// Снимок прогона для `GET /api/runs/{id}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunView {
    pub channel_id: String,
    pub active: bool,
    pub arrivals: Vec<ArrivalRecord>,
    /// None пока прогон не завершён.
    pub verification: Option<VerificationResult>,
    pub timed_out: Option<bool>,
}

/// Прогоны по channelId. Один recorder на channelId: второй прогон
/// того же channelId, пока первый активен, отвергается recorder'ом.
#[derive(Default)]
pub struct RunRegistry {
    runs: Mutex<HashMap<String, RunSlot>>,
}

impl RunRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RunSlot>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Recorder для нового прогона. Outcome предыдущего прогона
    /// забывается, если recorder свободен: иначе view смешал бы живой
    /// журнал нового прогона со старой verification.
    pub fn recorder(&self, channel_id: &str) -> Arc<ArrivalRecorder> {
        let mut runs = self.lock();
        let slot = runs
            .entry(channel_id.to_string())
            .or_insert_with(|| RunSlot {
                recorder: Arc::new(ArrivalRecorder::new()),
                outcome: None,
            });
        if !slot.recorder.is_active() {
            slot.outcome = None;
        }
        slot.recorder.clone()
    }

    pub fn complete(&self, channel_id: &str, recorder: Arc<ArrivalRecorder>, outcome: Arc<RunOutcome>) {
        self.lock().insert(
            channel_id.to_string(),
            RunSlot {
                recorder,
                outcome: Some(outcome),
            },
        );
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn view(&self, channel_id: &str) -> Option<RunView> {
        let runs = self.lock();
        let slot = runs.get(channel_id)?;
        Some(RunView {
            channel_id: channel_id.to_string(),
            active: slot.recorder.is_active(),
            arrivals: slot.recorder.snapshot(),
            verification: slot.outcome.as_ref().map(|o| o.verification.clone()),
            timed_out: slot.outcome.as_ref().map(|o| o.timed_out),
        })
    }

    /// Сбросить журнал и забыть прогон. `Ok(false)`: channelId неизвестен.
    pub fn reset(&self, channel_id: &str) -> Result<bool, HarnessError> {
        let mut runs = self.lock();
        let Some(slot) = runs.get(channel_id) else {
            return Ok(false);
        };
        slot.recorder.reset()?;
        runs.remove(channel_id);
        Ok(true)
    }
}
