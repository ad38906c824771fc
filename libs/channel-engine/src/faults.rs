use std::collections::HashSet;

use serde::Deserialize;

/// Что channel делает с конкретным publish'ем.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    Deliver,
    /// Publish успешен, но подписчики ничего не получают.
    Drop,
    /// Доставить дважды.
    Duplicate,
    /// Придержать до следующего publish'а (переупорядочивание).
    Hold,
    /// Publish завершается ошибкой транспорта.
    Fail,
}

/// Набор искажений loopback channel'а по sequenceId.
///
/// Нужен, чтобы прогонять harness против channel'а с известными
/// дефектами и проверять, что verifier их находит. Пустой план означает
/// честный in-order exactly-once channel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FaultPlan {
    #[serde(default)]
    pub drop: HashSet<i64>,
    #[serde(default)]
    pub duplicate: HashSet<i64>,
    #[serde(default)]
    pub hold: HashSet<i64>,
    #[serde(default)]
    pub fail: HashSet<i64>,
}

impl FaultPlan {
    pub fn is_empty(&self) -> bool {
        self.drop.is_empty() && self.duplicate.is_empty() && self.hold.is_empty() && self.fail.is_empty()
    }

    /// Решение для payload'а. Payload без `data.sequenceId` доставляется как есть.
    /// Если id попал в несколько списков: fail > drop > hold > duplicate.
    pub fn decide(&self, payload: &serde_json::Value) -> FaultAction {
        let Some(seq) = sequence_of(payload) else {
            return FaultAction::Deliver;
        };
        if self.fail.contains(&seq) {
            FaultAction::Fail
        } else if self.drop.contains(&seq) {
            FaultAction::Drop
        } else if self.hold.contains(&seq) {
            FaultAction::Hold
        } else if self.duplicate.contains(&seq) {
            FaultAction::Duplicate
        } else {
            FaultAction::Deliver
        }
    }
}

pub(crate) fn sequence_of(payload: &serde_json::Value) -> Option<i64> {
    payload.get("data")?.get("sequenceId")?.as_i64()
}
