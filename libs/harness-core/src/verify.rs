//! Delivery verification: a pure diff of the arrival log against the
//! manifest. Same inputs always give the same result; nothing here reads
//! a clock or mutates its arguments.

use std::collections::BTreeMap;

use serde::Serialize;

use harness_api::EventType;

use crate::{ArrivalRecord, LatencyStats, Manifest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMismatch {
    pub arrival_index: u64,
    pub sequence_id: i64,
    /// None: sequenceId нет среди content-сообщений manifest'а.
    pub expected_byte_size: Option<u64>,
    pub observed_byte_size: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    /// N+1: content-сообщения плюс completion marker.
    pub expected_count: usize,
    pub received_count: usize,
    pub in_order: bool,
    /// arrivalIndex первой записи, чей sequenceId не больше предыдущего.
    pub first_out_of_order_index: Option<u64>,
    pub missing: Vec<i64>,
    pub duplicates: Vec<i64>,
    pub duplicate_count: u64,
    /// Наблюдённые sequenceId вне 1..=N+1.
    pub unexpected: Vec<i64>,
    pub mismatches: Vec<ContentMismatch>,
    pub complete_observed: bool,
    /// sequenceId в порядке прибытия.
    pub arrival_order: Vec<i64>,
    /// arrivalTimestamp − senderTimestamp.
    pub lag: LatencyStats,
    /// Интервалы между соседними прибытиями.
    pub inter_arrival: LatencyStats,
}

impl VerificationResult {
    /// In order, complete, exactly once, every size matches.
    pub fn is_clean(&self) -> bool {
        self.in_order
            && self.missing.is_empty()
            && self.duplicate_count == 0
            && self.unexpected.is_empty()
            && self.mismatches.is_empty()
    }
}

/// Совпадает ли наблюдённый размер с manifest'ом.
/// Completion marker совпадает всегда.
pub fn content_matches(manifest: &Manifest, arrival: &ArrivalRecord) -> bool {
    match arrival.event_type {
        EventType::Complete => true,
        EventType::Content => {
            manifest.expected_size(arrival.sequence_id) == Some(arrival.observed_byte_size)
        }
    }
}

pub fn verify(manifest: &Manifest, arrivals: &[ArrivalRecord]) -> VerificationResult {
    // Порядок определяет только arrival_index, не порядок элементов среза.
    let mut log: Vec<&ArrivalRecord> = arrivals.iter().collect();
    log.sort_by_key(|r| r.arrival_index);

    // --- Ordering ---
    let first_out_of_order_index = log
        .windows(2)
        .find(|w| w[1].sequence_id <= w[0].sequence_id)
        .map(|w| w[1].arrival_index);

    // --- Completeness / duplication ---
    let mut occurrences: BTreeMap<i64, u64> = BTreeMap::new();
    for r in &log {
        *occurrences.entry(r.sequence_id).or_default() += 1;
    }
    let missing: Vec<i64> = manifest
        .sequence_ids()
        .filter(|id| !occurrences.contains_key(id))
        .collect();
    let duplicated: Vec<(i64, u64)> = occurrences
        .iter()
        .filter(|&(&id, &n)| id > 0 && n > 1)
        .map(|(&id, &n)| (id, n))
        .collect();
    let duplicate_count: u64 = duplicated.iter().map(|&(_, n)| n - 1).sum();
    let duplicates: Vec<i64> = duplicated.into_iter().map(|(id, _)| id).collect();
    let unexpected: Vec<i64> = occurrences
        .keys()
        .copied()
        .filter(|id| !manifest.contains(*id))
        .collect();

    // --- Content match ---
    let mismatches: Vec<ContentMismatch> = log
        .iter()
        .filter(|r| !content_matches(manifest, r))
        .map(|r| ContentMismatch {
            arrival_index: r.arrival_index,
            sequence_id: r.sequence_id,
            expected_byte_size: manifest.expected_size(r.sequence_id),
            observed_byte_size: r.observed_byte_size,
        })
        .collect();

    // --- Latency ---
    let lag = LatencyStats::from_samples(log.iter().filter_map(|r| {
        r.sender_timestamp
            .map(|sent| (r.arrival_timestamp - sent).max(0) as f64)
    }));
    let inter_arrival = LatencyStats::from_samples(
        log.windows(2)
            .map(|w| (w[1].arrival_timestamp - w[0].arrival_timestamp).max(0) as f64),
    );

    VerificationResult {
        expected_count: manifest.entry_count(),
        received_count: log.len(),
        in_order: first_out_of_order_index.is_none(),
        first_out_of_order_index,
        missing,
        duplicates,
        duplicate_count,
        unexpected,
        mismatches,
        complete_observed: log.iter().any(|r| r.event_type == EventType::Complete),
        arrival_order: log.iter().map(|r| r.sequence_id).collect(),
        lag,
        inter_arrival,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival(index: u64, seq: i64, manifest: &Manifest) -> ArrivalRecord {
        let is_complete = seq == manifest.completion_sequence_id();
        ArrivalRecord {
            sequence_id: seq,
            event_type: if is_complete { EventType::Complete } else { EventType::Content },
            observed_byte_size: manifest.expected_size(seq).unwrap_or(0),
            arrival_index: index,
            arrival_timestamp: 1_000 + index as i64 * 10,
            sender_timestamp: Some(1_000),
        }
    }

    fn log_of(seqs: &[i64], manifest: &Manifest) -> Vec<ArrivalRecord> {
        seqs.iter()
            .enumerate()
            .map(|(i, &seq)| arrival(i as u64 + 1, seq, manifest))
            .collect()
    }

    #[test]
    fn clean_stream() {
        let manifest = Manifest::from_sizes(&[3, 4, 5]);
        let result = verify(&manifest, &log_of(&[1, 2, 3, 4], &manifest));
        assert!(result.is_clean());
        assert!(result.complete_observed);
        assert_eq!(result.expected_count, 4);
        assert_eq!(result.received_count, 4);
        assert_eq!(result.arrival_order, vec![1, 2, 3, 4]);
        assert_eq!(result.lag.min, 10.0);
        assert_eq!(result.lag.max, 40.0);
        assert_eq!(result.inter_arrival.samples, 3);
        assert_eq!(result.inter_arrival.mean, 10.0);
    }

    #[test]
    fn flags_first_out_of_order_arrival() {
        let manifest = Manifest::from_sizes(&[1, 1, 1, 1]);
        let result = verify(&manifest, &log_of(&[1, 2, 4, 3, 5], &manifest));
        assert!(!result.in_order);
        assert_eq!(result.first_out_of_order_index, Some(4));
        assert!(result.missing.is_empty());
        assert!(!result.is_clean());
    }

    #[test]
    fn ordering_follows_arrival_index_not_slice_order() {
        let manifest = Manifest::from_sizes(&[1, 1]);
        let mut log = log_of(&[1, 2, 3], &manifest);
        log.reverse();
        let result = verify(&manifest, &log);
        assert!(result.in_order);
        assert_eq!(result.arrival_order, vec![1, 2, 3]);
    }

    #[test]
    fn missing_and_duplicates() {
        let manifest = Manifest::from_sizes(&[10, 10, 10, 10, 10]);
        let result = verify(&manifest, &log_of(&[1, 2, 2, 3, 5, 6], &manifest));
        assert_eq!(result.missing, vec![4]);
        assert_eq!(result.duplicates, vec![2]);
        assert_eq!(result.duplicate_count, 1);
        // A repeated id is not strictly greater than its predecessor.
        assert_eq!(result.first_out_of_order_index, Some(3));
    }

    #[test]
    fn duplicate_count_sums_extra_occurrences() {
        let manifest = Manifest::from_sizes(&[1, 1]);
        let result = verify(&manifest, &log_of(&[1, 1, 1, 2, 2, 3], &manifest));
        assert_eq!(result.duplicates, vec![1, 2]);
        assert_eq!(result.duplicate_count, 3);
    }

    #[test]
    fn content_size_mismatch() {
        let manifest = Manifest::from_sizes(&[50, 60, 120]);
        let mut short = arrival(1, 3, &manifest);
        short.observed_byte_size = 119;
        let exact = arrival(2, 3, &manifest);
        assert!(!content_matches(&manifest, &short));
        assert!(content_matches(&manifest, &exact));

        let result = verify(&manifest, &[short, exact]);
        assert_eq!(
            result.mismatches,
            vec![ContentMismatch {
                arrival_index: 1,
                sequence_id: 3,
                expected_byte_size: Some(120),
                observed_byte_size: 119,
            }]
        );
    }

    #[test]
    fn completion_marker_always_matches() {
        let manifest = Manifest::from_sizes(&[5]);
        let mut marker = arrival(1, 2, &manifest);
        marker.observed_byte_size = 999;
        assert!(content_matches(&manifest, &marker));
    }

    #[test]
    fn unknown_ids_are_unexpected_and_mismatched() {
        let manifest = Manifest::from_sizes(&[5]);
        let mut stray = arrival(1, 9, &manifest);
        stray.event_type = EventType::Content;
        let mut garbage = arrival(2, -1, &manifest);
        garbage.event_type = EventType::Content;
        let result = verify(&manifest, &[stray, garbage]);
        assert_eq!(result.unexpected, vec![-1, 9]);
        assert_eq!(result.missing, vec![1, 2]);
        assert_eq!(result.mismatches.len(), 2);
        // Ids <= 0 never count as duplicates.
        assert_eq!(result.duplicate_count, 0);
    }

    #[test]
    fn empty_log_reports_everything_missing() {
        let manifest = Manifest::from_sizes(&[1, 2]);
        let result = verify(&manifest, &[]);
        assert_eq!(result.missing, vec![1, 2, 3]);
        assert!(result.in_order);
        assert!(!result.complete_observed);
        assert_eq!(result.lag, LatencyStats::default());
        assert_eq!(result.inter_arrival, LatencyStats::default());
    }

    #[test]
    fn verify_is_idempotent() {
        let manifest = Manifest::from_sizes(&[7, 8, 9]);
        let log = log_of(&[2, 1, 1, 4], &manifest);
        let a = verify(&manifest, &log);
        let b = verify(&manifest, &log);
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
