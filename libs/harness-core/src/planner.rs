use serde::Serialize;

use crate::HarnessError;

// ═══════════════════════════════════════════════════════════════
//  Manifest
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDescriptor {
    pub sequence_id: i64,
    pub byte_size: u64,
}

/// Элемент manifest'а в порядке sequenceId.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestEntry {
    Content(MessageDescriptor),
    Complete { sequence_id: i64 },
}

impl ManifestEntry {
    pub fn sequence_id(&self) -> i64 {
        match self {
            ManifestEntry::Content(d) => d.sequence_id,
            ManifestEntry::Complete { sequence_id } => *sequence_id,
        }
    }
}

/// План прогона: N descriptor'ов с sequenceId 1..N и завершающий
/// completion marker с sequenceId N+1. Создаётся через [`plan`] или
/// [`Manifest::from_sizes`], поэтому диапазон id всегда непрерывный.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    messages: Vec<MessageDescriptor>,
    completion_sequence_id: i64,
}

impl Manifest {
    /// Число content-сообщений (N).
    pub fn count(&self) -> usize {
        self.messages.len()
    }

    /// Число элементов вместе с completion marker (N+1).
    pub fn entry_count(&self) -> usize {
        self.messages.len() + 1
    }

    /// Manifest из уже известных размеров (например, `sizes` из ответа
    /// control surface). sequenceId назначаются по порядку.
    pub fn from_sizes(sizes: &[u64]) -> Self {
        let messages: Vec<MessageDescriptor> = sizes
            .iter()
            .enumerate()
            .map(|(i, &byte_size)| MessageDescriptor {
                sequence_id: i as i64 + 1,
                byte_size,
            })
            .collect();
        let completion_sequence_id = messages.len() as i64 + 1;
        Self { messages, completion_sequence_id }
    }

    pub fn messages(&self) -> &[MessageDescriptor] {
        &self.messages
    }

    pub fn completion_sequence_id(&self) -> i64 {
        self.completion_sequence_id
    }

    /// Размеры в порядке отправки.
    pub fn sizes(&self) -> Vec<u64> {
        self.messages.iter().map(|m| m.byte_size).collect()
    }

    /// Ожидаемый размер content для sequenceId; None для completion marker
    /// и id вне manifest'а.
    pub fn expected_size(&self, sequence_id: i64) -> Option<u64> {
        if sequence_id < 1 {
            return None;
        }
        self.messages
            .get((sequence_id - 1) as usize)
            .map(|m| m.byte_size)
    }

    /// Все ожидаемые sequenceId: 1..=N+1.
    pub fn sequence_ids(&self) -> std::ops::RangeInclusive<i64> {
        1..=self.completion_sequence_id
    }

    pub fn contains(&self, sequence_id: i64) -> bool {
        self.sequence_ids().contains(&sequence_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = ManifestEntry> + '_ {
        self.messages
            .iter()
            .copied()
            .map(ManifestEntry::Content)
            .chain(std::iter::once(ManifestEntry::Complete {
                sequence_id: self.completion_sequence_id,
            }))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Planner
// ═══════════════════════════════════════════════════════════════

/// Построить manifest: `count` сообщений с размером, равномерно
/// выбранным из `[min_size, max_size]` (включительно).
pub fn plan(count: i64, min_size: i64, max_size: i64, rng: &mut Rng) -> Result<Manifest, HarnessError> {
    if count < 0 {
        return Err(HarnessError::InvalidParameters(format!(
            "count must be >= 0, got {count}"
        )));
    }
    if min_size < 0 {
        return Err(HarnessError::InvalidParameters(format!(
            "minSize must be >= 0, got {min_size}"
        )));
    }
    if max_size < min_size {
        return Err(HarnessError::InvalidParameters(format!(
            "maxSize ({max_size}) must be >= minSize ({min_size})"
        )));
    }

    let messages = (1..=count)
        .map(|sequence_id| MessageDescriptor {
            sequence_id,
            byte_size: rng.next_in_range(min_size as u64, max_size as u64),
        })
        .collect();

    Ok(Manifest {
        messages,
        completion_sequence_id: count + 1,
    })
}

// ═══════════════════════════════════════════════════════════════
//  RNG (xorshift64)
// ═══════════════════════════════════════════════════════════════

/// Seeded PRNG: одинаковый seed даёт одинаковый manifest.
pub struct Rng {
    state: u64,
}

impl Rng {
    /// `seed == 0`: seed от текущего времени.
    pub fn new(seed: i64) -> Self {
        let state = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos() as u64
                | 1 // ensure non-zero
        } else {
            seed as u64
        };
        Self { state }
    }

    fn next_u64(&mut self) -> u64 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        self.state
    }

    /// Returns u64 in [lo, hi]
    pub fn next_in_range(&mut self, lo: u64, hi: u64) -> u64 {
        let span = hi - lo;
        if span == u64::MAX {
            return self.next_u64();
        }
        lo + self.next_u64() % (span + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_ids_are_contiguous_with_completion_marker() {
        for count in [0i64, 1, 2, 17, 100] {
            let manifest = plan(count, 1, 5000, &mut Rng::new(42)).unwrap();
            assert_eq!(manifest.entry_count(), count as usize + 1);
            let ids: Vec<i64> = manifest.entries().map(|e| e.sequence_id()).collect();
            let expected: Vec<i64> = (1..=count + 1).collect();
            assert_eq!(ids, expected);
            assert_eq!(
                manifest.entries().last(),
                Some(ManifestEntry::Complete { sequence_id: count + 1 })
            );
        }
    }

    #[test]
    fn sizes_stay_within_inclusive_bounds() {
        let manifest = plan(500, 10, 12, &mut Rng::new(7)).unwrap();
        assert!(manifest.sizes().iter().all(|s| (10..=12).contains(s)));
        // 500 draws over three values hit both ends.
        assert!(manifest.sizes().contains(&10));
        assert!(manifest.sizes().contains(&12));

        let fixed = plan(5, 0, 0, &mut Rng::new(7)).unwrap();
        assert_eq!(fixed.sizes(), vec![0; 5]);
    }

    #[test]
    fn same_seed_same_manifest() {
        let a = plan(50, 1, 5000, &mut Rng::new(1234)).unwrap();
        let b = plan(50, 1, 5000, &mut Rng::new(1234)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_invalid_bounds() {
        let mut rng = Rng::new(1);
        assert!(matches!(plan(-1, 0, 10, &mut rng), Err(HarnessError::InvalidParameters(_))));
        assert!(matches!(plan(3, 10, 9, &mut rng), Err(HarnessError::InvalidParameters(_))));
        assert!(matches!(plan(3, -5, 9, &mut rng), Err(HarnessError::InvalidParameters(_))));
    }

    #[test]
    fn from_sizes_numbers_in_order() {
        let manifest = Manifest::from_sizes(&[5, 0, 7]);
        assert_eq!(manifest.messages()[2], MessageDescriptor { sequence_id: 3, byte_size: 7 });
        assert_eq!(manifest.completion_sequence_id(), 4);
        assert_eq!(Manifest::from_sizes(&[]).entry_count(), 1);
    }

    #[test]
    fn expected_size_lookup() {
        let manifest = plan(3, 100, 100, &mut Rng::new(3)).unwrap();
        assert_eq!(manifest.expected_size(1), Some(100));
        assert_eq!(manifest.expected_size(3), Some(100));
        assert_eq!(manifest.expected_size(4), None);
        assert_eq!(manifest.expected_size(0), None);
        assert_eq!(manifest.expected_size(-1), None);
        assert_eq!(manifest.completion_sequence_id(), 4);
        assert!(manifest.contains(4));
        assert!(!manifest.contains(5));
    }
}
