//! In-memory quota map: two slots (alarm, limit) per bucket.

use std::collections::{BTreeMap, HashMap};

use edge_limit_types::{BucketQuota, QuotaKind, QuotaValues};
use serde::{Deserialize, Serialize};

/// Reserved bucket name carrying the fleet-wide total's alarm quota.
pub const TOTAL_BUCKET: &str = "TotalStatistic";

/// Alarm thresholds used for buckets without an explicit alarm quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmDefaults {
    /// Rate threshold (bytes per second)
    pub rate: u64,
    /// Connection threshold
    pub conn: u64,
    /// QPS threshold
    pub qps: u64,
}

impl Default for AlarmDefaults {
    fn default() -> Self {
        Self {
            rate: 52_428_800,
            conn: 50,
            qps: 200,
        }
    }
}

impl From<AlarmDefaults> for QuotaValues {
    fn from(d: AlarmDefaults) -> Self {
        QuotaValues::new(d.rate, d.conn, d.qps, 0)
    }
}

/// A bucket's two quota slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QuotaPair {
    /// Alerting threshold
    pub alarm: Option<QuotaValues>,
    /// Enforced ceiling
    pub limit: Option<QuotaValues>,
}

impl QuotaPair {
    /// The slot for `kind`.
    pub fn slot(&self, kind: QuotaKind) -> Option<QuotaValues> {
        match kind {
            QuotaKind::Alarm => self.alarm,
            QuotaKind::Limit => self.limit,
        }
    }

    fn slot_mut(&mut self, kind: QuotaKind) -> &mut Option<QuotaValues> {
        match kind {
            QuotaKind::Alarm => &mut self.alarm,
            QuotaKind::Limit => &mut self.limit,
        }
    }

    fn is_empty(&self) -> bool {
        self.alarm.is_none() && self.limit.is_none()
    }
}

/// What a [`QuotaMap::set`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetEffect {
    /// The values were stored in the slot.
    Stored,
    /// An all-zero limit cleared the slot.
    Cleared,
}

/// Bucket name to quota pair.
#[derive(Debug, Clone, Default)]
pub struct QuotaMap {
    entries: HashMap<String, QuotaPair>,
    defaults: AlarmDefaults,
}

impl QuotaMap {
    /// Create an empty map with the given alarm fallback.
    pub fn new(defaults: AlarmDefaults) -> Self {
        Self {
            entries: HashMap::new(),
            defaults,
        }
    }

    /// Global alarm fallback.
    pub fn defaults(&self) -> AlarmDefaults {
        self.defaults
    }

    /// Effective quota: the explicit slot, else the alarm defaults or all-zero
    /// (unlimited) for limits.
    pub fn get(&self, bucket_name: &str, kind: QuotaKind) -> QuotaValues {
        match self.explicit(bucket_name, kind) {
            Some(values) => values,
            None => match kind {
                QuotaKind::Alarm => self.defaults.into(),
                QuotaKind::Limit => QuotaValues::default(),
            },
        }
    }

    /// The explicit slot only, without fallback.
    pub fn explicit(&self, bucket_name: &str, kind: QuotaKind) -> Option<QuotaValues> {
        self.entries.get(bucket_name).and_then(|pair| pair.slot(kind))
    }

    /// Both explicit slots of a bucket.
    pub fn pair(&self, bucket_name: &str) -> QuotaPair {
        self.entries.get(bucket_name).copied().unwrap_or_default()
    }

    /// Store `values` in the bucket's `kind` slot.
    ///
    /// An all-zero limit clears the slot instead; a bucket left with no slots
    /// is forgotten.
    pub fn set(&mut self, bucket_name: &str, kind: QuotaKind, values: QuotaValues) -> SetEffect {
        if kind == QuotaKind::Limit && values.is_zero() {
            if let Some(pair) = self.entries.get_mut(bucket_name) {
                pair.limit = None;
                if pair.is_empty() {
                    self.entries.remove(bucket_name);
                }
            }
            return SetEffect::Cleared;
        }

        let pair = self.entries.entry(bucket_name.to_string()).or_default();
        *pair.slot_mut(kind) = Some(values);
        SetEffect::Stored
    }

    /// Replace the whole map with persisted records.
    pub fn load(&mut self, records: impl IntoIterator<Item = BucketQuota>) {
        self.entries.clear();
        for record in records {
            let values = record.values();
            self.set(&record.bucket_name, record.kind, values);
        }
    }

    /// Every explicit slot as a persistable record, ordered by bucket then kind.
    pub fn records(&self) -> Vec<BucketQuota> {
        let mut records: Vec<BucketQuota> = self
            .entries
            .iter()
            .flat_map(|(name, pair)| {
                QuotaKind::ALL.into_iter().filter_map(move |kind| {
                    pair.slot(kind)
                        .map(|values| BucketQuota::new(name.clone(), kind, values))
                })
            })
            .collect();
        records.sort_by(|a, b| {
            a.bucket_name
                .cmp(&b.bucket_name)
                .then_with(|| a.kind.cmp(&b.kind))
        });
        records
    }

    /// Every configured limit, keyed by bucket.
    pub fn limits(&self) -> BTreeMap<String, QuotaValues> {
        self.entries
            .iter()
            .filter_map(|(name, pair)| pair.limit.map(|values| (name.clone(), values)))
            .collect()
    }

    /// Number of buckets with at least one slot set.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no bucket has a quota.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(rate: u64, conn: u64, qps: u64) -> QuotaValues {
        QuotaValues::new(rate, conn, qps, 0)
    }

    #[test]
    fn missing_slots_fall_back() {
        let map = QuotaMap::new(AlarmDefaults::default());

        assert_eq!(map.get("b", QuotaKind::Alarm), v(52_428_800, 50, 200));
        assert_eq!(map.get("b", QuotaKind::Limit), QuotaValues::default());
        assert!(map.explicit("b", QuotaKind::Alarm).is_none());
    }

    #[test]
    fn set_fills_one_slot_only() {
        let mut map = QuotaMap::default();
        assert_eq!(map.set("b", QuotaKind::Limit, v(1000, 10, 100)), SetEffect::Stored);

        assert_eq!(map.get("b", QuotaKind::Limit), v(1000, 10, 100));
        assert_eq!(map.get("b", QuotaKind::Alarm), QuotaValues::from(map.defaults()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn zero_limit_clears_slot() {
        let mut map = QuotaMap::default();
        map.set("b", QuotaKind::Limit, v(1000, 10, 100));
        map.set("b", QuotaKind::Alarm, v(1, 1, 1));

        assert_eq!(
            map.set("b", QuotaKind::Limit, QuotaValues::default()),
            SetEffect::Cleared
        );

        assert!(map.explicit("b", QuotaKind::Limit).is_none());
        assert_eq!(map.get("b", QuotaKind::Limit), QuotaValues::default());
        assert!(map.limits().is_empty());
        assert_eq!(map.explicit("b", QuotaKind::Alarm), Some(v(1, 1, 1)));
    }

    #[test]
    fn clearing_last_slot_forgets_bucket() {
        let mut map = QuotaMap::default();
        map.set("b", QuotaKind::Limit, v(1, 1, 1));
        map.set("b", QuotaKind::Limit, QuotaValues::default());
        assert!(map.is_empty());
        assert!(map.records().is_empty());
    }

    #[test]
    fn zero_alarm_is_stored_explicitly() {
        let mut map = QuotaMap::default();
        assert_eq!(
            map.set("b", QuotaKind::Alarm, QuotaValues::default()),
            SetEffect::Stored
        );
        assert_eq!(map.get("b", QuotaKind::Alarm), QuotaValues::default());
    }

    #[test]
    fn records_round_trip_through_load() {
        let mut map = QuotaMap::default();
        map.set("z", QuotaKind::Alarm, v(3, 3, 3));
        map.set("a", QuotaKind::Limit, v(2, 2, 2));
        map.set("a", QuotaKind::Alarm, v(1, 1, 1));

        let records = map.records();
        let order: Vec<_> = records
            .iter()
            .map(|r| (r.bucket_name.as_str(), r.kind))
            .collect();
        assert_eq!(
            order,
            vec![
                ("a", QuotaKind::Alarm),
                ("a", QuotaKind::Limit),
                ("z", QuotaKind::Alarm)
            ]
        );

        let mut reloaded = QuotaMap::default();
        reloaded.set("stale", QuotaKind::Alarm, v(9, 9, 9));
        reloaded.load(records);
        assert_eq!(reloaded.records(), map.records());
    }
}
