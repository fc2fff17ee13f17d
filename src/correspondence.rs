//! Mapping between the ground-truth and predicted landmark numbering schemes.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Ground-truth index → predicted index for the 34-point lizard dorsal scheme.
const LIZARD_DORSAL: [(u32, u32); 34] = [
    (0, 0),
    (1, 1),
    (2, 12),
    (3, 23),
    (4, 28),
    (5, 29),
    (6, 30),
    (7, 31),
    (8, 32),
    (9, 33),
    (10, 2),
    (11, 3),
    (12, 4),
    (13, 5),
    (14, 6),
    (15, 7),
    (16, 8),
    (17, 9),
    (18, 10),
    (19, 11),
    (20, 13),
    (21, 14),
    (22, 15),
    (23, 16),
    (24, 17),
    (25, 18),
    (26, 19),
    (27, 20),
    (28, 21),
    (29, 22),
    (30, 24),
    (31, 25),
    (32, 26),
    (33, 27),
];

/// An injective mapping from ground-truth landmark indices to the indices
/// used by the predictor's output.
///
/// Serialized as a JSON object, e.g. `{"0": 0, "1": 1, "2": 12}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<u32, u32>", into = "BTreeMap<u32, u32>")]
pub struct CorrespondenceTable {
    map: BTreeMap<u32, u32>,
}

impl CorrespondenceTable {
    /// Build a table, rejecting maps that send two ground-truth indices to
    /// the same predicted index.
    pub fn new(map: BTreeMap<u32, u32>) -> Result<Self> {
        let mut seen = BTreeSet::new();
        for (&truth, &predicted) in &map {
            if !seen.insert(predicted) {
                return Err(Error::InvalidCorrespondence(format!(
                    "predicted index {} is targeted more than once (again by {})",
                    predicted, truth
                )));
            }
        }
        Ok(Self { map })
    }

    /// Identity mapping over `0..n`.
    pub fn identity(n: u32) -> Self {
        Self {
            map: (0..n).map(|i| (i, i)).collect(),
        }
    }

    /// The table used for the lizard dorsal landmark set.
    pub fn lizard_dorsal() -> Self {
        Self {
            map: LIZARD_DORSAL.iter().copied().collect(),
        }
    }

    pub fn predicted_index(&self, truth: u32) -> Option<u32> {
        self.map.get(&truth).copied()
    }

    /// Entries in ascending ground-truth order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.map.iter().map(|(&t, &p)| (t, p))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Default for CorrespondenceTable {
    fn default() -> Self {
        Self::lizard_dorsal()
    }
}

impl TryFrom<BTreeMap<u32, u32>> for CorrespondenceTable {
    type Error = Error;

    fn try_from(map: BTreeMap<u32, u32>) -> Result<Self> {
        Self::new(map)
    }
}

impl From<CorrespondenceTable> for BTreeMap<u32, u32> {
    fn from(table: CorrespondenceTable) -> Self {
        table.map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lizard_table_is_injective() {
        let table = CorrespondenceTable::lizard_dorsal();
        assert_eq!(table.len(), 34);
        assert_eq!(table.predicted_index(2), Some(12));
        assert_eq!(table.predicted_index(33), Some(27));
        assert_eq!(table.predicted_index(34), None);

        let rebuilt = CorrespondenceTable::new(table.clone().into()).unwrap();
        assert_eq!(rebuilt, table);
    }

    #[test]
    fn rejects_duplicate_targets() {
        let map = BTreeMap::from([(0, 5), (1, 5)]);
        assert!(matches!(
            CorrespondenceTable::new(map),
            Err(Error::InvalidCorrespondence(_))
        ));
    }

    #[test]
    fn json_round_trip_uses_string_keys() {
        let table = CorrespondenceTable::new(BTreeMap::from([(0, 0), (2, 12)])).unwrap();
        let json = serde_json::to_string(&table).unwrap();
        assert_eq!(json, r#"{"0":0,"2":12}"#);

        let back: CorrespondenceTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back, table);

        let bad = serde_json::from_str::<CorrespondenceTable>(r#"{"0":3,"1":3}"#);
        assert!(bad.is_err());
    }
}
