//! Algorithm weight configuration.
//!
//! The packing service scores candidate placements with a fixed set of named
//! weights. The key set is closed: `WeightKey` enumerates it and a `WeightSet`
//! stores exactly one value per key, so foreign keys can never enter the store.

use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::model::ValidationError;

/// Named tuning parameter of the packing algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WeightKey {
    Lifo,
    SimL,
    SimW,
    SimH,
    LeftoverLRatio,
    LeftoverWRatio,
    PackableL,
    PackableW,
}

impl WeightKey {
    pub const COUNT: usize = 8;

    /// All keys in their canonical order.
    pub const ALL: [WeightKey; Self::COUNT] = [
        WeightKey::Lifo,
        WeightKey::SimL,
        WeightKey::SimW,
        WeightKey::SimH,
        WeightKey::LeftoverLRatio,
        WeightKey::LeftoverWRatio,
        WeightKey::PackableL,
        WeightKey::PackableW,
    ];

    /// Wire name used by the packing service.
    pub fn as_str(self) -> &'static str {
        match self {
            WeightKey::Lifo => "W_lifo",
            WeightKey::SimL => "W_sim_l",
            WeightKey::SimW => "W_sim_w",
            WeightKey::SimH => "W_sim_h",
            WeightKey::LeftoverLRatio => "W_leftover_l_ratio",
            WeightKey::LeftoverWRatio => "W_leftover_w_ratio",
            WeightKey::PackableL => "W_packable_l",
            WeightKey::PackableW => "W_packable_w",
        }
    }

    pub fn default_value(self) -> f64 {
        match self {
            WeightKey::Lifo => 10.0,
            WeightKey::SimL => -1.0,
            WeightKey::SimW => -1.0,
            WeightKey::SimH => 0.0,
            WeightKey::LeftoverLRatio => -5.0,
            WeightKey::LeftoverWRatio => -5.0,
            WeightKey::PackableL => -0.5,
            WeightKey::PackableW => -0.5,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl FromStr for WeightKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WeightKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownWeightKey(s.to_string()))
    }
}

impl std::fmt::Display for WeightKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for WeightKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One value per `WeightKey`.
///
/// Serializes as a JSON object in canonical key order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightSet {
    values: [f64; WeightKey::COUNT],
}

impl WeightSet {
    /// The default weights used for reset and for filling missing keys.
    pub fn defaults() -> Self {
        let mut values = [0.0; WeightKey::COUNT];
        for key in WeightKey::ALL {
            values[key.index()] = key.default_value();
        }
        Self { values }
    }

    pub fn get(&self, key: WeightKey) -> f64 {
        self.values[key.index()]
    }

    pub fn set(&mut self, key: WeightKey, value: f64) {
        self.values[key.index()] = value;
    }

    pub fn iter(&self) -> impl Iterator<Item = (WeightKey, f64)> + '_ {
        WeightKey::ALL.into_iter().map(|key| (key, self.get(key)))
    }

    /// Builds a set from an external mapping.
    ///
    /// Unknown keys and known keys with non-numeric or non-finite values are
    /// reported; their slots keep the default.
    pub fn from_partial(partial: &Map<String, Value>) -> WeightUpdate {
        let mut accepted = WeightSet::defaults();
        let mut rejected_keys = Vec::new();

        for (name, raw) in partial {
            match name.parse::<WeightKey>() {
                Ok(key) => match raw.as_f64().filter(|v| v.is_finite()) {
                    Some(value) => accepted.set(key, value),
                    None => rejected_keys.push(name.clone()),
                },
                Err(_) => rejected_keys.push(name.clone()),
            }
        }

        WeightUpdate {
            accepted,
            rejected_keys,
        }
    }

    /// Converts to a JSON object map.
    pub fn to_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(key, value)| (key.as_str().to_string(), Value::from(value)))
            .collect()
    }
}

impl Default for WeightSet {
    fn default() -> Self {
        Self::defaults()
    }
}

impl Serialize for WeightSet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(WeightKey::COUNT))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key.as_str(), &value)?;
        }
        map.end()
    }
}

/// Outcome of replacing the whole weight set.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct WeightUpdate {
    #[schema(value_type = Object)]
    pub accepted: WeightSet,
    pub rejected_keys: Vec<String>,
}

/// One differing key between two weight sets.
#[derive(Clone, Debug, PartialEq, Serialize, ToSchema)]
pub struct WeightDifference {
    #[schema(value_type = String)]
    pub key: WeightKey,
    pub a: f64,
    pub b: f64,
    /// `b - a`
    pub delta: f64,
}

/// Holds the current algorithm weights of a session.
#[derive(Clone, Debug, Default)]
pub struct WeightStore {
    current: WeightSet,
}

impl WeightStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> WeightSet {
        self.current
    }

    /// Replaces the current weights with the known keys of `partial`.
    ///
    /// Never fails; rejected keys are returned and logged.
    pub fn set(&mut self, partial: &Map<String, Value>) -> WeightUpdate {
        let update = WeightSet::from_partial(partial);
        if !update.rejected_keys.is_empty() {
            eprintln!(
                "⚠️ Ignoring invalid weight keys: {}",
                update.rejected_keys.join(", ")
            );
        }
        self.current = update.accepted;
        update
    }

    /// Updates a single weight from raw user input.
    pub fn update_one(&mut self, key: &str, raw_value: &str) -> Result<WeightSet, ValidationError> {
        let key = key.parse::<WeightKey>()?;
        let value = raw_value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| {
                ValidationError::InvalidWeightValue(format!("{} = '{}'", key, raw_value))
            })?;
        self.current.set(key, value);
        Ok(self.current)
    }

    pub fn reset_to_defaults(&mut self) -> WeightSet {
        self.current = WeightSet::defaults();
        self.current
    }

    pub fn is_default(&self) -> bool {
        self.current == WeightSet::defaults()
    }

    /// Returns a randomized candidate without touching the stored weights.
    ///
    /// Every value is multiplied by `1 + u` with `u` uniform in
    /// `[-max_fractional_change, +max_fractional_change]`. With a seed the
    /// result is reproducible for the same current weights.
    pub fn randomize(
        &self,
        max_fractional_change: f64,
        seed: Option<u64>,
    ) -> Result<WeightSet, ValidationError> {
        if !(max_fractional_change > 0.0 && max_fractional_change <= 1.0) {
            return Err(ValidationError::InvalidConfiguration(format!(
                "max fractional change must be in (0, 1], got: {}",
                max_fractional_change
            )));
        }

        let candidate = match seed {
            Some(seed) => {
                let mut rng = StdRng::seed_from_u64(seed);
                randomize_with(&self.current, max_fractional_change, &mut rng)
            }
            None => randomize_with(
                &self.current,
                max_fractional_change,
                &mut rand::thread_rng(),
            ),
        };
        Ok(candidate)
    }

    /// Lists the keys whose values differ, `a` being the current weights.
    pub fn diff(&self, other: &WeightSet) -> Vec<WeightDifference> {
        self.current
            .iter()
            .zip(other.iter())
            .filter(|((_, a), (_, b))| a != b)
            .map(|((key, a), (_, b))| WeightDifference {
                key,
                a,
                b,
                delta: b - a,
            })
            .collect()
    }

    /// Imports weights from an exported document.
    ///
    /// Looks under `algorithm_weights`, `weights`, `parameters.weights` and
    /// `parameters.algorithm_weights`, then falls back to the top level.
    pub fn import_document(&mut self, document: &Value) -> Result<WeightUpdate, ValidationError> {
        let candidates = [
            document.get("algorithm_weights"),
            document.get("weights"),
            document.get("parameters").and_then(|p| p.get("weights")),
            document
                .get("parameters")
                .and_then(|p| p.get("algorithm_weights")),
            Some(document),
        ];

        let weights = candidates
            .into_iter()
            .flatten()
            .find_map(Value::as_object)
            .ok_or_else(|| {
                ValidationError::InvalidConfiguration(
                    "No valid weights found in imported data".to_string(),
                )
            })?;
        Ok(self.set(weights))
    }
}

fn randomize_with<R: Rng + ?Sized>(current: &WeightSet, max_change: f64, rng: &mut R) -> WeightSet {
    let mut candidate = *current;
    for (key, value) in current.iter() {
        let change = rng.gen_range(-max_change..=max_change);
        candidate.set(key, value * (1.0 + change));
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("test value must be an object")
    }

    #[test]
    fn reset_restores_every_default() {
        let mut store = WeightStore::new();
        store.update_one("W_lifo", "42").unwrap();
        store.update_one("W_sim_h", "-3.5").unwrap();
        assert!(!store.is_default());

        store.reset_to_defaults();
        let current = store.get();
        for key in WeightKey::ALL {
            assert_eq!(current.get(key), key.default_value(), "key {} differs", key);
        }
        assert!(store.is_default());
    }

    #[test]
    fn set_drops_unknown_keys_and_fills_missing() {
        let mut store = WeightStore::new();
        let update = store.set(&as_map(json!({
            "W_lifo": 3.0,
            "W_unknown": 1.0,
            "W_sim_l": "not a number"
        })));

        assert_eq!(update.accepted.get(WeightKey::Lifo), 3.0);
        assert_eq!(update.accepted.get(WeightKey::SimL), -1.0);
        assert_eq!(update.accepted.get(WeightKey::PackableW), -0.5);
        let mut rejected = update.rejected_keys.clone();
        rejected.sort();
        assert_eq!(rejected, vec!["W_sim_l".to_string(), "W_unknown".to_string()]);
        assert_eq!(store.get(), update.accepted);
    }

    #[test]
    fn update_one_rejects_unknown_key_and_bad_value() {
        let mut store = WeightStore::new();
        assert_eq!(
            store.update_one("W_nope", "1"),
            Err(ValidationError::UnknownWeightKey("W_nope".to_string()))
        );
        assert!(matches!(
            store.update_one("W_lifo", "abc"),
            Err(ValidationError::InvalidWeightValue(_))
        ));
        assert!(store.update_one("W_lifo", "inf").is_err());
        assert!(store.is_default(), "failed updates must not change the store");

        let updated = store.update_one("W_lifo", " 12.5 ").unwrap();
        assert_eq!(updated.get(WeightKey::Lifo), 12.5);
    }

    #[test]
    fn seeded_randomize_is_reproducible() {
        let store = WeightStore::new();
        let first = store.randomize(0.3, Some(42)).unwrap();
        let second = store.randomize(0.3, Some(42)).unwrap();
        assert_eq!(first, second);
        assert!(store.is_default(), "randomize must not mutate the store");
    }

    #[test]
    fn randomize_stays_within_bounds() {
        let store = WeightStore::new();
        for seed in 0..50 {
            let candidate = store.randomize(0.3, Some(seed)).unwrap();
            for (key, value) in candidate.iter() {
                let base = key.default_value();
                let low = (base * 0.7).min(base * 1.3);
                let high = (base * 0.7).max(base * 1.3);
                assert!(
                    value >= low - 1e-9 && value <= high + 1e-9,
                    "{} = {} outside [{}, {}] for seed {}",
                    key,
                    value,
                    low,
                    high,
                    seed
                );
            }
        }
    }

    #[test]
    fn unseeded_randomize_stays_within_bounds_and_leaves_store_untouched() {
        let store = WeightStore::new();
        let first = store.randomize(0.3, None).unwrap();
        let second = store.randomize(0.3, None).unwrap();
        for candidate in [first, second] {
            for (key, value) in candidate.iter() {
                let base = key.default_value();
                let low = (base * 0.7).min(base * 1.3);
                let high = (base * 0.7).max(base * 1.3);
                assert!(
                    value >= low - 1e-9 && value <= high + 1e-9,
                    "{} = {} outside [{}, {}]",
                    key,
                    value,
                    low,
                    high
                );
            }
        }
        assert!(store.is_default(), "randomize must not mutate the store");
    }

    #[test]
    fn randomize_rejects_out_of_range_fraction() {
        let store = WeightStore::new();
        assert!(store.randomize(0.0, None).is_err());
        assert!(store.randomize(1.5, Some(1)).is_err());
        assert!(store.randomize(f64::NAN, Some(1)).is_err());
        assert!(store.randomize(1.0, None).is_ok());
    }

    #[test]
    fn diff_reports_only_changed_keys() {
        let store = WeightStore::new();
        let mut other = WeightSet::defaults();
        other.set(WeightKey::SimW, 1.0);

        let diff = store.diff(&other);
        assert_eq!(
            diff,
            vec![WeightDifference {
                key: WeightKey::SimW,
                a: -1.0,
                b: 1.0,
                delta: 2.0,
            }]
        );
        assert!(store.diff(&WeightSet::defaults()).is_empty());
    }

    #[test]
    fn import_document_finds_nested_weights() {
        let mut store = WeightStore::new();
        store
            .import_document(&json!({"parameters": {"weights": {"W_lifo": 7.0}}}))
            .unwrap();
        assert_eq!(store.get().get(WeightKey::Lifo), 7.0);

        store
            .import_document(&json!({"algorithm_weights": {"W_sim_h": 2.0}}))
            .unwrap();
        assert_eq!(store.get().get(WeightKey::SimH), 2.0);
        assert_eq!(store.get().get(WeightKey::Lifo), 10.0);

        assert!(store.import_document(&json!([1, 2, 3])).is_err());
    }

    #[test]
    fn weight_set_serializes_in_key_order() {
        let text = serde_json::to_string(&WeightSet::defaults()).unwrap();
        assert!(text.starts_with(r#"{"W_lifo":10.0,"W_sim_l":-1.0"#), "{}", text);
    }
}
