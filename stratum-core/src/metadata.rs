//! # Metadata
//!
//! Free-form key/value entries attached to a layer (author, source, copyright...). When layers
//! are merged, their stores are combined by a [`MergeStrategy`] picked by name.

use std::collections::BTreeMap;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MetadataStore {
    entries: BTreeMap<String, String>,
}
impl MetadataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }
    /// Set an entry, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(key.into(), value.into())
    }
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }
    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MetadataStore {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self {
            entries: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StrategyError {
    #[error("no metadata merge strategy named {0:?}")]
    Unknown(String),
}

/// Policy for combining metadata of merged layers. Looked up by its registry name, e.g.
/// `"PriorityToFirst".parse::<MergeStrategy>()`.
#[derive(
    strum::EnumString,
    strum::AsRefStr,
    strum::EnumIter,
    strum::Display,
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    Default,
)]
pub enum MergeStrategy {
    /// Discard everything.
    #[default]
    Drop,
    /// Every key is kept, the first (lowest) layer providing it wins.
    PriorityToFirst,
    /// Only entries present in every layer with the same value are kept.
    OnlyIdentical,
    /// Every key is kept. Conflicting values are joined in stacking order.
    Union,
}
impl MergeStrategy {
    pub fn by_name(name: &str) -> Result<Self, StrategyError> {
        name.parse()
            .map_err(|_| StrategyError::Unknown(name.to_owned()))
    }
    /// Combine `stores`, ordered from the bottom-most layer up.
    #[must_use]
    pub fn merge(self, stores: &[&MetadataStore]) -> MetadataStore {
        match self {
            Self::Drop => MetadataStore::new(),
            Self::PriorityToFirst => {
                let mut out = MetadataStore::new();
                for store in stores {
                    for (key, value) in store.iter() {
                        out.entries
                            .entry(key.to_owned())
                            .or_insert_with(|| value.to_owned());
                    }
                }
                out
            }
            Self::OnlyIdentical => {
                let Some((first, rest)) = stores.split_first() else {
                    return MetadataStore::new();
                };
                first
                    .iter()
                    .filter(|(key, value)| rest.iter().all(|other| other.get(key) == Some(*value)))
                    .collect()
            }
            Self::Union => {
                let mut values = BTreeMap::<&str, Vec<&str>>::new();
                for store in stores {
                    for (key, value) in store.iter() {
                        let seen = values.entry(key).or_default();
                        if !seen.contains(&value) {
                            seen.push(value);
                        }
                    }
                }
                values
                    .into_iter()
                    .map(|(key, values)| (key, values.join("; ")))
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stores() -> (MetadataStore, MetadataStore) {
        let lower = [("author", "ann"), ("license", "cc-by")].into_iter().collect();
        let upper = [("author", "bo"), ("license", "cc-by"), ("tool", "pen")]
            .into_iter()
            .collect();
        (lower, upper)
    }
    #[test]
    fn strategies() {
        let (lower, upper) = stores();
        let both = [&lower, &upper];

        assert!(MergeStrategy::Drop.merge(&both).is_empty());

        let first = MergeStrategy::PriorityToFirst.merge(&both);
        assert_eq!(first.get("author"), Some("ann"));
        assert_eq!(first.get("tool"), Some("pen"));

        let identical = MergeStrategy::OnlyIdentical.merge(&both);
        assert_eq!(identical.len(), 1);
        assert_eq!(identical.get("license"), Some("cc-by"));

        let union = MergeStrategy::Union.merge(&both);
        assert_eq!(union.get("author"), Some("ann; bo"));
        assert_eq!(union.get("license"), Some("cc-by"));
    }
    #[test]
    fn lookup_by_name() {
        assert_eq!(MergeStrategy::by_name("Union"), Ok(MergeStrategy::Union));
        assert_eq!(
            MergeStrategy::by_name("SmartMerge"),
            Err(StrategyError::Unknown("SmartMerge".into()))
        );
    }
}
