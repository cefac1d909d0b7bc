//! Source priority registry

use std::collections::BTreeMap;

use contracts::SourceId;

/// Source name -> priority. Higher wins; unregistered sources have none.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePriorities(BTreeMap<SourceId, i32>);

impl SourcePriorities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered priority, if any
    pub fn get(&self, source: &str) -> Option<i32> {
        self.0.get(source).copied()
    }

    /// Insert or overwrite
    pub fn set(&mut self, source: impl Into<SourceId>, priority: i32) {
        self.0.insert(source.into(), priority);
    }

    pub fn remove(&mut self, source: &str) -> Option<i32> {
        self.0.remove(source)
    }

    /// Highest registered priority
    pub fn max(&self) -> Option<i32> {
        self.0.values().copied().max()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceId, i32)> {
        self.0.iter().map(|(source, &p)| (source, p))
    }
}

impl From<&BTreeMap<String, i32>> for SourcePriorities {
    fn from(map: &BTreeMap<String, i32>) -> Self {
        Self(
            map.iter()
                .map(|(source, &p)| (SourceId::new(source), p))
                .collect(),
        )
    }
}

impl<S: Into<SourceId>> FromIterator<(S, i32)> for SourcePriorities {
    fn from_iter<I: IntoIterator<Item = (S, i32)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(s, p)| (s.into(), p)).collect())
    }
}
