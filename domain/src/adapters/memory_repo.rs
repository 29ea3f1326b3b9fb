use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::{CoreError, Improvement, ImprovementId, ImprovementRepository};

/// Simple in-memory repository for tests. Not thread-safe for high
/// concurrency beyond the internal mutex guarding the map.
///
/// Mimics the remote store where it matters to callers: the primary-key
/// constraint on insert, date-descending ordering on reads, and zero-row
/// deletes as errors.
pub struct InMemoryRepo {
    inner: Mutex<BTreeMap<String, Improvement>>,
}

impl InMemoryRepo {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    fn sorted_newest_first(map: &BTreeMap<String, Improvement>) -> Vec<Improvement> {
        let mut all: Vec<_> = map.values().cloned().collect();
        all.sort_by(|a, b| b.original.date.cmp(&a.original.date));
        all
    }
}

impl Default for InMemoryRepo {
    fn default() -> Self {
        Self::new()
    }
}

impl ImprovementRepository for InMemoryRepo {
    fn add(&self, improvement: Improvement) -> Result<(), CoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let key = improvement.id.as_str().to_string();
        if map.contains_key(&key) {
            return Err(CoreError::AlreadyExists(key));
        }
        map.insert(key, improvement);
        Ok(())
    }

    fn add_all(&self, improvements: Vec<Improvement>) -> Result<(), CoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        // Like the store's transactional insert: any duplicate rejects the
        // whole batch before anything is written.
        for imp in &improvements {
            if map.contains_key(imp.id.as_str()) {
                return Err(CoreError::AlreadyExists(imp.id.as_str().to_string()));
            }
        }
        for imp in improvements {
            map.insert(imp.id.as_str().to_string(), imp);
        }
        Ok(())
    }

    fn get(&self, id: &ImprovementId) -> Result<Improvement, CoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        map.get(id.as_str())
            .cloned()
            .ok_or_else(|| CoreError::NotFound(id.as_str().to_string()))
    }

    fn get_all(&self, last_n: Option<usize>) -> Result<Vec<Improvement>, CoreError> {
        let map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let all = Self::sorted_newest_first(&map);
        Ok(match last_n {
            Some(n) => all.into_iter().take(n).collect(),
            None => all,
        })
    }

    fn remove(&self, id: &ImprovementId) -> Result<Improvement, CoreError> {
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        map.remove(id.as_str())
            .ok_or_else(|| CoreError::NotFound(id.as_str().to_string()))
    }

    fn remove_all(&self, ids: &[ImprovementId]) -> Result<Vec<Improvement>, CoreError> {
        if ids.is_empty() {
            return Err(CoreError::Repository("no ids to remove".into()));
        }
        let mut map = self
            .inner
            .lock()
            .map_err(|_| CoreError::Repository("mutex poisoned".into()))?;
        let mut removed = Vec::new();
        for id in ids {
            if let Some(imp) = map.remove(id.as_str()) {
                removed.push(imp);
            }
        }
        if removed.is_empty() {
            let joined = ids
                .iter()
                .map(ImprovementId::as_str)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CoreError::NotFound(joined));
        }
        Ok(removed)
    }
}
