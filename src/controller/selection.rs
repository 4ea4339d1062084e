use std::collections::BTreeSet;

/// Row selection keyed by record id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection<K: Ord> {
    selected: BTreeSet<K>,
}

impl<K: Ord> Default for Selection<K> {
    fn default() -> Self {
        Self {
            selected: BTreeSet::new(),
        }
    }
}

impl<K: Ord + Clone> Selection<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_selected(ids: impl IntoIterator<Item = K>) -> Self {
        Self {
            selected: ids.into_iter().collect(),
        }
    }

    pub fn select(&mut self, id: K) {
        self.selected.insert(id);
    }

    pub fn deselect(&mut self, id: &K) {
        self.selected.remove(id);
    }

    pub fn toggle(&mut self, id: K) {
        if !self.selected.remove(&id) {
            self.selected.insert(id);
        }
    }

    /// Replaces the selection with exactly `ids`
    pub fn select_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a K>)
    where
        K: 'a,
    {
        self.selected = ids.into_iter().cloned().collect();
    }

    pub fn deselect_all(&mut self) {
        self.selected.clear();
    }

    /// Clears the selection when every id in `ids` is already selected,
    /// otherwise selects exactly `ids`.
    pub fn toggle_all(&mut self, ids: &[K]) {
        if ids.iter().all(|id| self.selected.contains(id)) {
            self.deselect_all();
        } else {
            self.select_all(ids);
        }
    }

    pub fn is_selected(&self, id: &K) -> bool {
        self.selected.contains(id)
    }

    pub fn selected(&self) -> Vec<K> {
        self.selected.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    /// Every visible id is selected (and there is at least one)
    pub fn is_all_selected(&self, ids: &[K]) -> bool {
        !ids.is_empty() && ids.iter().all(|id| self.selected.contains(id))
    }

    /// Some, but not all, visible ids are selected
    pub fn is_indeterminate(&self, ids: &[K]) -> bool {
        let count = ids.iter().filter(|id| self.selected.contains(id)).count();
        count > 0 && count < ids.len()
    }
}
