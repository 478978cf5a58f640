//
// Copyright (c) The Netmgr Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::fmt::Debug;

use itertools::Itertools;

// Entry stored in a versioned set.
//
// The key carries the entry's identity fields only; runtime bits (enabled
// flags, back-references) stay out of it so that a re-added entry pairs with
// its previous incarnation.
pub trait SetEntry {
    type Key: Ord + Clone + Debug;

    fn key(&self) -> Self::Key;
}

// Ordered keyed set with update epochs.
//
// Between `update` and `flush` added entries are staged; `flush` then emits
// one delta per key present in either epoch, in ascending key order. Outside
// an epoch `add` applies immediately and fires the callback right away.
//
// Delta callbacks receive `(new, old)`: the new entry stays owned by the set
// and is handed out mutably, the old entry is passed by value and dropped
// when the callback returns.
#[derive(Debug)]
pub struct VSet<T: SetEntry> {
    entries: BTreeMap<T::Key, T>,
    staged: Option<BTreeMap<T::Key, T>>,
}

// Epoched list without keyed deduplication, used for DNS state: `flush`
// discards all prior-epoch entries wholesale.
#[derive(Debug)]
pub struct SimpleList<T> {
    entries: Vec<T>,
    staged: Option<Vec<T>>,
}

// ===== impl VSet =====

impl<T: SetEntry> VSet<T> {
    pub fn new() -> VSet<T> {
        Default::default()
    }

    // Opens a new epoch: all current entries become stale until re-added.
    pub fn update(&mut self) {
        self.staged = Some(BTreeMap::new());
    }

    pub fn is_updating(&self) -> bool {
        self.staged.is_some()
    }

    pub fn add<F>(&mut self, entry: T, cb: F)
    where
        F: FnOnce(Option<&mut T>, Option<T>),
    {
        let key = entry.key();
        match self.staged.as_mut() {
            Some(staged) => {
                // Re-adding the same key within one epoch replaces the
                // pending entry immediately.
                let prev = staged.insert(key.clone(), entry);
                if prev.is_some() {
                    cb(staged.get_mut(&key), prev);
                }
            }
            None => {
                let prev = self.entries.insert(key.clone(), entry);
                cb(self.entries.get_mut(&key), prev);
            }
        }
    }

    // Closes the epoch. Emits, in ascending key order, `(Some, None)` for
    // added keys, `(None, Some)` for keys not re-added, and `(Some, Some)`
    // with distinct storage for keys present in both epochs. A no-op when no
    // epoch is open.
    pub fn flush<F>(&mut self, mut cb: F)
    where
        F: FnMut(Option<&mut T>, Option<T>),
    {
        let Some(staged) = self.staged.take() else {
            return;
        };
        let mut old = std::mem::replace(&mut self.entries, staged);

        let keys: Vec<_> = self
            .entries
            .keys()
            .cloned()
            .merge(old.keys().cloned())
            .dedup()
            .collect();
        for key in keys {
            let old_entry = old.remove(&key);
            cb(self.entries.get_mut(&key), old_entry);
        }
    }

    // Empties both epochs, synthesizing a removal for every entry.
    pub fn flush_all<F>(&mut self, mut cb: F)
    where
        F: FnMut(Option<&mut T>, Option<T>),
    {
        self.staged = None;
        let old = std::mem::take(&mut self.entries);
        for (_, entry) in old {
            cb(None, Some(entry));
        }
    }

    pub fn get<Q>(&self, key: &Q) -> Option<&T>
    where
        T::Key: std::borrow::Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get(key)
    }

    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut T>
    where
        T::Key: std::borrow::Borrow<Q>,
        Q: Ord + ?Sized,
    {
        self.entries.get_mut(key)
    }

    // Visits current entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.values_mut()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: SetEntry> Default for VSet<T> {
    fn default() -> VSet<T> {
        VSet {
            entries: BTreeMap::new(),
            staged: None,
        }
    }
}

// ===== impl SimpleList =====

impl<T> SimpleList<T> {
    pub fn new() -> SimpleList<T> {
        Default::default()
    }

    pub fn update(&mut self) {
        self.staged = Some(Vec::new());
    }

    pub fn add(&mut self, value: T) {
        match self.staged.as_mut() {
            Some(staged) => staged.push(value),
            None => self.entries.push(value),
        }
    }

    // Closes the epoch, dropping all prior-epoch entries.
    pub fn flush(&mut self) {
        if let Some(staged) = self.staged.take() {
            self.entries = staged;
        }
    }

    pub fn flush_all(&mut self) {
        self.staged = None;
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for SimpleList<T> {
    fn default() -> SimpleList<T> {
        SimpleList {
            entries: Vec::new(),
            staged: None,
        }
    }
}

// ===== tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Eq, PartialEq)]
    struct Entry {
        key: u32,
        tag: &'static str,
    }

    impl Entry {
        fn new(key: u32, tag: &'static str) -> Entry {
            Entry { key, tag }
        }
    }

    impl SetEntry for Entry {
        type Key = u32;

        fn key(&self) -> u32 {
            self.key
        }
    }

    type Delta = (Option<Entry>, Option<Entry>);

    fn record(deltas: &mut Vec<Delta>, new: Option<&mut Entry>, old: Option<Entry>) {
        deltas.push((new.map(|entry| entry.clone()), old));
    }

    #[test]
    fn flush_emits_one_delta_per_touched_key() {
        let mut set = VSet::new();
        set.update();
        set.add(Entry::new(1, "pre"), |_, _| unreachable!());
        set.add(Entry::new(2, "pre"), |_, _| unreachable!());
        set.flush(|_, _| ());

        // pre = {1, 2}, post = {2, 3}.
        let mut deltas = Vec::new();
        set.update();
        set.add(Entry::new(2, "post"), |_, _| unreachable!());
        set.add(Entry::new(3, "post"), |_, _| unreachable!());
        set.flush(|new, old| record(&mut deltas, new, old));

        assert_eq!(deltas.len(), 3);
        assert_eq!(deltas[0], (None, Some(Entry::new(1, "pre"))));
        assert_eq!(
            deltas[1],
            (Some(Entry::new(2, "post")), Some(Entry::new(2, "pre")))
        );
        assert_eq!(deltas[2], (Some(Entry::new(3, "post")), None));
    }

    #[test]
    fn flush_delivers_in_ascending_key_order() {
        let mut set = VSet::new();
        let mut keys = Vec::new();
        set.update();
        for key in [5, 1, 9, 3, 7] {
            set.add(Entry::new(key, "a"), |_, _| unreachable!());
        }
        set.flush(|new, old| {
            keys.push(new.map(|entry| entry.key).or(old.map(|entry| entry.key)));
        });
        assert_eq!(keys, vec![Some(1), Some(3), Some(5), Some(7), Some(9)]);
    }

    #[test]
    fn add_outside_epoch_fires_immediately() {
        let mut set = VSet::new();
        let mut deltas = Vec::new();
        set.add(Entry::new(1, "a"), |new, old| record(&mut deltas, new, old));
        set.add(Entry::new(1, "b"), |new, old| record(&mut deltas, new, old));

        assert_eq!(deltas[0], (Some(Entry::new(1, "a")), None));
        assert_eq!(deltas[1], (Some(Entry::new(1, "b")), Some(Entry::new(1, "a"))));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn duplicate_add_within_epoch_replaces_pending_entry() {
        let mut set = VSet::new();
        let mut deltas = Vec::new();
        set.update();
        set.add(Entry::new(1, "first"), |_, _| unreachable!());
        set.add(Entry::new(1, "second"), |new, old| {
            record(&mut deltas, new, old)
        });
        assert_eq!(
            deltas,
            vec![(Some(Entry::new(1, "second")), Some(Entry::new(1, "first")))]
        );

        deltas.clear();
        set.flush(|new, old| record(&mut deltas, new, old));
        assert_eq!(deltas, vec![(Some(Entry::new(1, "second")), None)]);
    }

    #[test]
    fn flush_without_update_is_a_noop() {
        let mut set = VSet::new();
        set.add(Entry::new(1, "a"), |_, _| ());
        set.flush(|_, _| unreachable!());
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn flush_all_synthesizes_removals() {
        let mut set = VSet::new();
        set.add(Entry::new(1, "a"), |_, _| ());
        set.add(Entry::new(2, "b"), |_, _| ());

        // Entries staged in an open epoch are dropped without a callback.
        set.update();
        set.add(Entry::new(3, "c"), |_, _| unreachable!());

        let mut deltas = Vec::new();
        set.flush_all(|new, old| record(&mut deltas, new, old));
        assert_eq!(
            deltas,
            vec![
                (None, Some(Entry::new(1, "a"))),
                (None, Some(Entry::new(2, "b"))),
            ]
        );
        assert!(set.is_empty());
        assert!(!set.is_updating());
    }

    #[test]
    fn simple_list_epochs() {
        let mut list = SimpleList::new();
        list.add("a");
        list.add("b");
        assert_eq!(list.iter().count(), 2);

        list.update();
        list.add("c");
        list.flush();
        assert_eq!(list.iter().copied().collect::<Vec<_>>(), vec!["c"]);

        // flush without update keeps the current entries.
        list.flush();
        assert_eq!(list.iter().count(), 1);

        list.flush_all();
        assert!(list.is_empty());
    }
}
