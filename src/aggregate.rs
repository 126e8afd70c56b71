use std::{
    cmp::{Ordering, Reverse},
    collections::{BinaryHeap, HashMap},
    sync::Arc,
};

use crate::validate::Record;

/// Running totals for one request path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PathStats {
    pub count: u64,
    pub size_sum: u128,
}

impl PathStats {
    /// Mean response size in bytes. `count` is at least 1 for any stored entry.
    pub fn mean(&self) -> f64 {
        self.size_sum as f64 / self.count.max(1) as f64
    }
}

/// Keyed counters that remember first-seen order. The index and the entry
/// list share one allocation per key.
#[derive(Debug, Clone)]
struct Tally<V> {
    index: HashMap<Arc<str>, usize>,
    entries: Vec<(Arc<str>, V)>,
}

impl<V> Default for Tally<V> {
    fn default() -> Self {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }
}

impl<V: Default> Tally<V> {
    fn entry(&mut self, key: &str) -> &mut V {
        let i = match self.index.get(key) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                let key: Arc<str> = Arc::from(key);
                self.index.insert(Arc::clone(&key), i);
                self.entries.push((key, V::default()));
                i
            }
        };
        &mut self.entries[i].1
    }
}

impl<V> Tally<V> {
    fn get(&self, key: &str) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }
}

/// Orders `f64` means totally so they can rank inside a heap.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Mean(f64);

impl Eq for Mean {}

impl PartialOrd for Mean {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Mean {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Indices of the best `n` entries by descending `rank`, earlier entries
/// winning ties. Keeps at most `n` candidates in memory.
fn top_n<V, K: Ord>(entries: &[(Arc<str>, V)], n: usize, rank: impl Fn(&V) -> K) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }

    let mut heap = BinaryHeap::with_capacity(n.min(entries.len()) + 1);
    for (i, (_, value)) in entries.iter().enumerate() {
        heap.push(Reverse((rank(value), Reverse(i))));
        if heap.len() > n {
            heap.pop();
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|Reverse((_, Reverse(i)))| i)
        .collect()
}

/// Streaming aggregate over every line of one run.
///
/// Memory grows with the number of distinct addresses and paths, never with
/// the number of lines.
#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    total_lines: u64,
    valid_lines: u64,
    failed_lines: u64,
    ip_counts: Tally<u64>,
    path_stats: Tally<PathStats>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one valid record.
    pub fn observe(&mut self, record: &Record) {
        self.total_lines += 1;
        self.valid_lines += 1;

        *self.ip_counts.entry(&record.client_address) += 1;

        let stats = self.path_stats.entry(&record.path);
        stats.count += 1;
        stats.size_sum += u128::from(record.response_size);
    }

    /// Account for one rejected line.
    pub fn observe_failure(&mut self) {
        self.total_lines += 1;
        self.failed_lines += 1;
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn valid_lines(&self) -> u64 {
        self.valid_lines
    }

    pub fn failed_lines(&self) -> u64 {
        self.failed_lines
    }

    pub fn address_count(&self, address: &str) -> Option<u64> {
        self.ip_counts.get(address).copied()
    }

    pub fn path_stats(&self, path: &str) -> Option<PathStats> {
        self.path_stats.get(path).copied()
    }

    /// Up to `n` addresses by descending count.
    pub fn top_addresses(&self, n: usize) -> Vec<(&str, u64)> {
        let entries = &self.ip_counts.entries;
        top_n(entries, n, |&count| count)
            .into_iter()
            .map(|i| (&*entries[i].0, entries[i].1))
            .collect()
    }

    /// Up to `n` paths by descending mean response size, unrounded.
    pub fn top_paths(&self, n: usize) -> Vec<(&str, f64)> {
        let entries = &self.path_stats.entries;
        top_n(entries, n, |stats| Mean(stats.mean()))
            .into_iter()
            .map(|i| (&*entries[i].0, entries[i].1.mean()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::user_agent::UserAgentTree;

    fn record(address: &str, path: &str, size: u64) -> Record {
        Record {
            client_address: address.to_string(),
            identifier: "-".to_string(),
            user: "-".to_string(),
            timestamp: "10/Oct/2020:13:55:36 -0700".to_string(),
            method: "GET".to_string(),
            path: path.to_string(),
            protocol: "HTTP/1.1".to_string(),
            status_code: 200,
            response_size: size,
            user_agent: UserAgentTree::default(),
        }
    }

    #[test]
    fn observe_should_work() {
        let mut state = AggregateState::new();
        state.observe(&record("192.168.50.183", "/apache_pb.gif", 3884));
        state.observe_failure();

        assert_eq!(state.total_lines(), 2);
        assert_eq!(state.valid_lines(), 1);
        assert_eq!(state.failed_lines(), 1);
        assert_eq!(state.address_count("192.168.50.183"), Some(1));
        assert_eq!(
            state.path_stats("/apache_pb.gif"),
            Some(PathStats {
                count: 1,
                size_sum: 3884
            })
        );
        assert_eq!(state.address_count("10.0.0.1"), None);
    }

    #[test]
    fn top_addresses_should_work() {
        let mut state = AggregateState::new();
        for address in ["a", "b", "b", "c", "c", "c", "d"] {
            state.observe(&record(address, "/", 1));
        }

        assert_eq!(state.top_addresses(2), vec![("c", 3), ("b", 2)]);
        assert_eq!(
            state.top_addresses(100),
            vec![("c", 3), ("b", 2), ("a", 1), ("d", 1)]
        );
        assert!(state.top_addresses(0).is_empty());
    }

    #[test]
    fn top_addresses_ties_keep_first_seen_order() {
        let mut state = AggregateState::new();
        for address in ["z", "y", "x", "x", "w", "y", "z"] {
            state.observe(&record(address, "/", 1));
        }

        assert_eq!(state.top_addresses(3), vec![("z", 2), ("y", 2), ("x", 2)]);
        assert_eq!(state.top_addresses(2), vec![("z", 2), ("y", 2)]);
        assert_eq!(state.top_addresses(4).last(), Some(&("w", 1)));
    }

    #[test]
    fn top_paths_should_work() {
        let mut state = AggregateState::new();
        state.observe(&record("a", "/p1", 100));
        state.observe(&record("a", "/p2", 50));
        state.observe(&record("a", "/p1", 200));
        state.observe(&record("a", "/p2", 450));

        assert_eq!(state.top_paths(1), vec![("/p2", 250.0)]);
        assert_eq!(state.top_paths(5), vec![("/p2", 250.0), ("/p1", 150.0)]);
        assert!(state.top_paths(0).is_empty());
    }

    #[test]
    fn top_paths_keep_full_precision() {
        let mut state = AggregateState::new();
        state.observe(&record("a", "/third", 1));
        state.observe(&record("a", "/third", 0));
        state.observe(&record("a", "/third", 0));
        state.observe(&record("a", "/tie", 5));
        state.observe(&record("a", "/tie2", 5));

        let top = state.top_paths(3);
        assert_eq!(top[0], ("/tie", 5.0));
        assert_eq!(top[1], ("/tie2", 5.0));
        assert_eq!(top[2].0, "/third");
        assert!((top[2].1 - 1.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn tally_key_is_stored_once() {
        let mut state = AggregateState::new();
        for _ in 0..3 {
            state.observe(&record("10.0.0.1", "/index.html", 10));
        }

        let (key, count) = &state.ip_counts.entries[0];
        assert_eq!(*count, 3);
        // one reference from the index, one from the entry list
        assert_eq!(Arc::strong_count(key), 2);
        let indexed = state.ip_counts.index.keys().next().map(|k| Arc::ptr_eq(k, key));
        assert_eq!(indexed, Some(true));
    }

    #[test]
    fn sums_match_valid_lines() {
        let mut state = AggregateState::new();
        for (i, address) in ["a", "b", "a", "c", "b", "a"].iter().enumerate() {
            state.observe(&record(address, &format!("/{}", i % 4), i as u64));
        }
        state.observe_failure();

        let ips: u64 = state.top_addresses(usize::MAX).iter().map(|(_, c)| c).sum();
        let paths: u64 = state.path_stats.entries.iter().map(|(_, s)| s.count).sum();
        assert_eq!(ips, state.valid_lines());
        assert_eq!(paths, state.valid_lines());
        assert_eq!(state.valid_lines() + state.failed_lines(), state.total_lines());
    }
}
