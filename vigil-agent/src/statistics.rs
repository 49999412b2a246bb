//! Per-command execution statistics
//!
//! Updated by the scheduler on every accepted completion and read by the
//! health check. Entries are keyed by command name and can be walked in
//! order of last interval or last duration.

use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

pub type SharedStatistics = Arc<Mutex<CheckStatistics>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStat {
    pub command_name: String,
    pub last_check_interval: Duration,
    pub last_check_duration: Duration,
}

#[derive(Debug, Default)]
pub struct CheckStatistics {
    by_name: HashMap<String, CommandStat>,
    by_interval: BTreeSet<(Duration, String)>,
    by_duration: BTreeSet<(Duration, String)>,
}

impl CheckStatistics {
    pub fn shared() -> SharedStatistics {
        Arc::new(Mutex::new(Self::default()))
    }

    pub fn add_interval_stat(&mut self, command_name: &str, interval: Duration) {
        let stat = self.entry(command_name);
        let previous = std::mem::replace(&mut stat.last_check_interval, interval);
        self.by_interval.remove(&(previous, command_name.to_string()));
        self.by_interval.insert((interval, command_name.to_string()));
    }

    pub fn add_duration_stat(&mut self, command_name: &str, duration: Duration) {
        let stat = self.entry(command_name);
        let previous = std::mem::replace(&mut stat.last_check_duration, duration);
        self.by_duration.remove(&(previous, command_name.to_string()));
        self.by_duration.insert((duration, command_name.to_string()));
    }

    fn entry(&mut self, command_name: &str) -> &mut CommandStat {
        if !self.by_name.contains_key(command_name) {
            self.by_interval.insert((Duration::ZERO, command_name.to_string()));
            self.by_duration.insert((Duration::ZERO, command_name.to_string()));
        }
        self.by_name
            .entry(command_name.to_string())
            .or_insert_with(|| CommandStat {
                command_name: command_name.to_string(),
                last_check_interval: Duration::ZERO,
                last_check_duration: Duration::ZERO,
            })
    }

    pub fn get(&self, command_name: &str) -> Option<&CommandStat> {
        self.by_name.get(command_name)
    }

    pub fn remove(&mut self, command_name: &str) {
        if let Some(stat) = self.by_name.remove(command_name) {
            self.by_interval
                .remove(&(stat.last_check_interval, stat.command_name.clone()));
            self.by_duration
                .remove(&(stat.last_check_duration, stat.command_name));
        }
    }

    /// Drop every command the predicate rejects.
    pub fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) {
        let dropped: Vec<String> = self
            .by_name
            .keys()
            .filter(|name| !keep(name))
            .cloned()
            .collect();
        for name in dropped {
            self.remove(&name);
        }
    }

    /// Ascending by last interval, ties by command name.
    pub fn ordered_by_interval(&self) -> impl DoubleEndedIterator<Item = &CommandStat> {
        self.by_interval
            .iter()
            .filter_map(move |(_, name)| self.by_name.get(name))
    }

    /// Ascending by last duration, ties by command name.
    pub fn ordered_by_duration(&self) -> impl DoubleEndedIterator<Item = &CommandStat> {
        self.by_duration
            .iter()
            .filter_map(move |(_, name)| self.by_name.get(name))
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orderings_follow_updates() {
        let mut stats = CheckStatistics::default();
        stats.add_duration_stat("cmd_a", Duration::from_secs(5));
        stats.add_duration_stat("cmd_b", Duration::from_secs(2));
        stats.add_interval_stat("cmd_a", Duration::from_secs(10));
        stats.add_interval_stat("cmd_b", Duration::from_secs(30));

        let by_duration: Vec<_> = stats
            .ordered_by_duration()
            .map(|s| s.command_name.as_str())
            .collect();
        assert_eq!(by_duration, vec!["cmd_b", "cmd_a"]);

        stats.add_duration_stat("cmd_b", Duration::from_secs(9));
        let longest = stats.ordered_by_duration().next_back().unwrap();
        assert_eq!(longest.command_name, "cmd_b");

        let widest = stats.ordered_by_interval().next_back().unwrap();
        assert_eq!(widest.command_name, "cmd_b");
        assert_eq!(stats.len(), 2);
    }

    #[test]
    fn test_update_replaces_previous_value() {
        let mut stats = CheckStatistics::default();
        stats.add_duration_stat("cmd", Duration::from_secs(1));
        stats.add_duration_stat("cmd", Duration::from_secs(3));
        assert_eq!(stats.ordered_by_duration().count(), 1);
        assert_eq!(
            stats.get("cmd").unwrap().last_check_duration,
            Duration::from_secs(3)
        );
    }

    #[test]
    fn test_retain_drops_removed_commands() {
        let mut stats = CheckStatistics::default();
        stats.add_duration_stat("keep", Duration::from_secs(1));
        stats.add_duration_stat("drop", Duration::from_secs(2));
        stats.retain(|name| name == "keep");
        assert_eq!(stats.len(), 1);
        assert!(stats.get("drop").is_none());
        assert_eq!(stats.ordered_by_duration().count(), 1);
        assert_eq!(stats.ordered_by_interval().count(), 1);
    }
}
