use crate::command::ExitCode;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

/// Lifecycle of a spawned process: `Running → {Exited, Killed}`.
///
/// A process is registered once spawned, so it is `Running` from the start. A kill
/// request evicts the entry at once; `Killed` is what its supervisor reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Exited(ExitCode),
    Killed,
}

/// Which map a tracked process lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    Running,
    Background,
}

/// Snapshot of one background job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInfo {
    pub pid: u32,
    pub name: String,
    pub state: ProcessState,
}

/// Outcome of moving a background job to the foreground.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Foreground {
    Moved(String),
    AlreadyExited(ExitCode),
    NotFound,
}

#[derive(Debug)]
struct Entry {
    serial: u64,
    name: String,
    state: ProcessState,
    kill: CancellationToken,
}

#[derive(Debug, Default)]
struct Maps {
    running: HashMap<u32, Entry>,
    background: HashMap<u32, Entry>,
}

impl Maps {
    fn get_mut(&mut self, pid: u32) -> Option<&mut Entry> {
        if self.running.contains_key(&pid) {
            self.running.get_mut(&pid)
        } else {
            self.background.get_mut(&pid)
        }
    }
}

/// Two disjoint pid maps shared between the foreground caller and supervisor tasks.
///
/// Every operation takes the lock once and works by key, so a concurrent removal is
/// never observed half-done. Entries carry the spawn serial of their process; clean-up
/// for an old process never evicts a newer one that reused the pid.
#[derive(Debug, Clone, Default)]
pub(crate) struct Registry {
    maps: Arc<Mutex<Maps>>,
    serial: Arc<AtomicU64>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, Maps> {
        self.maps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a freshly spawned process. Returns its spawn serial.
    pub fn insert(
        &self,
        pid: u32,
        name: &str,
        placement: Placement,
        kill: CancellationToken,
    ) -> u64 {
        let serial = self.serial.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            serial,
            name: name.to_string(),
            state: ProcessState::Running,
            kill,
        };
        let mut maps = self.lock();
        // A stale entry under a reused pid is dropped from both maps.
        maps.running.remove(&pid);
        maps.background.remove(&pid);
        match placement {
            Placement::Running => maps.running.insert(pid, entry),
            Placement::Background => maps.background.insert(pid, entry),
        };
        log::debug!("tracking pid {pid} ({name}) as {placement:?}");
        serial
    }

    /// Record the final state of a process, if it is still tracked.
    pub fn finish(&self, pid: u32, serial: u64, state: ProcessState) {
        let mut maps = self.lock();
        if let Some(entry) = maps.get_mut(pid).filter(|e| e.serial == serial) {
            entry.state = state;
        }
    }

    /// Stop tracking a process.
    pub fn remove(&self, pid: u32, serial: u64) {
        let mut maps = self.lock();
        if maps.running.get(&pid).is_some_and(|e| e.serial == serial) {
            maps.running.remove(&pid);
        } else if maps.background.get(&pid).is_some_and(|e| e.serial == serial) {
            maps.background.remove(&pid);
        }
    }

    /// Request termination of a tracked process and evict it.
    ///
    /// Running processes are looked up first, then background jobs.
    pub fn kill(&self, pid: u32) -> bool {
        let entry = {
            let mut maps = self.lock();
            maps.running
                .remove(&pid)
                .or_else(|| maps.background.remove(&pid))
        };
        match entry {
            Some(entry) => {
                log::debug!("kill requested for tracked pid {pid} ({})", entry.name);
                entry.kill.cancel();
                true
            }
            None => false,
        }
    }

    pub fn to_foreground(&self, pid: u32) -> Foreground {
        let mut maps = self.lock();
        let Some(entry) = maps.background.remove(&pid) else {
            return Foreground::NotFound;
        };
        if let ProcessState::Exited(code) = entry.state {
            return Foreground::AlreadyExited(code);
        }
        let name = entry.name.clone();
        maps.running.insert(pid, entry);
        Foreground::Moved(name)
    }

    pub fn contains(&self, pid: u32, placement: Placement) -> bool {
        let maps = self.lock();
        match placement {
            Placement::Running => maps.running.contains_key(&pid),
            Placement::Background => maps.background.contains_key(&pid),
        }
    }

    pub fn background_jobs(&self) -> Vec<JobInfo> {
        let maps = self.lock();
        let mut jobs: Vec<_> = maps
            .background
            .iter()
            .map(|(&pid, e)| JobInfo {
                pid,
                name: e.name.clone(),
                state: e.state,
            })
            .collect();
        jobs.sort_by_key(|j| j.pid);
        jobs
    }

    pub fn running_pids(&self) -> Vec<u32> {
        let mut pids: Vec<_> = self.lock().running.keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Evict everything and request termination of every tracked process.
    pub fn drain_all(&self) -> usize {
        let entries: Vec<Entry> = {
            let mut maps = self.lock();
            let mut all: Vec<_> = maps.running.drain().map(|(_, e)| e).collect();
            all.extend(maps.background.drain().map(|(_, e)| e));
            all
        };
        for entry in &entries {
            entry.kill.cancel();
        }
        entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove() {
        let registry = Registry::default();
        let serial = registry.insert(10, "sleep", Placement::Running, CancellationToken::new());
        assert_eq!(registry.running_pids(), vec![10]);
        registry.remove(10, serial);
        assert!(registry.running_pids().is_empty());
    }

    #[test]
    fn stale_serial_does_not_evict() {
        let registry = Registry::default();
        let old = registry.insert(7, "a", Placement::Background, CancellationToken::new());
        let new = registry.insert(7, "b", Placement::Background, CancellationToken::new());
        assert_ne!(old, new);
        registry.remove(7, old);
        let jobs = registry.background_jobs();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "b");
    }

    #[test]
    fn kill_cancels_token_and_evicts() {
        let registry = Registry::default();
        let token = CancellationToken::new();
        let serial = registry.insert(42, "sleep", Placement::Background, token.clone());
        assert_eq!(registry.background_jobs()[0].state, ProcessState::Running);
        assert!(registry.kill(42));
        assert!(token.is_cancelled());
        assert!(registry.background_jobs().is_empty());
        assert!(!registry.kill(42));

        // The supervisor's late report finds nothing to update.
        registry.finish(42, serial, ProcessState::Killed);
        assert!(registry.background_jobs().is_empty());
    }

    #[test]
    fn foreground_moves_between_maps() {
        let registry = Registry::default();
        registry.insert(5, "job", Placement::Background, CancellationToken::new());
        assert_eq!(registry.to_foreground(5), Foreground::Moved("job".into()));
        assert!(registry.contains(5, Placement::Running));
        assert!(!registry.contains(5, Placement::Background));
        assert_eq!(registry.to_foreground(5), Foreground::NotFound);
    }

    #[test]
    fn foreground_of_exited_job_evicts() {
        let registry = Registry::default();
        let serial = registry.insert(6, "job", Placement::Background, CancellationToken::new());
        registry.finish(6, serial, ProcessState::Exited(3));
        assert_eq!(registry.background_jobs()[0].state, ProcessState::Exited(3));
        assert_eq!(registry.to_foreground(6), Foreground::AlreadyExited(3));
        assert!(registry.background_jobs().is_empty());
    }

    #[test]
    fn pid_lives_in_one_map() {
        let registry = Registry::default();
        registry.insert(9, "a", Placement::Running, CancellationToken::new());
        registry.insert(9, "b", Placement::Background, CancellationToken::new());
        assert!(!registry.contains(9, Placement::Running));
        assert!(registry.contains(9, Placement::Background));
    }

    #[test]
    fn drain_all_cancels_everything() {
        let registry = Registry::default();
        let a = CancellationToken::new();
        let b = CancellationToken::new();
        registry.insert(1, "a", Placement::Running, a.clone());
        registry.insert(2, "b", Placement::Background, b.clone());
        assert_eq!(registry.drain_all(), 2);
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(registry.running_pids().is_empty());
        assert!(registry.background_jobs().is_empty());
    }
}
