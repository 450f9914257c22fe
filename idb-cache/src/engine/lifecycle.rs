use crate::ports::{DeleteOutcome, TransactionSignal};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::EngineFault;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::debug;

/// Identifies one connection: the database name and the generation it joined.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionId {
    name: String,
    generation: u64,
}

impl ConnectionId {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct Generation {
    name: String,
    open: usize,
    // deleted while connected; only its open connections keep it alive
    detached: bool,
    faults: watch::Sender<Option<EngineFault>>,
}

impl Generation {
    fn new(name: &str) -> Self {
        let (faults, _) = watch::channel(None);
        Self {
            name: name.to_string(),
            open: 0,
            detached: false,
            faults,
        }
    }

    fn retire(self) {
        self.faults
            .send_replace(Some(EngineFault::abort("The database was deleted.")));
    }
}

/// Open-connection bookkeeping shared by the engines.
///
/// Every open of a name joins its current generation. Deleting a name with
/// open connections detaches that generation: later opens start a new one,
/// and the engine reclaims the old one's data once
/// [`disconnect`](Self::disconnect) reports its last connection gone.
#[derive(Default)]
pub struct ConnectionTracker {
    // lock order: `current` before `generations`
    current: DashMap<String, u64>,
    generations: DashMap<u64, Generation>,
    next_generation: AtomicU64,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a connection to the current generation of `name` and returns
    /// the signal its transactions share.
    pub fn connect(&self, name: &str) -> (ConnectionId, TransactionSignal) {
        let current = self
            .current
            .entry(name.to_string())
            .or_insert_with(|| self.next_generation.fetch_add(1, Ordering::SeqCst));
        let generation = *current;

        let mut entry = self
            .generations
            .entry(generation)
            .or_insert_with(|| Generation::new(name));
        entry.open += 1;
        let signal = TransactionSignal::new(entry.faults.subscribe());

        (
            ConnectionId {
                name: name.to_string(),
                generation,
            },
            signal,
        )
    }

    /// Returns true when this closed the last connection of a detached
    /// generation; the caller then reclaims that generation's data.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        let Entry::Occupied(mut entry) = self.generations.entry(id.generation) else {
            return false;
        };

        let generation = entry.get_mut();
        generation.open = generation.open.saturating_sub(1);
        if generation.open == 0 && generation.detached {
            entry.remove().retire();
            return true;
        }
        false
    }

    /// `Deleted` means nothing is connected and the caller deletes now.
    /// `Blocked` means the current generation is detached and lives on only
    /// through its open connections.
    pub fn request_delete(&self, name: &str) -> DeleteOutcome {
        let Some((_, generation)) = self.current.remove(name) else {
            return DeleteOutcome::Deleted;
        };

        match self.generations.entry(generation) {
            Entry::Occupied(mut entry) if entry.get().open > 0 => {
                debug!(
                    "Delete of '{}' blocked by {} open connection(s); detached generation {}",
                    name,
                    entry.get().open,
                    generation
                );
                entry.get_mut().detached = true;
                DeleteOutcome::Blocked
            }
            Entry::Occupied(entry) => {
                entry.remove().retire();
                DeleteOutcome::Deleted
            }
            Entry::Vacant(_) => DeleteOutcome::Deleted,
        }
    }

    /// Fails every transaction of every connection currently open to the
    /// current generation of `name`. Connections opened afterwards start clean.
    pub fn fail(&self, name: &str, fault: EngineFault) -> bool {
        let Some(generation) = self.current.get(name).map(|entry| *entry) else {
            return false;
        };

        match self.generations.get_mut(&generation) {
            Some(mut entry) => {
                let (fresh, _) = watch::channel(None);
                let failed = std::mem::replace(&mut entry.faults, fresh);
                failed.send_replace(Some(fault));
                true
            }
            None => false,
        }
    }

    /// Open connections to `name` across every generation.
    pub fn open_connections(&self, name: &str) -> usize {
        self.generations
            .iter()
            .filter(|entry| entry.name == name)
            .map(|entry| entry.open)
            .sum()
    }

    pub fn is_delete_pending(&self, name: &str) -> bool {
        self.generations
            .iter()
            .any(|entry| entry.name == name && entry.detached)
    }
}

impl std::fmt::Debug for ConnectionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTracker")
            .field("databases", &self.current.len())
            .field("generations", &self.generations.len())
            .finish()
    }
}
