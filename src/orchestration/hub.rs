//! Per-thread serialization of turns. A turn holds its thread's lock from
//! checkout to checkpoint; different threads never contend.

use crate::orchestration::engine::{TurnEngine, TurnOutcome};
use crate::orchestration::event::TurnEvent;
use crate::orchestration::state::ConversationState;
use crate::shared::fs_atomic::atomic_write_file;
use crate::shared::ids::ThreadId;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("failed to read checkpoint {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse checkpoint {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub trait CheckpointStore: Send + Sync {
    fn load(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, CheckpointError>;
    fn save(&self, thread_id: &ThreadId, state: &ConversationState) -> Result<(), CheckpointError>;
}

#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    states: Mutex<HashMap<ThreadId, ConversationState>>,
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, CheckpointError> {
        let states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(states.get(thread_id).cloned())
    }

    fn save(&self, thread_id: &ThreadId, state: &ConversationState) -> Result<(), CheckpointError> {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        states.insert(thread_id.clone(), state.clone());
        Ok(())
    }
}

/// One JSON document per thread under `<state_root>/threads/`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    root: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(state_root: &Path) -> Self {
        Self {
            root: state_root.join("threads"),
        }
    }

    pub fn path_for(&self, thread_id: &ThreadId) -> PathBuf {
        self.root.join(format!("{}.json", thread_id.as_str()))
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn load(&self, thread_id: &ThreadId) -> Result<Option<ConversationState>, CheckpointError> {
        let path = self.path_for(thread_id);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CheckpointError::Parse {
                path: path.display().to_string(),
                source,
            })
    }

    fn save(&self, thread_id: &ThreadId, state: &ConversationState) -> Result<(), CheckpointError> {
        let path = self.path_for(thread_id);
        let write_error = |source| CheckpointError::Write {
            path: path.display().to_string(),
            source,
        };
        fs::create_dir_all(&self.root).map_err(write_error)?;
        let encoded = serde_json::to_vec_pretty(state).map_err(|source| CheckpointError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        atomic_write_file(&path, &encoded).map_err(write_error)
    }
}

type ThreadSlot = Arc<Mutex<Option<ConversationState>>>;

pub struct ConversationHub {
    engine: Arc<TurnEngine>,
    store: Arc<dyn CheckpointStore>,
    threads: Mutex<HashMap<ThreadId, ThreadSlot>>,
}

impl ConversationHub {
    pub fn new(engine: Arc<TurnEngine>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            engine,
            store,
            threads: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &TurnEngine {
        &self.engine
    }

    fn slot(&self, thread_id: &ThreadId) -> ThreadSlot {
        let mut threads = self
            .threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(threads.entry(thread_id.clone()).or_default())
    }

    /// Drops an idle slot once its state lives only in the store. A slot that
    /// another caller has checked out stays.
    fn release(&self, thread_id: &ThreadId, slot: &ThreadSlot) {
        let mut threads = self
            .threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let idle = slot
            .try_lock()
            .map(|state| state.is_none())
            .unwrap_or(false);
        let unshared = Arc::strong_count(slot) == 2
            && threads
                .get(thread_id)
                .is_some_and(|held| Arc::ptr_eq(held, slot));
        if idle && unshared {
            threads.remove(thread_id);
        }
    }

    /// Threads whose state is currently held in memory.
    pub fn resident_threads(&self) -> usize {
        self.threads
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Runs one turn for `thread_id`, blocking while another turn on the same
    /// thread is in progress.
    pub fn submit(&self, thread_id: &ThreadId, event: TurnEvent) -> TurnOutcome {
        let slot = self.slot(thread_id);
        let mut guard = slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.is_none() {
            let restored = match self.store.load(thread_id) {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(error = %err, thread = thread_id.as_str(), "starting a fresh thread");
                    None
                }
            };
            *guard = Some(restored.unwrap_or_else(|| ConversationState::new(thread_id.clone())));
        }
        let state = guard.get_or_insert_with(|| ConversationState::new(thread_id.clone()));
        let outcome = self.engine.run_turn(state, event);
        match self.store.save(thread_id, state) {
            // the store holds the thread now; the next turn reloads it
            Ok(()) => *guard = None,
            Err(err) => {
                tracing::warn!(error = %err, thread = thread_id.as_str(), "failed to save checkpoint; keeping thread in memory");
            }
        }
        drop(guard);
        self.release(thread_id, &slot);
        outcome
    }

    /// Copy of the thread's current state, if it has one.
    pub fn snapshot(&self, thread_id: &ThreadId) -> Option<ConversationState> {
        let slot = self.slot(thread_id);
        let held = slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        self.release(thread_id, &slot);
        held.or_else(|| self.store.load(thread_id).ok().flatten())
    }
}
