//! Counter stores with scripted collisions and delays.

use async_trait::async_trait;
use casebook_core::sequence::SequenceKind;
use casebook_metadata::{CounterStore, MetadataError, MetadataResult};
use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What `create` does on a given call.
#[allow(dead_code)]
#[derive(Clone, Copy, Debug)]
pub enum CreateBehavior {
    /// Insert normally, rejecting ids already taken.
    Insert,
    /// Report a unique violation without inserting, as if a concurrent
    /// writer got there first.
    Collide,
    /// Fail with a non-uniqueness error.
    Fail,
    /// Never finish within any reasonable deadline.
    Hang,
}

/// In-memory test case counter whose `create` follows a script.
/// Calls past the end of the script use `fallback`.
#[allow(dead_code)]
pub struct ScriptedCounter {
    taken: Mutex<HashSet<String>>,
    script: Mutex<Vec<CreateBehavior>>,
    fallback: CreateBehavior,
    create_calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedCounter {
    pub fn new(script: Vec<CreateBehavior>, fallback: CreateBehavior) -> Self {
        let mut script = script;
        script.reverse();
        Self {
            taken: Mutex::new(HashSet::new()),
            script: Mutex::new(script),
            fallback,
            create_calls: AtomicUsize::new(0),
        }
    }

    /// Collide `n` times, then insert.
    pub fn colliding(n: usize) -> Self {
        Self::new(vec![CreateBehavior::Collide; n], CreateBehavior::Insert)
    }

    pub fn always(behavior: CreateBehavior) -> Self {
        Self::new(Vec::new(), behavior)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn seed(&self, id: &str) {
        self.taken.lock().unwrap().insert(id.to_string());
    }

    fn next_behavior(&self) -> CreateBehavior {
        self.script.lock().unwrap().pop().unwrap_or(self.fallback)
    }
}

#[async_trait]
impl CounterStore for ScriptedCounter {
    type Draft = ();
    type Entity = String;

    fn kind(&self) -> SequenceKind {
        SequenceKind::TestCase
    }

    async fn count(&self, _parent_key: &str) -> MetadataResult<u64> {
        Ok(self.taken.lock().unwrap().len() as u64)
    }

    async fn find_by_sequence_id(
        &self,
        _parent_key: &str,
        sequence_id: &str,
    ) -> MetadataResult<Option<String>> {
        Ok(self.taken.lock().unwrap().get(sequence_id).cloned())
    }

    async fn create(
        &self,
        _parent_key: &str,
        sequence_id: &str,
        _draft: &(),
    ) -> MetadataResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_behavior() {
            CreateBehavior::Insert => {
                if !self.taken.lock().unwrap().insert(sequence_id.to_string()) {
                    return Err(MetadataError::UniqueViolation(sequence_id.to_string()));
                }
                Ok(sequence_id.to_string())
            }
            CreateBehavior::Collide => Err(MetadataError::UniqueViolation(sequence_id.to_string())),
            CreateBehavior::Fail => Err(MetadataError::Internal("disk on fire".to_string())),
            CreateBehavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Err(MetadataError::Internal("unreachable".to_string()))
            }
        }
    }
}
