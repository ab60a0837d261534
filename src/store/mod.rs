use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::{
    error::PollError,
    poll::{PollRecord, Snapshot},
};

pub mod directory;
pub mod memory;

pub use directory::DirectoryBackend;
pub use memory::MemoryBackend;

/// Where poll records are made durable. The store calls `persist` while it
/// holds the lock of the poll being written, so a backend only ever sees one
/// writer per poll at a time.
pub trait Backend: Send + Sync {
    /// Every record known to the backend. Called once when the store opens.
    fn load(&self) -> Result<Vec<PollRecord>, PollError>;

    /// Durably write the full record, replacing any previous version.
    fn persist(&self, record: &PollRecord) -> Result<(), PollError>;
}

#[derive(Clone)]
pub struct PollStore {
    // Each poll has its own lock. The map guard is only held long enough to
    // clone the Arc so a slow vote never holds up a shard.
    polls: Arc<DashMap<String, Arc<Mutex<PollRecord>>>>,
    backend: Arc<dyn Backend>,
}

impl PollStore {
    pub fn in_memory() -> Self {
        Self {
            polls: Arc::new(DashMap::new()),
            backend: Arc::new(MemoryBackend),
        }
    }

    pub fn open(backend: Arc<dyn Backend>) -> Result<Self, PollError> {
        let polls = DashMap::new();
        for record in backend.load()? {
            polls.insert(record.id.clone(), Arc::new(Mutex::new(record)));
        }
        info!("Opened poll store with {} polls", polls.len());

        Ok(Self {
            polls: Arc::new(polls),
            backend,
        })
    }

    pub fn create(&self, question: &str, options: &[String]) -> Result<Snapshot, PollError> {
        let record = PollRecord::new(question, options)?;

        // Persist before publishing the id so nobody can vote on a poll
        // that would vanish on restart.
        self.backend.persist(&record)?;

        let snapshot = record.snapshot();
        self.polls
            .insert(record.id.clone(), Arc::new(Mutex::new(record)));
        Ok(snapshot)
    }

    pub fn get(&self, id: &str) -> Result<Snapshot, PollError> {
        let poll = self.poll(id)?;
        let record = poll.lock();
        Ok(record.snapshot())
    }

    /// Check, count and record a vote as one step. Only the target poll is
    /// locked while this runs.
    pub fn cast_vote(
        &self,
        id: &str,
        option_index: usize,
        voter_id: &str,
    ) -> Result<Snapshot, PollError> {
        self.cast_vote_then(id, option_index, voter_id, |_| ())
    }

    /// Like `cast_vote`, but runs `on_commit` with the new snapshot once the
    /// vote is durable and before the poll is unlocked. Commits on one poll
    /// therefore reach `on_commit` in the order they happened. `on_commit`
    /// must not block or touch this store.
    pub fn cast_vote_then<F>(
        &self,
        id: &str,
        option_index: usize,
        voter_id: &str,
        on_commit: F,
    ) -> Result<Snapshot, PollError>
    where
        F: FnOnce(&Snapshot),
    {
        let poll = self.poll(id)?;
        let mut record = poll.lock();

        let count = record.options.len();
        if option_index >= count {
            return Err(PollError::InvalidOption { count });
        }

        if record.voter_ids.contains(voter_id) {
            return Err(PollError::DuplicateVote);
        }

        let previous_update = record.updated_at;
        record.options[option_index].votes += 1;
        record.voter_ids.insert(voter_id.to_string());
        record.updated_at = Utc::now();

        if let Err(e) = self.backend.persist(&record) {
            error!("Could not persist vote on poll {id}, rolling back: {e}");
            record.options[option_index].votes -= 1;
            record.voter_ids.remove(voter_id);
            record.updated_at = previous_update;
            return Err(e);
        }

        let snapshot = record.snapshot();
        on_commit(&snapshot);
        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.polls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polls.is_empty()
    }

    fn poll(&self, id: &str) -> Result<Arc<Mutex<PollRecord>>, PollError> {
        self.polls
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PollError::NotFound(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|x| x.to_string()).collect()
    }

    /// Counter sum and voter record size, read under the poll's lock.
    fn tally_and_voters(store: &PollStore, id: &str) -> (u64, usize) {
        let poll = store.poll(id).unwrap();
        let record = poll.lock();
        (record.total_votes(), record.voter_ids.len())
    }

    /// Fails every write once `failing` is switched on.
    #[derive(Default)]
    struct FlakyBackend {
        failing: AtomicBool,
    }

    impl Backend for FlakyBackend {
        fn load(&self) -> Result<Vec<PollRecord>, PollError> {
            Ok(Vec::new())
        }

        fn persist(&self, _record: &PollRecord) -> Result<(), PollError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(PollError::Storage("disk unplugged".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn create_then_get_returns_zero_counters() {
        let store = PollStore::in_memory();
        let created = store.create("Cats?", &strings(&["Yes", "No"])).unwrap();

        let fetched = store.get(&created.id).unwrap();
        assert_eq!(fetched.question, "Cats?");
        assert_eq!(fetched.options.len(), 2);
        assert!(fetched.options.iter().all(|option| option.votes == 0));
        assert_eq!(fetched.total_votes, 0);
    }

    #[test]
    fn invalid_create_stores_nothing() {
        let store = PollStore::in_memory();
        assert!(matches!(
            store.create("", &strings(&["Yes", "No"])),
            Err(PollError::Validation(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn get_unknown_poll() {
        let store = PollStore::in_memory();
        assert!(matches!(store.get("missing"), Err(PollError::NotFound(_))));
    }

    #[test]
    fn distinct_voters_are_tallied() {
        let store = PollStore::in_memory();
        let poll = store
            .create("Colour?", &strings(&["Red", "Green", "Blue"]))
            .unwrap();

        store.cast_vote(&poll.id, 0, "a").unwrap();
        store.cast_vote(&poll.id, 0, "b").unwrap();
        let snapshot = store.cast_vote(&poll.id, 1, "c").unwrap();

        let votes: Vec<u64> = snapshot.options.iter().map(|o| o.votes).collect();
        assert_eq!(votes, vec![2, 1, 0]);
        assert_eq!(snapshot.total_votes, 3);
    }

    #[test]
    fn second_vote_from_same_voter_is_rejected() {
        let store = PollStore::in_memory();
        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();

        let first = store.cast_vote(&poll.id, 0, "x").unwrap();
        assert!(matches!(
            store.cast_vote(&poll.id, 1, "x"),
            Err(PollError::DuplicateVote)
        ));
        assert_eq!(store.get(&poll.id).unwrap().options, first.options);
    }

    #[test]
    fn out_of_range_option_changes_nothing() {
        let store = PollStore::in_memory();
        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();

        assert!(matches!(
            store.cast_vote(&poll.id, 99, "x"),
            Err(PollError::InvalidOption { count: 2 })
        ));

        let after = store.get(&poll.id).unwrap();
        assert_eq!(after.total_votes, 0);
        // The voter was not recorded either, so a valid vote still succeeds.
        assert!(store.cast_vote(&poll.id, 1, "x").is_ok());
    }

    #[test]
    fn vote_on_unknown_poll() {
        let store = PollStore::in_memory();
        assert!(matches!(
            store.cast_vote("missing", 0, "x"),
            Err(PollError::NotFound(_))
        ));
    }

    #[test]
    fn concurrent_duplicate_votes_succeed_once() {
        let store = PollStore::in_memory();
        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();

        let results: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..16)
                .map(|i| {
                    let store = &store;
                    let id = &poll.id;
                    scope.spawn(move || store.cast_vote(id, i % 2, "same-voter"))
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let duplicates = results
            .iter()
            .filter(|r| matches!(r, Err(PollError::DuplicateVote)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(duplicates, 15);
        assert_eq!(store.get(&poll.id).unwrap().total_votes, 1);
    }

    #[test]
    fn concurrent_votes_are_never_lost() {
        let store = PollStore::in_memory();
        let poll = store.create("Q", &strings(&["A", "B", "C"])).unwrap();

        std::thread::scope(|scope| {
            for thread in 0..8 {
                let store = &store;
                let id = &poll.id;
                scope.spawn(move || {
                    for n in 0..50 {
                        let voter = format!("voter-{thread}-{n}");
                        store.cast_vote(id, n % 3, &voter).unwrap();
                    }
                });
            }

            // Every state observed while voting is in progress must balance
            let store = &store;
            let id = &poll.id;
            scope.spawn(move || {
                for _ in 0..200 {
                    let (tally, voters) = tally_and_voters(store, id);
                    assert_eq!(tally, voters as u64);
                }
            });
        });

        let snapshot = store.get(&poll.id).unwrap();
        assert_eq!(snapshot.total_votes, 400);
        let sum: u64 = snapshot.options.iter().map(|o| o.votes).sum();
        assert_eq!(sum, 400);
        assert_eq!(tally_and_voters(&store, &poll.id), (400, 400));
    }

    #[test]
    fn rejected_votes_keep_tally_and_voters_balanced() {
        let store = PollStore::in_memory();
        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();

        store.cast_vote(&poll.id, 0, "x").unwrap();
        let _ = store.cast_vote(&poll.id, 1, "x");
        let _ = store.cast_vote(&poll.id, 7, "y");

        assert_eq!(tally_and_voters(&store, &poll.id), (1, 1));
    }

    #[test]
    fn commits_are_reported_in_order() {
        let store = PollStore::in_memory();
        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();
        let seen = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for thread in 0..8 {
                let store = &store;
                let id = &poll.id;
                let seen = &seen;
                scope.spawn(move || {
                    for n in 0..25 {
                        let voter = format!("voter-{thread}-{n}");
                        store
                            .cast_vote_then(id, n % 2, &voter, |snapshot| {
                                seen.lock().push(snapshot.total_votes)
                            })
                            .unwrap();
                    }
                });
            }
        });

        let seen = seen.into_inner();
        assert_eq!(seen, (1..=200).collect::<Vec<u64>>());
    }

    #[test]
    fn failed_votes_are_not_reported() {
        let store = PollStore::in_memory();
        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();
        let mut calls = 0;

        store
            .cast_vote_then(&poll.id, 0, "x", |_| calls += 1)
            .unwrap();
        assert!(store
            .cast_vote_then(&poll.id, 1, "x", |_| calls += 1)
            .is_err());
        assert!(store
            .cast_vote_then(&poll.id, 5, "y", |_| calls += 1)
            .is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn failed_persist_rolls_the_vote_back() {
        let backend = Arc::new(FlakyBackend::default());
        let store = PollStore::open(backend.clone()).unwrap();
        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();

        backend.failing.store(true, Ordering::SeqCst);
        assert!(matches!(
            store.cast_vote(&poll.id, 0, "x"),
            Err(PollError::Storage(_))
        ));
        let after = store.get(&poll.id).unwrap();
        assert_eq!(after.total_votes, 0);
        assert_eq!(after.updated_at, poll.updated_at);

        // The voter was rolled back too, so they can vote once storage recovers.
        backend.failing.store(false, Ordering::SeqCst);
        assert_eq!(store.cast_vote(&poll.id, 0, "x").unwrap().total_votes, 1);
    }

    #[test]
    fn failed_persist_on_create_hides_the_poll() {
        let backend = Arc::new(FlakyBackend::default());
        backend.failing.store(true, Ordering::SeqCst);
        let store = PollStore::open(backend).unwrap();

        assert!(matches!(
            store.create("Q", &strings(&["A", "B"])),
            Err(PollError::Storage(_))
        ));
        assert!(store.is_empty());
    }
}
