use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use crate::{error::PollError, poll::PollRecord};

use super::Backend;

const RECORD_EXTENSION: &str = "json";
const TEMPORARY_EXTENSION: &str = "json.tmp";

/// Stores every poll as `<directory>/<id>.json`.
///
/// Writes go to a temporary file first and are renamed into place, so a
/// crash mid-write leaves the previous version of the record intact.
#[derive(Clone, Debug)]
pub struct DirectoryBackend {
    directory: PathBuf,
}

impl DirectoryBackend {
    pub fn new(directory: impl Into<PathBuf>) -> Result<Self, PollError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.directory.join(id).with_extension(RECORD_EXTENSION)
    }
}

impl Backend for DirectoryBackend {
    fn load(&self) -> Result<Vec<PollRecord>, PollError> {
        let mut records = Vec::new();

        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path.extension().and_then(|x| x.to_str()) != Some(RECORD_EXTENSION) {
                // Leftover temporary files belong to writes that never completed
                if path.to_string_lossy().ends_with(TEMPORARY_EXTENSION) {
                    warn!("Ignoring incomplete poll write {}", path.display());
                }
                continue;
            }

            let contents = fs::read_to_string(&path)?;
            let record: PollRecord = serde_json::from_str(&contents).map_err(|e| {
                PollError::Storage(format!("Corrupt poll record {}: {e}", path.display()))
            })?;
            records.push(record);
        }

        debug!(
            "Loaded {} poll records from {}",
            records.len(),
            self.directory.display()
        );
        Ok(records)
    }

    fn persist(&self, record: &PollRecord) -> Result<(), PollError> {
        let path = self.record_path(&record.id);
        let temporary = self.directory.join(&record.id).with_extension(TEMPORARY_EXTENSION);

        // Synced before the rename makes it visible
        let mut file = File::create(&temporary)?;
        file.write_all(&serde_json::to_vec(record)?)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&temporary, &path)?;
        sync_directory(&self.directory)?;

        trace!("Persisted poll {} to {}", record.id, path.display());
        Ok(())
    }
}

/// Makes a rename inside `directory` durable.
#[cfg(unix)]
fn sync_directory(directory: &Path) -> std::io::Result<()> {
    File::open(directory)?.sync_all()
}

#[cfg(not(unix))]
fn sync_directory(_directory: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::store::PollStore;

    struct TestDirectory(PathBuf);

    impl TestDirectory {
        fn new() -> Self {
            Self(std::env::temp_dir().join(format!("tally-{}", Uuid::new_v4().as_simple())))
        }
    }

    impl Drop for TestDirectory {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|x| x.to_string()).collect()
    }

    #[test]
    fn votes_survive_a_reopen() {
        let dir = TestDirectory::new();

        let id = {
            let store = PollStore::open(Arc::new(DirectoryBackend::new(&dir.0).unwrap())).unwrap();
            let poll = store.create("Tabs?", &strings(&["Yes", "No"])).unwrap();
            store.cast_vote(&poll.id, 1, "10.0.0.1").unwrap();
            poll.id
        };

        let store = PollStore::open(Arc::new(DirectoryBackend::new(&dir.0).unwrap())).unwrap();
        let snapshot = store.get(&id).unwrap();
        assert_eq!(snapshot.options[1].votes, 1);
        assert_eq!(snapshot.total_votes, 1);

        // The voter record was persisted with the counter.
        assert!(matches!(
            store.cast_vote(&id, 0, "10.0.0.1"),
            Err(PollError::DuplicateVote)
        ));
    }

    #[test]
    fn one_file_per_poll() {
        let dir = TestDirectory::new();
        let backend = DirectoryBackend::new(&dir.0).unwrap();
        let store = PollStore::open(Arc::new(backend.clone())).unwrap();

        let poll = store.create("Q", &strings(&["A", "B"])).unwrap();
        store.create("Q2", &strings(&["A", "B"])).unwrap();

        assert!(backend.directory().join(format!("{}.json", poll.id)).is_file());
        assert_eq!(backend.load().unwrap().len(), 2);
    }

    #[test]
    fn persist_replaces_the_record_and_cleans_up() {
        let dir = TestDirectory::new();
        let backend = DirectoryBackend::new(&dir.0).unwrap();
        let mut record = PollRecord::new("Q", &strings(&["A", "B"])).unwrap();

        backend.persist(&record).unwrap();
        record.options[0].votes = 1;
        record.voter_ids.insert("10.0.0.1".to_string());
        backend.persist(&record).unwrap();

        let names: Vec<_> = fs::read_dir(&dir.0)
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![format!("{}.json", record.id)]);

        let loaded = backend.load().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].total_votes(), 1);
        assert_eq!(loaded[0].voter_ids.len(), 1);
    }

    #[test]
    fn ignores_unfinished_writes() {
        let dir = TestDirectory::new();
        let backend = DirectoryBackend::new(&dir.0).unwrap();
        fs::write(dir.0.join("abc.json.tmp"), b"{").unwrap();

        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn corrupt_record_fails_to_load() {
        let dir = TestDirectory::new();
        let backend = DirectoryBackend::new(&dir.0).unwrap();
        fs::write(dir.0.join("abc.json"), b"not json").unwrap();

        assert!(matches!(backend.load(), Err(PollError::Storage(_))));
    }
}
