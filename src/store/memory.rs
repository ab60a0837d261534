use crate::{error::PollError, poll::PollRecord};

use super::Backend;

/// Keeps nothing beyond what the store already holds in memory. Polls are
/// lost when the process exits.
#[derive(Clone, Copy, Debug, Default)]
pub struct MemoryBackend;

impl Backend for MemoryBackend {
    fn load(&self) -> Result<Vec<PollRecord>, PollError> {
        Ok(Vec::new())
    }

    fn persist(&self, _record: &PollRecord) -> Result<(), PollError> {
        Ok(())
    }
}
