use crate::{
    broadcaster::{Connection, SubscriptionBroadcaster},
    error::PollError,
    poll::Snapshot,
    store::PollStore,
};

/// Front door for everything the request and socket layers do with polls.
/// Votes go through the store first and are only published once the store
/// has accepted them.
#[derive(Clone)]
pub struct VoteAggregator {
    store: PollStore,
    broadcaster: SubscriptionBroadcaster,
}

impl VoteAggregator {
    pub fn new(store: PollStore, broadcaster: SubscriptionBroadcaster) -> Self {
        Self { store, broadcaster }
    }

    pub fn broadcaster(&self) -> &SubscriptionBroadcaster {
        &self.broadcaster
    }

    pub async fn create_poll(
        &self,
        question: String,
        options: Vec<String>,
    ) -> Result<Snapshot, PollError> {
        let store = self.store.clone();
        let snapshot = run_blocking(move || store.create(&question, &options)).await?;
        info!(
            "Created poll {} with {} options",
            snapshot.id,
            snapshot.options.len()
        );
        Ok(snapshot)
    }

    /// Reading takes the poll's lock, which a vote holds while it is
    /// written to disk, so this also runs on the blocking pool.
    pub async fn get_poll(&self, poll_id: &str) -> Result<Snapshot, PollError> {
        let store = self.store.clone();
        let id = poll_id.to_string();
        run_blocking(move || store.get(&id)).await
    }

    /// Records the vote and, only if that succeeded, pushes the new
    /// snapshot to the poll's subscribers. Errors from the store are
    /// returned unchanged and never published.
    ///
    /// The publish happens inside the store's commit, before the poll is
    /// unlocked, so subscribers see a poll's snapshots in commit order.
    /// Sends only queue the message and never wait on a viewer.
    pub async fn submit_vote(
        &self,
        poll_id: String,
        option_index: usize,
        voter_id: String,
    ) -> Result<Snapshot, PollError> {
        let store = self.store.clone();
        let broadcaster = self.broadcaster.clone();
        let id = poll_id.clone();
        let (snapshot, delivered) = run_blocking(move || {
            let mut delivered = 0;
            let snapshot = store.cast_vote_then(&id, option_index, &voter_id, |snapshot| {
                delivered = broadcaster.publish(&id, snapshot);
            })?;
            Ok((snapshot, delivered))
        })
        .await?;

        debug!(
            "Vote on poll {poll_id} option {option_index} counted, total {} sent to {delivered} viewers",
            snapshot.total_votes
        );
        Ok(snapshot)
    }

    /// Subscribes a connection to a poll that exists.
    pub async fn join_poll(&self, poll_id: &str, connection: &Connection) -> Result<(), PollError> {
        self.get_poll(poll_id).await?;
        self.broadcaster.subscribe(poll_id, connection);
        Ok(())
    }

    pub fn leave_poll(&self, poll_id: &str, connection: &Connection) -> bool {
        self.broadcaster.unsubscribe_poll(poll_id, &connection.guid)
    }

    pub fn connection_closed(&self, connection: &Connection) -> usize {
        self.broadcaster.unsubscribe(&connection.guid)
    }
}

/// Store calls may hit the disk, so keep them off the async workers.
async fn run_blocking<T, F>(work: F) -> Result<T, PollError>
where
    F: FnOnce() -> Result<T, PollError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|e| {
        error!("Store task failed: {e}");
        PollError::Storage(e.to_string())
    })?
}
