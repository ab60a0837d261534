use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use dashmap::DashMap;
use tokio::sync::mpsc;
use warp::ws::Message;

use crate::{messaging::OutgoingMessage, poll::Snapshot};

pub type Sender = mpsc::UnboundedSender<std::result::Result<Message, warp::Error>>;

/// A live viewer connection. The guid is unique per socket, so the same
/// browser reconnecting is a new connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub guid: String,
    pub sender: Sender,
}

impl Connection {
    pub fn new(guid: impl Into<String>, sender: Sender) -> Self {
        Self {
            guid: guid.into(),
            sender,
        }
    }

    pub fn send_ignore_fail(&self, message: OutgoingMessage) {
        if self.sender.send(Ok(Message::text(message.json()))).is_err() {
            debug!("{} is gone, dropping message", self.guid);
        }
    }
}

/// Tracks which connections want updates for which poll.
///
/// `channels` is the index publish reads from, `memberships` lets a closing
/// connection find every poll it joined without scanning all of them. No
/// method holds a guard on one map while touching the other.
#[derive(Clone, Default)]
pub struct SubscriptionBroadcaster {
    channels: Arc<DashMap<String, HashMap<String, Sender>>>,
    memberships: Arc<DashMap<String, HashSet<String>>>,
}

impl SubscriptionBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the connection was already subscribed to the poll.
    pub fn subscribe(&self, poll_id: &str, connection: &Connection) -> bool {
        let added = self
            .channels
            .entry(poll_id.to_string())
            .or_default()
            .insert(connection.guid.clone(), connection.sender.clone())
            .is_none();

        self.memberships
            .entry(connection.guid.clone())
            .or_default()
            .insert(poll_id.to_string());

        if added {
            debug!("{} subscribed to poll {poll_id}", connection.guid);
        }
        added
    }

    /// Drops a single subscription. Returns false if there was none.
    pub fn unsubscribe_poll(&self, poll_id: &str, guid: &str) -> bool {
        if let Some(mut polls) = self.memberships.get_mut(guid) {
            polls.remove(poll_id);
        }
        self.memberships.remove_if(guid, |_, polls| polls.is_empty());

        self.remove_from_channel(poll_id, guid)
    }

    /// Drops every subscription held by a connection. Called when the
    /// connection closes. Returns how many subscriptions were removed.
    pub fn unsubscribe(&self, guid: &str) -> usize {
        let polls = match self.memberships.remove(guid) {
            Some((_, polls)) => polls,
            None => return 0,
        };

        polls
            .iter()
            .filter(|poll_id| self.remove_from_channel(poll_id, guid))
            .count()
    }

    /// Pushes the snapshot to everyone subscribed to the poll right now.
    ///
    /// Sends never block: each connection has its own unbounded queue drained
    /// by its socket task. A closed queue is logged and skipped. Returns the
    /// number of connections the update was handed to.
    pub fn publish(&self, poll_id: &str, snapshot: &Snapshot) -> usize {
        let subscribers = match self.channels.get(poll_id) {
            Some(subscribers) => subscribers,
            None => return 0,
        };

        let event = OutgoingMessage::PollUpdated(snapshot.clone()).json();
        let mut delivered = 0;
        for (guid, sender) in subscribers.iter() {
            match sender.send(Ok(Message::text(event.as_str()))) {
                Ok(()) => delivered += 1,
                Err(_) => warn!("Could not deliver update for poll {poll_id} to {guid}"),
            }
        }

        trace!(
            "Published poll {poll_id} to {delivered} of {} subscribers",
            subscribers.len()
        );
        delivered
    }

    pub fn subscriber_count(&self, poll_id: &str) -> usize {
        self.channels
            .get(poll_id)
            .map(|subscribers| subscribers.len())
            .unwrap_or(0)
    }

    pub fn is_subscribed(&self, poll_id: &str, guid: &str) -> bool {
        self.channels
            .get(poll_id)
            .map(|subscribers| subscribers.contains_key(guid))
            .unwrap_or(false)
    }

    fn remove_from_channel(&self, poll_id: &str, guid: &str) -> bool {
        let removed = match self.channels.get_mut(poll_id) {
            Some(mut subscribers) => subscribers.remove(guid).is_some(),
            None => false,
        };
        self.channels
            .remove_if(poll_id, |_, subscribers| subscribers.is_empty());
        removed
    }
}
