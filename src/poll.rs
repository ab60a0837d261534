use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PollError;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 6;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct PollOption {
    pub text: String,
    pub votes: u64,
}

/// The persisted shape of a poll. Voter identifiers live here and never
/// leave the process except through a storage backend.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollRecord {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    pub voter_ids: HashSet<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PollRecord {
    /// Validates a create request and builds a fresh record with zeroed
    /// counters. Texts are trimmed before they are checked.
    pub fn new(question: &str, options: &[String]) -> Result<Self, PollError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PollError::Validation(
                "A poll needs a question".to_string(),
            ));
        }

        if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
            return Err(PollError::Validation(format!(
                "A poll needs between {MIN_OPTIONS} and {MAX_OPTIONS} options, got {}",
                options.len()
            )));
        }

        let options = options
            .iter()
            .map(|text| text.trim())
            .map(|text| {
                if text.is_empty() {
                    Err(PollError::Validation("Options cannot be blank".to_string()))
                } else {
                    Ok(PollOption {
                        text: text.to_string(),
                        votes: 0,
                    })
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4().as_simple().to_string(),
            question: question.to_string(),
            options,
            voter_ids: HashSet::new(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn total_votes(&self) -> u64 {
        self.options.iter().map(|option| option.votes).sum()
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            id: self.id.clone(),
            question: self.question.clone(),
            options: self.options.clone(),
            total_votes: self.total_votes(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Point in time view of a poll that is safe to hand to clients.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub question: String,
    pub options: Vec<PollOption>,
    pub total_votes: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
