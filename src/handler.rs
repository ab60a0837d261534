use std::{convert::Infallible, net::SocketAddr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use warp::{
    http::StatusCode,
    reply::{json, with_status},
    Rejection, Reply,
};

use crate::{error::PollError, poll::Snapshot, ws, Result, VoteAggregator};

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollResponse {
    pub poll_id: String,
    pub share_link: String,
    pub poll: Snapshot,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    /// Kept loose so a missing or negative index is reported as an invalid
    /// option rather than a malformed body.
    #[serde(default)]
    pub option_index: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    message: String,
}

/// Problems with a request that never reach the poll logic.
#[derive(Debug)]
pub enum RequestError {
    UnidentifiedVoter,
}

impl warp::reject::Reject for RequestError {}

/// Works out who is voting. Behind a trusted proxy this is the first
/// X-Forwarded-For hop, otherwise the peer address.
pub fn resolve_voter_id(
    forwarded_for: Option<&str>,
    remote: Option<SocketAddr>,
    trust_forwarded_for: bool,
) -> Option<String> {
    let forwarded = forwarded_for
        .filter(|_| trust_forwarded_for)
        .and_then(|header| header.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string);

    forwarded.or_else(|| remote.map(|addr| addr.ip().to_string()))
}

pub async fn create_poll_handler(
    request: CreatePollRequest,
    aggregator: VoteAggregator,
) -> Result<impl Reply> {
    let poll = aggregator
        .create_poll(request.question, request.options)
        .await
        .map_err(warp::reject::custom)?;

    Ok(with_status(
        json(&CreatePollResponse {
            poll_id: poll.id.clone(),
            share_link: format!("/poll/{}", poll.id),
            poll,
        }),
        StatusCode::CREATED,
    ))
}

pub async fn get_poll_handler(poll_id: String, aggregator: VoteAggregator) -> Result<impl Reply> {
    let poll = aggregator
        .get_poll(&poll_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(json(&poll))
}

pub async fn vote_handler(
    poll_id: String,
    request: VoteRequest,
    voter_id: String,
    aggregator: VoteAggregator,
) -> Result<impl Reply> {
    trace!("{voter_id} voting for option {:?} on poll {poll_id}", request.option_index);

    let option_index = match request.option_index.map(usize::try_from) {
        Some(Ok(index)) => index,
        _ => {
            // Unknown polls still report NotFound first
            let poll = aggregator
                .get_poll(&poll_id)
                .await
                .map_err(warp::reject::custom)?;
            return Err(warp::reject::custom(PollError::InvalidOption {
                count: poll.options.len(),
            }));
        }
    };

    let poll = aggregator
        .submit_vote(poll_id, option_index, voter_id)
        .await
        .map_err(warp::reject::custom)?;
    Ok(json(&poll))
}

pub async fn ws_handler(
    ws: warp::ws::Ws,
    aggregator: VoteAggregator,
    max_message_size: usize,
) -> Result<impl Reply> {
    let guid = Uuid::new_v4().as_simple().to_string();
    trace!("Got websocket call, assigning {guid}");

    Ok(ws
        .max_message_size(max_message_size)
        .on_upgrade(move |socket| ws::client_connection(socket, guid, aggregator)))
}

pub async fn health_handler() -> Result<impl Reply> {
    Ok(StatusCode::OK)
}

pub async fn handle_rejection(err: Rejection) -> std::result::Result<impl Reply, Infallible> {
    let (code, message) = if let Some(e) = err.find::<PollError>() {
        match e {
            PollError::Validation(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            PollError::NotFound(_) => (StatusCode::NOT_FOUND, "Poll not found".to_string()),
            PollError::InvalidOption { .. } => {
                (StatusCode::BAD_REQUEST, "Invalid option".to_string())
            }
            PollError::DuplicateVote => (StatusCode::BAD_REQUEST, e.to_string()),
            PollError::Storage(detail) => {
                error!("Request failed on storage: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        }
    } else if let Some(RequestError::UnidentifiedVoter) = err.find::<RequestError>() {
        (
            StatusCode::BAD_REQUEST,
            "Could not identify voter".to_string(),
        )
    } else if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("Invalid request body: {e}"))
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found".to_string())
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        (
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed".to_string(),
        )
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        (
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large".to_string(),
        )
    } else {
        error!("Unhandled rejection: {err:?}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        )
    };

    Ok(with_status(json(&ErrorResponse { message }), code))
}
