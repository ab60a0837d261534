#[macro_use]
extern crate log;

pub mod aggregator;
pub mod broadcaster;
pub mod config;
pub mod error;
pub mod handler;
pub mod messaging;
pub mod poll;
pub mod store;
pub mod ws;

use std::convert::Infallible;

use warp::{Filter, Rejection, Reply};

pub use aggregator::VoteAggregator;
pub use broadcaster::{Connection, SubscriptionBroadcaster};
pub use error::PollError;
pub use messaging::{IncomingMessage, OutgoingMessage};
pub use poll::{PollOption, PollRecord, Snapshot};
pub use store::PollStore;

pub type Result<T> = std::result::Result<T, Rejection>;

/// Largest create or vote body we accept.
const MAX_BODY_SIZE: u64 = 16 * 1024;

/// Settings the filter tree needs from the configuration.
#[derive(Clone, Copy, Debug)]
pub struct RouteSettings {
    pub trust_forwarded_for: bool,
    pub max_message_size: usize,
}

/// The full service: poll CRUD under both `/polls` and `/api/polls`, the
/// viewer socket at `/ws` and `/health`.
pub fn routes(
    aggregator: VoteAggregator,
    settings: RouteSettings,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let health_route = warp::path!("health").and_then(handler::health_handler);

    let polls = warp::path("polls")
        .or(warp::path("api").and(warp::path("polls")))
        .unify();

    let create_route = polls
        .clone()
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_SIZE))
        .and(warp::body::json())
        .and(with_aggregator(aggregator.clone()))
        .and_then(handler::create_poll_handler);

    let get_route = polls
        .clone()
        .and(warp::path::param::<String>())
        .and(warp::path::end())
        .and(warp::get())
        .and(with_aggregator(aggregator.clone()))
        .and_then(handler::get_poll_handler);

    let vote_route = polls
        .and(warp::path::param::<String>())
        .and(warp::path("vote"))
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_SIZE))
        .and(warp::body::json())
        .and(with_voter_id(settings.trust_forwarded_for))
        .and(with_aggregator(aggregator.clone()))
        .and_then(handler::vote_handler);

    let ws_route = warp::path("ws")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_aggregator(aggregator))
        .and(warp::any().map(move || settings.max_message_size))
        .and_then(handler::ws_handler);

    health_route
        .or(create_route)
        .or(get_route)
        .or(vote_route)
        .or(ws_route)
        .with(
            warp::cors()
                .allow_any_origin()
                .allow_methods(vec!["GET", "POST"])
                .allow_headers(vec!["content-type"]),
        )
        .recover(handler::handle_rejection)
}

fn with_aggregator(
    aggregator: VoteAggregator,
) -> impl Filter<Extract = (VoteAggregator,), Error = Infallible> + Clone {
    warp::any().map(move || aggregator.clone())
}

fn with_voter_id(
    trust_forwarded_for: bool,
) -> impl Filter<Extract = (String,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-forwarded-for")
        .and(warp::addr::remote())
        .and_then(move |forwarded_for: Option<String>, remote| async move {
            handler::resolve_voter_id(forwarded_for.as_deref(), remote, trust_forwarded_for)
                .ok_or_else(|| warp::reject::custom(handler::RequestError::UnidentifiedVoter))
        })
}
