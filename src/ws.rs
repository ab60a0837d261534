use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use warp::ws::{Message, WebSocket};

use crate::{broadcaster::Connection, messaging::IncomingMessage, OutgoingMessage, VoteAggregator};

/// Runs one viewer socket until it closes, then drops all of its
/// subscriptions.
pub async fn client_connection(ws: WebSocket, guid: String, aggregator: VoteAggregator) {
    let (client_ws_sender, mut client_ws_rcv) = ws.split();
    let (client_sender, client_rcv) = mpsc::unbounded_channel();

    let client_rcv = UnboundedReceiverStream::new(client_rcv);
    tokio::task::spawn(client_rcv.forward(client_ws_sender).map(|result| {
        if let Err(e) = result {
            error!("error sending websocket msg: {}", e);
        }
    }));

    let connection = Connection::new(guid.clone(), client_sender);
    info!("{guid} connected");

    while let Some(result) = client_ws_rcv.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                error!("error receiving ws message for id: {}: {}", guid, e);
                break;
            }
        };
        client_msg(&connection, msg, &aggregator).await;
    }

    let dropped = aggregator.connection_closed(&connection);
    info!("{guid} disconnected, dropped {dropped} subscriptions");
}

async fn client_msg(connection: &Connection, msg: Message, aggregator: &VoteAggregator) {
    // Pings, pongs and close frames are handled by the socket itself
    let text = match msg.to_str() {
        Ok(text) => text,
        Err(_) => return,
    };

    let message = match serde_json::from_str::<IncomingMessage>(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("{} sent an invalid message: {e}", connection.guid);
            connection.send_ignore_fail(OutgoingMessage::Error("Invalid message".to_string()));
            return;
        }
    };

    debug!("received message from {}: {message}", connection.guid);

    match message {
        IncomingMessage::JoinPoll(poll_id) => {
            let joined = aggregator.join_poll(&poll_id, connection).await;
            match joined {
                Ok(()) => connection.send_ignore_fail(OutgoingMessage::Subscribed(poll_id)),
                Err(e) => {
                    warn!("{} could not join poll {poll_id}: {e}", connection.guid);
                    connection.send_ignore_fail(OutgoingMessage::Error(e.to_string()));
                }
            }
        }
        IncomingMessage::LeavePoll(poll_id) => {
            aggregator.leave_poll(&poll_id, connection);
            connection.send_ignore_fail(OutgoingMessage::Unsubscribed(poll_id));
        }
    }
}
