//! Signaling session with tokio mpsc command/notification pattern.
//!
//! The WebSocket connection to the hub runs in a dedicated tokio task.
//! External code communicates with it through typed command and notification
//! channels, keeping the transport fully asynchronous and decoupled.
//!
//! The channel is best-effort and at-most-once: outbound events emitted while
//! the hub is unreachable are dropped, never queued. Durability for messages
//! comes from the API server, not from this layer.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use apothek_shared::constants::{
    RECONNECT_INITIAL_DELAY, RECONNECT_MAX_DELAY, SIGNAL_CHANNEL_CAPACITY,
};
use apothek_shared::{SignalEvent, UserId};

use crate::error::SignalError;

// ---------------------------------------------------------------------------
// Command / notification types
// ---------------------------------------------------------------------------

/// Commands sent *into* the session task.
#[derive(Debug)]
pub enum SignalCommand {
    /// Emit an event to the hub. Dropped with a debug log if disconnected.
    Emit(SignalEvent),
    /// Gracefully close the connection and stop the task.
    Shutdown,
}

/// Notifications sent *from* the session task to the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SignalNotification {
    /// The channel is up and the local identity has been announced.
    /// `reconnect` is true for every connection after the first, so the
    /// engine knows to re-join its active conversation room.
    Connected { reconnect: bool },
    /// The channel dropped; inbound events stop until the next `Connected`.
    Disconnected,
    /// An inbound hub event.
    Event(SignalEvent),
}

/// Configuration for the signaling session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket URL of the signaling hub.
    pub hub_url: String,
    /// First reconnect delay after a drop.
    pub initial_delay: Duration,
    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:6001".to_string(),
            initial_delay: RECONNECT_INITIAL_DELAY,
            max_delay: RECONNECT_MAX_DELAY,
        }
    }
}

/// Spawn the signaling session in a background tokio task.
///
/// Validates the hub URL up front, then returns channels for sending
/// commands and receiving notifications. The task connects (and reconnects)
/// on its own; every successful connect announces `user_connected` before
/// any other traffic so the hub can route events to this client.
pub fn spawn_session(
    config: SessionConfig,
    user_id: UserId,
) -> Result<
    (
        mpsc::Sender<SignalCommand>,
        mpsc::Receiver<SignalNotification>,
    ),
    SignalError,
> {
    // Fail fast on an unusable URL instead of looping on it forever.
    config.hub_url.as_str().into_client_request()?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<SignalCommand>(SIGNAL_CHANNEL_CAPACITY);
    let (notif_tx, notif_rx) = mpsc::channel::<SignalNotification>(SIGNAL_CHANNEL_CAPACITY);

    tokio::spawn(session_loop(config, user_id, cmd_rx, notif_tx));

    Ok((cmd_tx, notif_rx))
}

enum ConnectionOutcome {
    Shutdown,
    ConnectionLost,
}

async fn session_loop(
    config: SessionConfig,
    user_id: UserId,
    mut cmd_rx: mpsc::Receiver<SignalCommand>,
    notif_tx: mpsc::Sender<SignalNotification>,
) {
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        match connect_async(config.hub_url.as_str()).await {
            Ok((stream, _response)) => {
                info!(
                    url = %config.hub_url,
                    reconnect = ever_connected,
                    "Connected to signaling hub"
                );
                attempt = 0;

                let outcome =
                    drive_connection(stream, user_id, ever_connected, &mut cmd_rx, &notif_tx)
                        .await;
                ever_connected = true;

                match outcome {
                    ConnectionOutcome::Shutdown => {
                        info!("Signaling session shut down");
                        return;
                    }
                    ConnectionOutcome::ConnectionLost => {}
                }
            }
            Err(e) => {
                warn!(url = %config.hub_url, error = %e, "Hub connection attempt failed");
            }
        }

        let delay = backoff_delay(attempt, config.initial_delay, config.max_delay);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");

        // Keep draining commands while offline: emits are dropped (the API
        // path remains the durable one), shutdown still works.
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                cmd = cmd_rx.recv() => match cmd {
                    Some(SignalCommand::Emit(event)) => {
                        debug!(event = ?event, "Dropping outbound event while disconnected");
                    }
                    Some(SignalCommand::Shutdown) | None => {
                        info!("Signaling session shut down while disconnected");
                        return;
                    }
                },
            }
        }
    }
}

/// Run one live connection until it drops or a shutdown is requested.
async fn drive_connection(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    user_id: UserId,
    reconnect: bool,
    cmd_rx: &mut mpsc::Receiver<SignalCommand>,
    notif_tx: &mpsc::Sender<SignalNotification>,
) -> ConnectionOutcome {
    let (mut sink, mut source) = stream.split();

    // Identity announcement must precede all other traffic.
    let hello = SignalEvent::UserConnected { user_id };
    match hello.to_json() {
        Ok(json) => {
            if let Err(e) = sink.send(WsMessage::Text(json)).await {
                warn!(error = %e, "Failed to announce identity");
                let _ = notif_tx.send(SignalNotification::Disconnected).await;
                return ConnectionOutcome::ConnectionLost;
            }
        }
        Err(e) => {
            error!(error = %e, "Failed to encode identity announcement");
            return ConnectionOutcome::ConnectionLost;
        }
    }

    let _ = notif_tx
        .send(SignalNotification::Connected { reconnect })
        .await;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(SignalCommand::Emit(event)) => {
                    let json = match event.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            error!(error = %e, "Failed to encode outbound event");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(WsMessage::Text(json)).await {
                        warn!(error = %e, "Send failed, connection lost");
                        let _ = notif_tx.send(SignalNotification::Disconnected).await;
                        return ConnectionOutcome::ConnectionLost;
                    }
                }
                Some(SignalCommand::Shutdown) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    return ConnectionOutcome::Shutdown;
                }
            },

            frame = source.next() => match frame {
                Some(Ok(WsMessage::Text(raw))) => match SignalEvent::from_json(&raw) {
                    Ok(event) => {
                        debug!(event = ?event, "Hub event received");
                        let _ = notif_tx.send(SignalNotification::Event(event)).await;
                    }
                    Err(e) => {
                        // The hub fans out to heterogeneous clients; skip
                        // frames this version does not understand.
                        debug!(error = %e, "Ignoring unrecognized hub frame");
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => {
                    info!("Hub closed the connection");
                    let _ = notif_tx.send(SignalNotification::Disconnected).await;
                    return ConnectionOutcome::ConnectionLost;
                }
                Some(Ok(_)) => {
                    // Ping/pong are handled by tungstenite; binary frames
                    // are not part of the hub protocol.
                }
                Some(Err(e)) => {
                    warn!(error = %e, "WebSocket read error");
                    let _ = notif_tx.send(SignalNotification::Disconnected).await;
                    return ConnectionOutcome::ConnectionLost;
                }
            },
        }
    }
}

/// Exponential backoff: `initial * 2^attempt`, capped at `max`.
fn backoff_delay(attempt: u32, initial: Duration, max: Duration) -> Duration {
    let factor = 1u32 << attempt.min(16);
    initial.saturating_mul(factor).min(max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(backoff_delay(0, initial, max), Duration::from_secs(1));
        assert_eq!(backoff_delay(1, initial, max), Duration::from_secs(2));
        assert_eq!(backoff_delay(2, initial, max), Duration::from_secs(4));
        assert_eq!(backoff_delay(4, initial, max), Duration::from_secs(16));
    }

    #[test]
    fn test_backoff_is_capped() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(30);

        assert_eq!(backoff_delay(5, initial, max), max);
        assert_eq!(backoff_delay(63, initial, max), max);
    }

    #[test]
    fn test_spawn_rejects_invalid_url() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let _guard = rt.enter();

        let config = SessionConfig {
            hub_url: "not a url".to_string(),
            ..SessionConfig::default()
        };
        assert!(spawn_session(config, UserId(1)).is_err());
    }
}
