//! Bus listener: cross-node events in, local fan-out.
//!
//! One task per node subscribes to the room pattern channel and forwards
//! every arriving event to the local connections of that room, skipping the
//! originator. Publishing always goes through the bus, even on the
//! originating node, so there is no separate loopback path to keep
//! consistent.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use lockstep_model::{ServerFrame, SyncPayload};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::ports::EventBus;
use crate::registry::ConnectionRegistry;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Run the fan-out loop until `shutdown` fires.
///
/// A dropped subscription is re-established with exponential backoff and no
/// state cleanup; events published while disconnected are lost, which the
/// last-writer-wins contract absorbs.
pub async fn run_bus_listener(
    bus: Arc<dyn EventBus>,
    registry: Arc<ConnectionRegistry>,
    shutdown: CancellationToken,
) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match bus.subscribe().await {
            Ok(mut stream) => {
                info!("bus subscription established");
                backoff = INITIAL_BACKOFF;

                loop {
                    tokio::select! {
                        () = shutdown.cancelled() => return,
                        message = stream.next() => match message {
                            Some(message) => {
                                let room = message.room;
                                let originator = message.event.user_id;
                                debug!(
                                    room_id = %room,
                                    action = %message.event.action,
                                    user_id = %originator,
                                    "fanning out event"
                                );
                                let frame =
                                    ServerFrame::Sync(SyncPayload::from(message.event));
                                registry.broadcast(room, originator, frame).await;
                            }
                            None => {
                                warn!("bus subscription ended; reconnecting");
                                break;
                            }
                        },
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "bus subscribe failed; backing off");
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}
