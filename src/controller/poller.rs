//! Periodic alive-cell reporting
//!
//! The poller owns its own broker connection, so a turn that is computing
//! (or waiting at the pause checkpoint) never delays a count, and a slow
//! count never delays a turn.

use super::events::Event;
use crate::rpc::client::RpcClient;
use crate::rpc::protocol::{Operation, Request};
use crate::world::Params;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct Poller {
    handle: JoinHandle<()>,
}

impl Poller {
    /// Start polling `client` every `interval`
    ///
    /// The first count is sent one full interval after start.
    pub fn spawn(
        client: RpcClient,
        params: Params,
        interval: Duration,
        events: mpsc::UnboundedSender<Event>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match client.call(Operation::CountAlive, Request::new(params)).await {
                    Ok(response) => {
                        let event = Event::AliveCellsCount {
                            completed_turns: response.current_turn,
                            cells_count: response.alive_count,
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(addr = client.addr(), "alive count failed: {}", e),
                }
            }
            debug!("poller stopped");
        });

        Self { handle }
    }

    /// Stop polling; no event is sent after this returns
    pub async fn stop(mut self) {
        self.handle.abort();
        let _ = (&mut self.handle).await;
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
