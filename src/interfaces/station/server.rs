//! TCP gateway between stations and the coordinator.

use crate::application::command::StationCommand;
use crate::application::coordinator::Coordinator;
use crate::broadcast::Subscription;
use crate::domain::action_log::Actor;
use crate::domain::event::DomainEvent;
use crate::error::Result;
use crate::interfaces::station::protocol::{
    StationReply, StationRequest, WireError, decode_line, write_line,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

pub struct StationServer {
    coordinator: Arc<Coordinator>,
    snapshot_limit: usize,
}

impl StationServer {
    pub fn new(coordinator: Arc<Coordinator>, snapshot_limit: usize) -> Self {
        Self {
            coordinator,
            snapshot_limit: snapshot_limit.max(1),
        }
    }

    /// Accepts stations on an already bound listener. Each connection runs on its own
    /// task; a failing connection never takes the gateway down.
    pub async fn run(self, listener: TcpListener) -> Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "Station gateway listening");
        let server = Arc::new(self);

        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to accept station connection");
                    continue;
                }
            };
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(stream, peer).await {
                    tracing::warn!(%peer, error = %err, "Station connection error");
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        tracing::debug!(%peer, "Station connection accepted");
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();
        let mut subscription: Option<Subscription> = None;

        let outcome = loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => break Ok(()),
                        Err(err) => break Err(err.into()),
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let reply = match decode_line::<StationRequest>(&line) {
                        Ok(StationRequest::Subscribe { station }) => {
                            if let Some(previous) = subscription.take() {
                                self.coordinator.broadcaster().disconnect(previous.id());
                            }
                            let fresh = self.coordinator.broadcaster().connect(&station);
                            let connection = fresh.id();
                            subscription = Some(fresh);
                            StationReply::Subscribed { connection }
                        }
                        Ok(StationRequest::Snapshot { limit }) => self.snapshot(limit).await,
                        Ok(StationRequest::Command { actor, command }) => {
                            self.command(&actor, command).await
                        }
                        Err(err) => StationReply::Error { error: WireError::malformed(&err) },
                    };
                    if let Err(err) = write_line(&mut writer, &reply).await {
                        break Err(err);
                    }
                }
                event = next_event(&mut subscription) => {
                    let Some(event) = event else {
                        tracing::info!(%peer, "Subscription dropped by broadcaster, closing connection");
                        break Ok(());
                    };
                    if let Err(err) = write_line(&mut writer, &StationReply::Event { event }).await {
                        break Err(err);
                    }
                }
            }
        };

        if let Some(subscription) = subscription {
            self.coordinator.broadcaster().disconnect(subscription.id());
        }
        tracing::debug!(%peer, "Station connection closed");
        outcome
    }

    async fn snapshot(&self, limit: usize) -> StationReply {
        let limit = match limit {
            0 => self.snapshot_limit,
            n => n.min(self.snapshot_limit),
        };
        match self.coordinator.snapshot(limit).await {
            Ok(events) => StationReply::Snapshot { events },
            Err(err) => StationReply::Error {
                error: WireError::from(&err),
            },
        }
    }

    async fn command(&self, actor: &Actor, command: StationCommand) -> StationReply {
        match self.coordinator.execute(actor, command).await {
            Ok(outcome) => StationReply::Ok { outcome },
            Err(err) => {
                tracing::debug!(station = %actor.station, error = %err, "Command rejected");
                StationReply::Error {
                    error: WireError::from(&err),
                }
            }
        }
    }
}

/// Waits for the next live event, or forever when the connection never subscribed.
async fn next_event(subscription: &mut Option<Subscription>) -> Option<DomainEvent> {
    match subscription {
        Some(subscription) => subscription.recv().await,
        None => std::future::pending().await,
    }
}
