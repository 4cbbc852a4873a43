//! Newline delimited JSON socket for operators.
//!
//! Inbound lines carry commands and pairing changes, outbound lines carry
//! command outcomes and everything the daemon publishes.

use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{Framed, LinesCodec};

use crate::control::{Command, ControlEvent, Outcome, PairingInfo, Publication, StatePublisher};
use crate::error::SYSTEM_ERROR;

const MAX_LINE_LENGTH: usize = 64 * 1024;
const PUBLICATION_BACKLOG: usize = 256;

/// Publishes to every connected operator.
///
/// Keeps the latest value of everything published so that operators
/// connecting later start from the current state.
#[derive(Clone)]
pub struct ChannelPublisher {
    tx: broadcast::Sender<Publication>,
    snapshot: Arc<Mutex<Vec<Publication>>>,
}

impl ChannelPublisher {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(PUBLICATION_BACKLOG);
        ChannelPublisher {
            tx,
            snapshot: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Publication> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Publication> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Default for ChannelPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl StatePublisher for ChannelPublisher {
    fn publish(&mut self, publication: Publication) {
        {
            let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
            match snapshot.iter_mut().find(|p| same_slot(p, &publication)) {
                Some(slot) => *slot = publication.clone(),
                None => snapshot.push(publication.clone()),
            }
        }

        // No operators connected is fine
        let _ = self.tx.send(publication);
    }
}

/// Whether `b` replaces `a` in the snapshot.
fn same_slot(a: &Publication, b: &Publication) -> bool {
    match (a, b) {
        (
            Publication::State {
                component: c1,
                trait_name: t1,
                property: p1,
                ..
            },
            Publication::State {
                component: c2,
                trait_name: t2,
                property: p2,
                ..
            },
        ) => c1 == c2 && t1 == t2 && p1 == p2,
        _ => a == b,
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Command {
        id: u64,
        component: String,
        name: String,
        #[serde(default)]
        parameters: Map<String, Value>,
    },
    Pairing {
        #[serde(default)]
        info: Option<PairingInfo>,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Outbound {
    Result { id: u64, outcome: Outcome },
    Published(Publication),
}

pub async fn serve(listener: TcpListener, events: mpsc::Sender<ControlEvent>, publisher: ChannelPublisher) -> Result<()> {
    log::info!("Waiting for operators on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await.context("Error accepting operator")?;
        log::info!("Operator {} connected", peer);

        let events = events.clone();
        let publisher = publisher.clone();
        tokio::spawn(async move {
            match handle_client(stream, events, publisher).await {
                Ok(()) => log::info!("Operator {} disconnected", peer),
                Err(e) => log::error!("Error serving operator {}: {:#}", peer, e),
            }
        });
    }
}

async fn handle_client(stream: TcpStream, events: mpsc::Sender<ControlEvent>, publisher: ChannelPublisher) -> Result<()> {
    let mut lines = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
    let (out_tx, mut out_rx) = mpsc::unbounded_channel();

    // Subscribe before taking the snapshot so nothing falls in between
    let mut updates = publisher.subscribe();
    for publication in publisher.snapshot() {
        send(&mut lines, Outbound::Published(publication)).await?;
    }

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(line) => {
                    let line = line.context("Error while reading operator line")?;
                    handle_line(&line, &events, &out_tx).await?;
                }
                None => return Ok(()),
            },
            update = updates.recv() => match update {
                Ok(publication) => send(&mut lines, Outbound::Published(publication)).await?,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Operator fell behind, {} publications skipped", n)
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            Some(outbound) = out_rx.recv() => send(&mut lines, outbound).await?,
        }
    }
}

async fn handle_line(
    line: &str,
    events: &mpsc::Sender<ControlEvent>,
    out_tx: &mpsc::UnboundedSender<Outbound>,
) -> Result<()> {
    let inbound: Inbound = match serde_json::from_str(line) {
        Ok(inbound) => inbound,
        Err(e) => {
            log::warn!("Ignoring malformed operator line {:?}: {}", line, e);
            return Ok(());
        }
    };

    match inbound {
        Inbound::Command {
            id,
            component,
            name,
            parameters,
        } => {
            let (command, outcome) = Command::new(component, name, parameters);
            events
                .send(ControlEvent::Command(command))
                .await
                .context("Daemon stopped accepting commands")?;

            let out_tx = out_tx.clone();
            tokio::spawn(async move {
                let outcome = outcome.await.unwrap_or_else(|_| Outcome::Aborted {
                    code: SYSTEM_ERROR.to_string(),
                    message: "command was not handled".to_string(),
                });
                let _ = out_tx.send(Outbound::Result { id, outcome });
            });
        }
        Inbound::Pairing { info } => {
            events
                .send(ControlEvent::PairingChanged(info))
                .await
                .context("Daemon stopped accepting events")?;
        }
    }

    Ok(())
}

async fn send(lines: &mut Framed<TcpStream, LinesCodec>, outbound: Outbound) -> Result<()> {
    let line = serde_json::to_string(&outbound)?;
    lines.send(line).await.context("Error while writing operator line")?;
    Ok(())
}
