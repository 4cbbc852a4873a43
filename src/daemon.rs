use std::future::Future;

use tokio::sync::mpsc;

use crate::config::Config;
use crate::control::{ControlEvent, ControlSurface, StatePublisher};
use crate::link::Connector;

/// Wires the control surface to its event source and runs it.
pub struct Daemon<C: Connector, P: StatePublisher> {
    surface: ControlSurface<C, P>,
    events: mpsc::Receiver<ControlEvent>,
}

impl<C: Connector, P: StatePublisher> Daemon<C, P> {
    pub fn new(config: Config, connector: C, publisher: P, events: mpsc::Receiver<ControlEvent>) -> Self {
        Daemon {
            surface: ControlSurface::new(config, connector, publisher),
            events,
        }
    }

    /// Runs until `shutdown` resolves or every event sender is gone.
    ///
    /// Events, animation ticks and timers are handled one at a time.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> ControlSurface<C, P> {
        tokio::pin!(shutdown);

        self.surface.start().await;
        log::info!("Waiting for commands...");

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.surface.handle_event(event).await,
                    None => {
                        log::info!("Event source closed");
                        break;
                    }
                },
                wakeup = self.surface.next_wakeup() => self.surface.on_wakeup(wakeup).await,
                () = &mut shutdown => {
                    log::info!("Shutting down");
                    break;
                }
            }
        }

        self.surface.shutdown().await;

        self.surface
    }
}
