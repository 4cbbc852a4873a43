//! A simulated peripheral-control service.
//!
//! Hosts a [`Board`] behind the link protocol so the daemon can be run
//! without real hardware.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::link::codec::JsonCodec;
use crate::link::{Board, Request, Response};

pub async fn serve(listener: TcpListener, board: Board) -> Result<()> {
    log::info!(
        "Serving {} simulated peripherals on {}",
        board.leds().len(),
        listener.local_addr()?
    );

    loop {
        let (stream, peer) = listener.accept().await.context("Error accepting link client")?;
        log::info!("Link client {} connected", peer);

        let board = board.clone();
        tokio::spawn(async move {
            match handle_client(stream, board).await {
                Ok(()) => log::info!("Link client {} disconnected", peer),
                Err(e) => log::error!("Error serving link client {}: {:#}", peer, e),
            }
        });
    }
}

async fn handle_client(stream: TcpStream, board: Board) -> Result<()> {
    let mut stream = Framed::new(stream, JsonCodec::<Request, Response>::new());

    while let Some(request) = stream.next().await {
        let request = request.context("Error while retrieving request from stream")?;

        if let Request::SetLed { index, on } = request {
            log::info!("Peripheral {} -> {}", index, if on { "on" } else { "off" });
        } else {
            log::trace!("Received {:?}", request);
        }

        let response = board.handle(request);
        stream.send(response).await.context("Error while sending response")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LinkError;
    use crate::link::{PeripheralLink, TcpConnector};

    #[tokio::test]
    async fn link_round_trips_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let board = Board::new(vec!["boot".to_string(), String::new()]);
        let server = tokio::spawn(serve(listener, board.clone()));

        let mut link = PeripheralLink::new(TcpConnector::new(addr.to_string()));
        link.connect().await.unwrap();
        assert_eq!(link.count(), Ok(2));
        assert_eq!(link.names().unwrap(), vec!["boot", ""]);

        link.set(1, true).await.unwrap();
        assert_eq!(board.leds(), vec![false, true]);
        link.probe().await.unwrap();

        server.abort();
        let _ = server.await;
    }

    #[tokio::test]
    async fn unreachable_service_is_unavailable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut link = PeripheralLink::new(TcpConnector::new(addr.to_string()));
        assert_eq!(link.connect().await, Err(LinkError::Unavailable));
        assert!(!link.is_connected());
    }
}
