use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::error::LinkError;
use crate::link::codec::JsonCodec;
use crate::link::{Connector, Request, Response, Transport};

/// Connects to a peripheral service listening on a TCP address.
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        TcpConnector { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Transport = TcpTransport;

    async fn connect(&mut self) -> Result<TcpTransport, LinkError> {
        let stream = TcpStream::connect(&self.addr).await.map_err(|e| {
            log::debug!("Failed to connect to peripheral service at {}: {}", self.addr, e);
            LinkError::Unavailable
        })?;
        stream.set_nodelay(true).map_err(|_| LinkError::Unavailable)?;

        Ok(TcpTransport {
            stream: Framed::new(stream, JsonCodec::new()),
        })
    }
}

pub struct TcpTransport {
    stream: Framed<TcpStream, JsonCodec<Response, Request>>,
}

impl Transport for TcpTransport {
    async fn call(&mut self, request: Request) -> Result<Response, LinkError> {
        if let Err(e) = self.stream.send(request).await {
            log::debug!("Error while sending request: {:#}", e);
            return Err(LinkError::Unavailable);
        }

        match self.stream.next().await {
            Some(Ok(response)) => Ok(response),
            Some(Err(e)) => {
                log::debug!("Error while reading response: {:#}", e);
                Err(LinkError::Unavailable)
            }
            None => Err(LinkError::Unavailable),
        }
    }
}
