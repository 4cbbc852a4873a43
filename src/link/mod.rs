use serde::{Deserialize, Serialize};

use crate::error::LinkError;

pub mod codec;
pub mod memory;
pub mod tcp;

pub use memory::{Board, MemoryConnector};
pub use tcp::TcpConnector;

/// Requests understood by the peripheral-control service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum Request {
    GetCount,
    GetLed { index: usize },
    GetAll,
    GetNames,
    SetLed { index: usize, on: bool },
    SetAll { on: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    Count { count: usize },
    Led { on: bool },
    All { leds: Vec<bool> },
    Names { names: Vec<String> },
    Done,
    Error { message: String },
}

/// One request/response exchange with the service.
///
/// Any error returned here means the transport is gone.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn call(&mut self, request: Request) -> Result<Response, LinkError>;
}

#[allow(async_fn_in_trait)]
pub trait Connector {
    type Transport: Transport;

    async fn connect(&mut self) -> Result<Self::Transport, LinkError>;
}

/// Client side view of the peripheral set.
///
/// Count and names are fetched once per connection, states are cached and
/// updated on every successful write.
pub struct PeripheralLink<C: Connector> {
    connector: C,
    transport: Option<C::Transport>,
    states: Vec<bool>,
    names: Vec<String>,
}

impl<C: Connector> PeripheralLink<C> {
    pub fn new(connector: C) -> Self {
        PeripheralLink {
            connector,
            transport: None,
            states: Vec::new(),
            names: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    /// Opens a new connection and enumerates the peripherals from scratch.
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        self.disconnect();
        self.transport = Some(self.connector.connect().await?);

        let count = match self.call(Request::GetCount).await? {
            Response::Count { count } => count,
            other => return Err(self.protocol_error(other)),
        };
        let states = match self.call(Request::GetAll).await? {
            Response::All { leds } if leds.len() == count => leds,
            other => return Err(self.protocol_error(other)),
        };
        let mut names = match self.call(Request::GetNames).await? {
            Response::Names { names } => names,
            other => return Err(self.protocol_error(other)),
        };
        names.resize(count, String::new());

        log::info!("Connected to peripheral service with {} peripherals", count);

        self.states = states;
        self.names = names;

        Ok(())
    }

    /// Drops the connection and everything cached from it.
    pub fn disconnect(&mut self) {
        self.transport = None;
        self.states.clear();
        self.names.clear();
    }

    pub fn count(&self) -> Result<usize, LinkError> {
        self.ensure_connected()?;
        Ok(self.states.len())
    }

    #[cfg(test)]
    pub fn get(&self, index: usize) -> Result<bool, LinkError> {
        self.check_index(index)?;
        Ok(self.states[index])
    }

    pub fn get_all(&self) -> Result<Vec<bool>, LinkError> {
        self.ensure_connected()?;
        Ok(self.states.clone())
    }

    pub fn names(&self) -> Result<Vec<String>, LinkError> {
        self.ensure_connected()?;
        Ok(self.names.clone())
    }

    /// Single write, never retried.
    ///
    /// A write the service refuses comes back as [`LinkError::Rejected`] and
    /// leaves the link connected. Callers on the animation path log it and
    /// carry on.
    pub async fn set(&mut self, index: usize, on: bool) -> Result<(), LinkError> {
        self.check_index(index)?;

        match self.call(Request::SetLed { index, on }).await? {
            Response::Done => {
                self.states[index] = on;
                Ok(())
            }
            Response::Error { message } => Err(LinkError::Rejected(message)),
            _ => Err(LinkError::UnexpectedResponse),
        }
    }

    /// Writes every peripheral in turn. Not atomic across peripherals.
    ///
    /// Refused writes are skipped; only a lost connection stops the sweep.
    pub async fn set_all(&mut self, on: bool) -> Result<(), LinkError> {
        for index in 0..self.count()? {
            match self.set(index, on).await {
                Err(LinkError::Unavailable) => return Err(LinkError::Unavailable),
                Err(e) => log::warn!("Dropped write of peripheral {}: {}", index, e),
                Ok(()) => (),
            }
        }

        Ok(())
    }

    /// Asks the service for its count to find out whether it is still there.
    pub async fn probe(&mut self) -> Result<(), LinkError> {
        match self.call(Request::GetCount).await? {
            Response::Count { count } if count == self.states.len() => Ok(()),
            Response::Count { count } => {
                log::warn!("Peripheral count changed from {} to {}", self.states.len(), count);
                Ok(())
            }
            other => Err(self.protocol_error(other)),
        }
    }

    async fn call(&mut self, request: Request) -> Result<Response, LinkError> {
        let transport = self.transport.as_mut().ok_or(LinkError::Unavailable)?;

        log::trace!("Sending {:?}", request);

        match transport.call(request).await {
            Ok(response) => Ok(response),
            Err(e) => {
                log::error!("Lost connection to peripheral service: {}", e);
                self.disconnect();
                Err(LinkError::Unavailable)
            }
        }
    }

    fn protocol_error(&mut self, response: Response) -> LinkError {
        self.disconnect();
        match response {
            Response::Error { message } => LinkError::Rejected(message),
            _ => LinkError::UnexpectedResponse,
        }
    }

    fn ensure_connected(&self) -> Result<(), LinkError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(LinkError::Unavailable)
        }
    }

    fn check_index(&self, index: usize) -> Result<(), LinkError> {
        let count = self.count()?;
        if index < count {
            Ok(())
        } else {
            Err(LinkError::IndexOutOfRange { index, count })
        }
    }
}
