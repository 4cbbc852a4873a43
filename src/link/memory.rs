use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::LinkError;
use crate::link::{Connector, Request, Response, Transport};

#[derive(Debug)]
struct BoardState {
    leds: Vec<bool>,
    names: Vec<String>,
    online: bool,
    writes: Vec<(usize, bool)>,
    refused: Vec<usize>,
}

/// An in-memory peripheral set that answers link requests.
///
/// Clones share the same peripherals. Every accepted write is recorded.
#[derive(Debug, Clone)]
pub struct Board {
    state: Arc<Mutex<BoardState>>,
}

impl Board {
    pub fn new(names: Vec<String>) -> Self {
        Board {
            state: Arc::new(Mutex::new(BoardState {
                leds: vec![false; names.len()],
                names,
                online: true,
                writes: Vec::new(),
                refused: Vec::new(),
            })),
        }
    }

    #[cfg(test)]
    pub fn with_count(count: usize) -> Self {
        Self::new(vec![String::new(); count])
    }

    pub fn handle(&self, request: Request) -> Response {
        let mut state = self.lock();
        let count = state.leds.len();

        match request {
            Request::GetCount => Response::Count { count },
            Request::GetLed { index } if index < count => Response::Led {
                on: state.leds[index],
            },
            Request::GetAll => Response::All {
                leds: state.leds.clone(),
            },
            Request::GetNames => Response::Names {
                names: state.names.clone(),
            },
            Request::SetLed { index, .. } if state.refused.contains(&index) => Response::Error {
                message: format!("peripheral {} is stuck", index),
            },
            Request::SetLed { index, on } if index < count => {
                state.leds[index] = on;
                state.writes.push((index, on));
                Response::Done
            }
            Request::SetAll { on } => {
                for index in 0..count {
                    state.leds[index] = on;
                    state.writes.push((index, on));
                }
                Response::Done
            }
            Request::GetLed { index } | Request::SetLed { index, .. } => Response::Error {
                message: LinkError::IndexOutOfRange { index, count }.to_string(),
            },
        }
    }

    pub fn leds(&self) -> Vec<bool> {
        self.lock().leds.clone()
    }

    #[cfg(test)]
    pub fn set_leds(&self, leds: &[bool]) {
        let mut state = self.lock();
        let count = state.leds.len().min(leds.len());
        state.leds[..count].copy_from_slice(&leds[..count]);
    }

    #[cfg(test)]
    pub fn writes(&self) -> Vec<(usize, bool)> {
        self.lock().writes.clone()
    }

    #[cfg(test)]
    pub fn clear_writes(&self) {
        self.lock().writes.clear();
    }

    /// Makes every later write to `index` fail with an error reply.
    #[cfg(test)]
    pub fn refuse_writes_to(&self, index: usize) {
        self.lock().refused.push(index);
    }

    pub fn is_online(&self) -> bool {
        self.lock().online
    }

    /// An offline board refuses connections and fails every call.
    pub fn set_online(&self, online: bool) {
        self.lock().online = online;
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct MemoryConnector {
    board: Board,
}

impl MemoryConnector {
    pub fn new(board: Board) -> Self {
        MemoryConnector { board }
    }
}

impl Connector for MemoryConnector {
    type Transport = MemoryTransport;

    async fn connect(&mut self) -> Result<MemoryTransport, LinkError> {
        if self.board.is_online() {
            Ok(MemoryTransport {
                board: self.board.clone(),
            })
        } else {
            Err(LinkError::Unavailable)
        }
    }
}

pub struct MemoryTransport {
    board: Board,
}

impl Transport for MemoryTransport {
    async fn call(&mut self, request: Request) -> Result<Response, LinkError> {
        if self.board.is_online() {
            Ok(self.board.handle(request))
        } else {
            Err(LinkError::Unavailable)
        }
    }
}
