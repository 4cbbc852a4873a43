use std::marker::PhantomData;

use anyhow::{anyhow, Context, Error};
use bytes::{Buf, BufMut, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the length prefix in front of every frame
const HEADER_SIZE: usize = 4;
/// Frames larger than this are treated as garbage
const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Length prefixed JSON frames.
///
/// Every frame is a little endian `u32` payload size followed by the JSON
/// encoding of one message. `D` is the type read off the wire and `E` the
/// type written to it, so the client and the server use mirrored codecs.
pub struct JsonCodec<D, E> {
    _types: PhantomData<fn(E) -> D>,
}

impl<D, E> JsonCodec<D, E> {
    pub fn new() -> Self {
        JsonCodec {
            _types: PhantomData,
        }
    }
}

impl<D, E> Default for JsonCodec<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DeserializeOwned, E> Decoder for JsonCodec<D, E> {
    type Item = D;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<D>, Error> {
        if src.len() < HEADER_SIZE {
            // We don't have a full header yet
            src.reserve(HEADER_SIZE);
            return Ok(None);
        }

        // Peek at the size without advancing the source buffer
        let mut header = &src[..HEADER_SIZE];
        let size = header.get_u32_le() as usize;

        if size > MAX_FRAME_SIZE {
            return Err(anyhow!("Frame of {} bytes exceeds the limit of {}", size, MAX_FRAME_SIZE));
        }

        if src.len() < HEADER_SIZE + size {
            // We don't have the full message yet
            src.reserve(HEADER_SIZE + size - src.len());
            return Ok(None);
        }

        src.advance(HEADER_SIZE);
        let payload = src.split_to(size);

        let item = serde_json::from_slice(&payload).context("Error while parsing frame JSON")?;

        Ok(Some(item))
    }
}

impl<D, E: Serialize> Encoder<E> for JsonCodec<D, E> {
    type Error = Error;

    fn encode(&mut self, item: E, dst: &mut BytesMut) -> Result<(), Error> {
        let payload = serde_json::to_vec(&item)?;

        if payload.len() > MAX_FRAME_SIZE {
            return Err(anyhow!("Frame of {} bytes exceeds the limit of {}", payload.len(), MAX_FRAME_SIZE));
        }

        dst.reserve(HEADER_SIZE + payload.len());
        dst.put_u32_le(payload.len() as u32);
        dst.put_slice(&payload);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::{Request, Response};

    #[test]
    fn waits_for_a_whole_frame() {
        let mut client = JsonCodec::<Response, Request>::new();
        let mut server = JsonCodec::<Request, Response>::new();

        let mut wire = BytesMut::new();
        client.encode(Request::SetLed { index: 2, on: true }, &mut wire).unwrap();
        client.encode(Request::GetAll, &mut wire).unwrap();

        let mut partial = wire.split_to(3);
        assert_eq!(server.decode(&mut partial).unwrap(), None);
        partial.unsplit(wire.split_to(5));
        assert_eq!(server.decode(&mut partial).unwrap(), None);
        partial.unsplit(wire);

        assert_eq!(server.decode(&mut partial).unwrap(), Some(Request::SetLed { index: 2, on: true }));
        assert_eq!(server.decode(&mut partial).unwrap(), Some(Request::GetAll));
        assert!(partial.is_empty());
    }

    #[test]
    fn uses_a_json_payload() {
        let mut codec = JsonCodec::<Request, Response>::new();
        let mut wire = BytesMut::new();
        codec.encode(Response::Led { on: true }, &mut wire).unwrap();

        let payload = br#"{"response":"led","on":true}"#;
        assert_eq!(&wire[..4], &(payload.len() as u32).to_le_bytes());
        assert_eq!(&wire[4..], &payload[..]);
    }

    #[test]
    fn rejects_oversized_frames() {
        let mut codec = JsonCodec::<Request, Response>::new();
        let mut wire = BytesMut::new();
        wire.put_u32_le(MAX_FRAME_SIZE as u32 + 1);
        assert!(codec.decode(&mut wire).is_err());
    }

    #[test]
    fn rejects_malformed_payloads() {
        let mut codec = JsonCodec::<Request, Response>::new();
        let mut wire = BytesMut::new();
        wire.put_u32_le(4);
        wire.put_slice(b"nope");
        assert!(codec.decode(&mut wire).is_err());
    }
}
