//! Message payloads.
//!
//! See the [message module] documentation since this is a private module anyways.
//!
//! [message module]: crate::message

pub(crate) mod chunk;
pub(crate) mod sum;
pub(crate) mod sum2;
pub(crate) mod update;

use derive_more::From;

use crate::message::{
    payload::{chunk::Chunk, sum::Sum, sum2::Sum2, update::Update},
    traits::ToBytes,
};

/// The payload of a [`Message`].
///
/// [`Message`]: crate::message::Message
#[derive(From, Eq, PartialEq, Debug, Clone)]
pub enum Payload {
    /// The payload of a [`Sum`] message.
    Sum(Sum),
    /// The payload of an [`Update`] message.
    Update(Update),
    /// The payload of a [`Sum2`] message.
    Sum2(Sum2),
    /// A chunk of a multipart message.
    Chunk(Chunk),
}

/// Applies an expression to the payload of whatever kind.
macro_rules! for_payload {
    ($payload:expr, $inner:ident => $action:expr) => {
        match $payload {
            Payload::Sum($inner) => $action,
            Payload::Update($inner) => $action,
            Payload::Sum2($inner) => $action,
            Payload::Chunk($inner) => $action,
        }
    };
}

impl ToBytes for Payload {
    fn buffer_length(&self) -> usize {
        for_payload!(self, payload => payload.buffer_length())
    }

    fn to_bytes<T: AsMut<[u8]> + AsRef<[u8]>>(&self, buffer: &mut T) {
        for_payload!(self, payload => payload.to_bytes(buffer))
    }
}
