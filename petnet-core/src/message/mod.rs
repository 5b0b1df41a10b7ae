//! The messages of the PET protocol.
//!
//! Every message is a signed frame carrying one of four payload kinds:
//!
//! - [`Sum`]: a sum participant's eligibility signature and its ephemeral
//!   public key, sent during the sum phase.
//! - [`Update`]: an update participant's eligibility signatures, its masked
//!   model and the local seed dictionary, sent during the update phase.
//! - [`Sum2`]: a sum participant's eligibility signature and the mask it
//!   reconstructed from the seed shares, sent during the sum2 phase.
//! - [`Chunk`]: one part of a multipart message. Large payloads are split by
//!   the sender into chunks which the coordinator reassembles; the frame of a
//!   chunk carries the tag of the message it belongs to together with the
//!   multipart flag.
//!
//! The frame itself ([`Message`]) is described in the [`MessageBuffer`]
//! documentation. It authenticates the payload with a detached signature from
//! the participant's signing key.

pub(crate) mod buffer;
#[allow(clippy::module_inception)]
pub(crate) mod message;
pub(crate) mod payload;
pub(crate) mod traits;
pub(crate) mod utils;

pub use self::{
    buffer::MessageBuffer,
    message::{Flags, Message, Tag},
    payload::{chunk::Chunk, sum::Sum, sum2::Sum2, update::Update, Payload},
    traits::{FromBytes, ToBytes},
};

/// An error that signals a failure when trying to decrypt and parse a message.
///
/// This is kept generic on purpose to not reveal to the sender what specifically failed during
/// parsing.
pub type DecodeError = anyhow::Error;
