//! # petnet-server
//!
//! The coordinator of the PET private aggregation protocol.
//!
//! The coordinator drives rounds of private model aggregation. Each round
//! moves through the phases `Idle -> Sum -> Update -> Sum2 -> Unmask` and
//! back to `Idle`; a phase that cannot gather its minimum number of
//! participant messages in time fails the round without touching the
//! committed global model.
//!
//! The crate is organized around four building blocks:
//!
//! - [`state_machine`]: the phase state machine that owns the round,
//! - [`storage`]: the store contract that makes every protocol mutation
//!   atomic and the round state crash-recoverable, with Redis and in-memory
//!   backends,
//! - [`services`]: the message processing pipeline (parsing, multipart
//!   reassembly, task validation) and the read-only data fetchers that an
//!   external transport exposes to participants,
//! - [`settings`]: configuration loading and validation.

pub mod services;
pub mod settings;
pub mod state_machine;
pub mod storage;
