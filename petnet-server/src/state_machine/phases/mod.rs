//! The phases of the state machine.

mod failure;
mod handler;
mod idle;
#[allow(clippy::module_inception)]
mod phase;
mod shutdown;
mod sum;
mod sum2;
mod unmask;
mod update;

pub use self::{
    failure::{Failure, PhaseError},
    handler::{Handler, PhaseCounters},
    idle::{Idle, IdleError},
    phase::{Phase, PhaseName, PhaseState, Shared},
    shutdown::Shutdown,
    sum::{Sum, SumError},
    sum2::Sum2,
    unmask::{Unmask, UnmaskError},
    update::{Update, UpdateError},
};

pub(in crate::state_machine) use self::phase::unix_now;
