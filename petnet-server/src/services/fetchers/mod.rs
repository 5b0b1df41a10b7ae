//! Read-only services over the event bus.
//!
//! The external transport composes these fetchers to serve the round
//! information endpoint (`round_params` and `phase`) and the per-role data
//! (`sum_dict` for update participants, `seed_dict` for sum participants,
//! `model` for everyone).

mod model;
mod phase;
mod round_params;
mod seed_dict;
mod sum_dict;

pub use self::{
    model::{ModelRequest, ModelService},
    phase::{PhaseRequest, PhaseService, RoundPhase},
    round_params::{RoundParamsRequest, RoundParamsService},
    seed_dict::{SeedDictRequest, SeedDictService},
    sum_dict::{SumDictRequest, SumDictService},
};

use crate::state_machine::events::EventSubscriber;

/// All fetchers over one event subscriber.
#[derive(Clone)]
pub struct Fetchers {
    /// The round parameters fetcher.
    pub round_params: RoundParamsService,
    /// The phase fetcher.
    pub phase: PhaseService,
    /// The global model fetcher.
    pub model: ModelService,
    /// The sum dictionary fetcher.
    pub sum_dict: SumDictService,
    /// The seed dictionary fetcher.
    pub seed_dict: SeedDictService,
}

impl Fetchers {
    /// Creates all fetchers over the given event subscriber.
    pub fn new(events: &EventSubscriber) -> Self {
        Self {
            round_params: RoundParamsService::new(events),
            phase: PhaseService::new(events),
            model: ModelService::new(events),
            sum_dict: SumDictService::new(events),
            seed_dict: SeedDictService::new(events),
        }
    }
}
