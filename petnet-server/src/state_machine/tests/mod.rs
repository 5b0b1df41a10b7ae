//! State machine test helpers and integration tests.

pub(crate) mod builder;
pub(crate) mod utils;

use crate::{
    state_machine::events::{DictionaryUpdate, ModelUpdate},
    storage::memory::MemoryStore,
    storage::CoordinatorStorage,
};
use petnet_core::mask::{FromPrimitives, IntoPrimitives, Model};

use self::builder::StateMachineBuilder;

#[tokio::test]
async fn integration_full_round() {
    // A complete round: one sum participant, three update participants.
    let mut store = MemoryStore::new();
    let mut state = utils::coordinator_state();
    state.sum.count.min = 1;
    state.update.count.min = 3;
    state.sum2.count.min = 1;
    let model_length = state.round_params.model_length;

    let (state_machine, request_tx, events) =
        StateMachineBuilder::new(store.clone(), state).build();
    assert!(state_machine.is_idle());

    // Idle -> Sum: a new round is opened
    let state_machine = state_machine.next().await.unwrap();
    assert!(state_machine.is_sum());
    let round_id = events.params_listener().get_latest().round_id;
    assert_eq!(round_id, 1);

    // Sum -> Update: the summer registers its ephemeral key
    let summer = utils::generate_summer();
    let request = utils::send_sum_request(&request_tx, &summer);
    let (response, state_machine) = tokio::join!(request, state_machine.next());
    response.unwrap();
    let state_machine = state_machine.unwrap();
    assert!(state_machine.is_update());

    let sum_dict = match events.sum_dict_listener().get_latest().event {
        DictionaryUpdate::New(sum_dict) => sum_dict,
        DictionaryUpdate::Invalidate => panic!("expected a sum dict broadcast"),
    };
    assert_eq!(sum_dict.len(), 1);

    // Update -> Sum2: three updaters submit masked models
    let models: Vec<Model> = (1..=3)
        .map(|int| Model::from_primitives(vec![int as f32; model_length].into_iter()).unwrap())
        .collect();
    let requests = async {
        for model in &models {
            let updater = utils::generate_updater();
            let (request, _) = utils::update_request(&updater, model, &[summer.clone()]);
            utils::send_update_request(&request_tx, request).await.unwrap();
        }
    };
    let (_, state_machine) = tokio::join!(requests, state_machine.next());
    let state_machine = state_machine.unwrap();
    assert!(state_machine.is_sum2());

    let seed_dict = match events.seed_dict_listener().get_latest().event {
        DictionaryUpdate::New(seed_dict) => seed_dict,
        DictionaryUpdate::Invalidate => panic!("expected a seed dict broadcast"),
    };
    let shares = seed_dict.get(&summer.keys.public).unwrap();
    assert_eq!(shares.len(), 3);

    // Sum2 -> Unmask: the summer reconstructs and submits the mask
    let mask = utils::reconstruct_mask(&summer, shares, model_length);
    let request = utils::send_sum2_request(&request_tx, &summer, mask);
    let (response, state_machine) = tokio::join!(request, state_machine.next());
    response.unwrap();
    let state_machine = state_machine.unwrap();
    assert!(state_machine.is_unmask());

    // Unmask -> Idle: the global model is the average of the contributions
    let state_machine = state_machine.next().await.unwrap();
    assert!(state_machine.is_idle());

    let global_model = match events.model_listener().get_latest().event {
        ModelUpdate::New(model) => model,
        ModelUpdate::Invalidate => panic!("expected a model broadcast"),
    };
    let weights: Vec<f32> = (*global_model)
        .clone()
        .into_primitives_unchecked()
        .collect();
    assert_eq!(weights.len(), model_length);
    assert!(weights.iter().all(|weight| (weight - 2.0).abs() < 1e-6));

    // the model is committed in the store and the next round is open
    let id = store.latest_global_model_id().await.unwrap().unwrap();
    assert!(id.starts_with("1_"));
    assert_eq!(state_machine.shared().state.round_id, 2);
}
