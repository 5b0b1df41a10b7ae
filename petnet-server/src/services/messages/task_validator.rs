//! Validation of task eligibility.

use std::task::Poll;

use futures::{future, task::Context};
use thiserror::Error;
use tower::Service;

use crate::state_machine::events::{EventListener, EventSubscriber};
use petnet_core::{
    common::{sum_task_data, update_task_data, RoundParameters},
    message::{Message, Payload},
};

/// A service that checks the task eligibility of the sender of a message.
///
/// A participant proves its eligibility with a detached signature over the
/// role tag, the round id and the round seed; the signature also serves as
/// the lottery ticket: its hash must fall below the configured probability
/// threshold. A participant that qualifies for the sum task is never accepted
/// for the update task.
pub struct TaskValidatorService {
    params_listener: EventListener<RoundParameters>,
}

impl TaskValidatorService {
    /// Creates a new task validator over the given event subscriber.
    pub fn new(subscriber: &EventSubscriber) -> Self {
        Self {
            params_listener: subscriber.params_listener(),
        }
    }
}

/// Error type of the [`TaskValidatorService`].
#[derive(Error, Debug)]
pub enum TaskValidatorError {
    #[error("not eligible for the sum task")]
    NotSumEligible,

    #[error("not eligible for the update task")]
    NotUpdateEligible,

    #[error("the coordinator did not expect this message")]
    UnexpectedMessage,
}

impl Service<Message> for TaskValidatorService {
    type Response = Message;
    type Error = TaskValidatorError;
    type Future = future::Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, message: Message) -> Self::Future {
        let (sum_signature, update_signature) = match message.payload {
            Payload::Sum(ref sum) => (sum.sum_signature, None),
            Payload::Update(ref update) => (update.sum_signature, Some(update.update_signature)),
            Payload::Sum2(ref sum2) => (sum2.sum_signature, None),
            Payload::Chunk(_) => {
                return future::ready(Err(TaskValidatorError::UnexpectedMessage))
            }
        };
        let event = self.params_listener.get_latest();
        let round_id = event.round_id;
        let params = event.event;

        // check whether the participant is eligible for the sum task
        let sum_data = sum_task_data(round_id, &params.seed);
        let has_valid_sum_signature = message
            .participant_pk
            .verify_detached(&sum_signature, &sum_data);
        let is_summer = has_valid_sum_signature && sum_signature.is_eligible(params.sum);

        // check whether the participant is eligible for the update task; a
        // sum participant never is
        let update_data = update_task_data(round_id, &params.seed);
        let is_updater = !is_summer
            && update_signature
                .map(|signature| {
                    message
                        .participant_pk
                        .verify_detached(&signature, &update_data)
                        && signature.is_eligible(params.update)
                })
                .unwrap_or(false);

        match message.payload {
            Payload::Sum(_) | Payload::Sum2(_) => {
                if is_summer {
                    future::ready(Ok(message))
                } else {
                    future::ready(Err(TaskValidatorError::NotSumEligible))
                }
            }
            Payload::Update(_) => {
                if is_updater {
                    future::ready(Ok(message))
                } else {
                    future::ready(Err(TaskValidatorError::NotUpdateEligible))
                }
            }
            Payload::Chunk(_) => future::ready(Err(TaskValidatorError::UnexpectedMessage)),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio_test::assert_ready;
    use tower_test::mock::Spawn;

    use super::*;
    use crate::services::tests::utils;
    use petnet_core::{
        crypto::{EncryptKeyPair, SigningKeyPair},
        message::Sum,
    };

    fn spawn_svc() -> (
        crate::state_machine::events::EventPublisher,
        Spawn<TaskValidatorService>,
    ) {
        let (publisher, subscriber) = utils::new_event_channels();
        let task = Spawn::new(TaskValidatorService::new(&subscriber));
        (publisher, task)
    }

    /// Generates a participant that is (or is not) eligible for the sum task
    /// of the given round.
    fn summer_with_eligibility(
        eligible: bool,
        round_id: u64,
        params: &RoundParameters,
    ) -> (SigningKeyPair, petnet_core::crypto::Signature) {
        let data = sum_task_data(round_id, &params.seed);
        loop {
            let keys = SigningKeyPair::generate();
            let signature = keys.secret.sign_detached(&data);
            if signature.is_eligible(params.sum) == eligible {
                return (keys, signature);
            }
        }
    }

    #[tokio::test]
    async fn test_eligible_summer_passes() {
        let (_publisher, mut task) = spawn_svc();
        assert_ready!(task.poll_ready()).unwrap();

        let event = utils::round_params_event();
        let (keys, signature) = summer_with_eligibility(true, event.round_id, &event.event);
        let sum = Sum {
            sum_signature: signature,
            ephm_pk: EncryptKeyPair::generate().public,
        };
        let message = Message::new_sum(keys.public, utils::coordinator_keys().public, sum);

        assert!(task.call(message).await.is_ok());
    }

    #[tokio::test]
    async fn test_ineligible_summer_is_rejected() {
        let (_publisher, mut task) = spawn_svc();
        assert_ready!(task.poll_ready()).unwrap();

        let event = utils::round_params_event();
        let (keys, signature) = summer_with_eligibility(false, event.round_id, &event.event);
        let sum = Sum {
            sum_signature: signature,
            ephm_pk: EncryptKeyPair::generate().public,
        };
        let message = Message::new_sum(keys.public, utils::coordinator_keys().public, sum);

        assert!(matches!(
            task.call(message).await,
            Err(TaskValidatorError::NotSumEligible)
        ));
    }

    #[tokio::test]
    async fn test_forged_signature_is_rejected() {
        let (_publisher, mut task) = spawn_svc();
        assert_ready!(task.poll_ready()).unwrap();

        // an eligible signature presented by a different key
        let event = utils::round_params_event();
        let (_keys, signature) = summer_with_eligibility(true, event.round_id, &event.event);
        let sum = Sum {
            sum_signature: signature,
            ephm_pk: EncryptKeyPair::generate().public,
        };
        let stranger = SigningKeyPair::generate();
        let message = Message::new_sum(stranger.public, utils::coordinator_keys().public, sum);

        assert!(matches!(
            task.call(message).await,
            Err(TaskValidatorError::NotSumEligible)
        ));
    }

    #[tokio::test]
    async fn test_signature_is_round_specific() {
        let (mut publisher, mut task) = spawn_svc();
        assert_ready!(task.poll_ready()).unwrap();

        // a signature produced for round 0 is worthless in round 1
        let event = utils::round_params_event();
        let (keys, signature) = summer_with_eligibility(true, event.round_id, &event.event);

        publisher.set_round_id(event.round_id + 1);
        publisher.broadcast_params(event.event.clone());

        let sum = Sum {
            sum_signature: signature,
            ephm_pk: EncryptKeyPair::generate().public,
        };
        let message = Message::new_sum(keys.public, utils::coordinator_keys().public, sum);

        assert!(matches!(
            task.call(message).await,
            Err(TaskValidatorError::NotSumEligible)
        ));
    }
}
