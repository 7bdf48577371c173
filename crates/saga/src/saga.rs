//! The contract a saga type fulfils to be persisted.

use common::CorrelationId;
use serde::{Serialize, de::DeserializeOwned};

/// A long-running conversation correlated across messages.
///
/// The persister only touches `id` and `state`; everything else on the
/// implementing type is behavior and is rebuilt from `Default` on load.
pub trait Saga: Default + Send + Sync + 'static {
    /// Saga type name, used as the collection of its persisted documents.
    const NAME: &'static str;

    /// The persisted part of the saga.
    type State: Serialize + DeserializeOwned + Send + Sync;

    fn id(&self) -> CorrelationId;

    fn set_id(&mut self, id: CorrelationId);

    fn state(&self) -> &Self::State;

    fn set_state(&mut self, state: Self::State);

    /// Once true, the next persist removes the saga's document instead of saving it.
    fn is_completed(&self) -> bool;
}
