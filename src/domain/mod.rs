pub mod transaction;

pub use transaction::{
    intent_id_from_reference, normalize_currency, validate_amount, validate_intent_id,
    validate_reader_id, Observation, Transaction, TransactionState, TransitionError,
};
