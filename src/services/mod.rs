pub mod cache;
pub mod compensation;
pub mod coordinator;
pub mod poller;

pub use cache::TransactionCache;
pub use compensation::{CancelOutcome, CompensationHandler, RefundOutcome, StepOutcome};
pub use coordinator::{Dispatch, StatusCheck, TransactionCoordinator};
pub use poller::{PollOutcome, PollPolicy, PollSession, Sleeper, StatusPoller, TokioSleeper};
