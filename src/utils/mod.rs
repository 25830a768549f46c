pub mod redact;

pub use redact::{redact, redact_opt};
