pub mod sim;
pub mod traits;

pub use sim::{SimFixture, SimProvider, SimReadMode};
pub use traits::{
    AddOutcome, CounterId, CounterProvider, InstanceValue, PathValidation, QueryId, ReadOutcome,
};
