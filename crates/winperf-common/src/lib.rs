pub mod error;
pub mod types;

pub use error::{Result, WinperfError};
pub use types::{CounterSetConfig, CounterSpec, NativeCode, SetState};
