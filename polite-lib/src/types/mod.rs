#![allow(unreachable_pub)]

mod error;
mod task;

pub use error::ErrorKind;
pub use task::Task;
pub(crate) use task::Delivery;

/// The polite `Result` type
pub type Result<T> = std::result::Result<T, crate::ErrorKind>;
