pub mod dispatcher;

pub use dispatcher::{DispatchError, DispatchResult, Dispatcher, Fields, Payload};
