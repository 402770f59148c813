//! The boundary between the fetch pipeline and the wire.
//!
//! - [`dispatcher`]: the `Dispatcher` / `DispatchHandler` callback contract
//! - [`adapter`]: turns dispatcher callbacks into a pull-based response body
//! - [`hyperdispatcher`]: the default dispatcher over hyper's HTTP/1.1 client

pub mod adapter;
pub mod dispatcher;
pub mod hyperdispatcher;

pub use dispatcher::{
    AbortFn, DispatchHandler, DispatchOptions, Dispatcher, RawHeaders, ResumeFn, UpgradedIo,
};
pub use hyperdispatcher::HyperDispatcher;
