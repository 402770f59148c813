//! Base types and error handling.
//!
//! - [`NetError`](neterror::NetError): error taxonomy with `net_error_list.h` style codes
//! - [`LoadState`](loadstate::LoadState): fetch progress
//! - [`AbortController`](abort::AbortController) and
//!   [`AbortSignal`](abort::AbortSignal): cancellation

pub mod abort;
pub mod context;
pub mod loadstate;
pub mod neterror;
