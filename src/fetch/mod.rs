//! The fetch pipeline.
//!
//! A fetch runs through a fixed sequence of stages, each taking the
//! [`FetchParams`](mainfetch::FetchParams) of the fetch:
//!
//! `main_fetch` → `scheme_fetch` → `http_fetch` → (`http_redirect_fetch` →
//! `main_fetch`)* → `http_network_or_cache_fetch` → `http_network_fetch`.
//!
//! Stages never fail with `Err`; failures are network error responses.

pub mod context;
pub mod controller;
mod httpfetch;
pub mod integrity;
pub mod mainfetch;
mod networkfetch;
pub mod referrer;
pub mod request;
pub mod response;
mod schemefetch;
pub mod timing;

pub use context::{FetchContext, FetchContextConfig};
pub use controller::{ControllerState, FetchController};
pub use referrer::ReferrerPolicy;
pub use request::{
    CacheMode, CredentialsMode, Duplex, RedirectMode, Request, RequestInit, RequestInput,
    RequestMode, ResponseTainting,
};
pub use response::{Response, ResponseInit, ResponseRecord, ResponseType, ResponseView};
pub use timing::TimingInfo;
