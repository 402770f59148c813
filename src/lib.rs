//! # fetchnet
//!
//! A fetch engine for Rust.
//!
//! `fetchnet` turns an abstract request into a response by running it
//! through the fetch pipeline: scheme dispatch, redirect following, response
//! tainting and filtering, body streaming with backpressure, content
//! decoding and cancellation. The wire is a pluggable [`Dispatcher`]; the
//! default one speaks HTTP/1.1 over hyper with BoringSSL for TLS.
//!
//! ## Features
//!
//! - **Redirects**: 301/302/303/307/308 with method rewriting, header
//!   stripping across origins and body replay
//! - **Tainting**: basic, cors and opaque responses with filtered views
//! - **Bodies**: text, bytes, JSON, blobs, `FormData` and streams, with tee
//!   for cloning
//! - **Decoding**: gzip, deflate and brotli
//! - **Cancellation**: `AbortSignal`, timeouts, mid-stream aborts
//! - **Local schemes**: `data:` and `blob:` (with ranges)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fetchnet::{fetch, RequestInit};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut response = fetch("https://example.com", RequestInit::default())
//!         .await
//!         .unwrap();
//!     println!("Status: {}", response.status());
//!     println!("{}", response.text().await.unwrap());
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Errors, cancellation and load states
//! - [`http`] - Headers, bodies, blobs and codecs
//! - [`fetch`] - Requests, responses and the fetch pipeline
//! - [`transport`] - The dispatcher contract and the default hyper transport
//! - [`socket`] - TCP and TLS connection setup

pub mod base;
pub mod client;
pub mod fetch;
pub mod http;
pub mod socket;
pub mod transport;

pub use base::abort::{AbortController, AbortReason, AbortSignal};
pub use base::neterror::NetError;
pub use client::{fetch, fetch_with_context, Client, ClientBuilder, RequestBuilder};
pub use fetch::{
    FetchContext, FetchContextConfig, Request, RequestInit, Response, ResponseInit, ResponseType,
    ResponseView,
};
pub use http::{BodyInit, HeaderTable};
pub use transport::{DispatchHandler, DispatchOptions, Dispatcher, HyperDispatcher};
