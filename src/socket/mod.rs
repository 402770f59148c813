//! Connection establishment for the default dispatcher, mirroring Chromium's
//! `net/socket/`:
//! - [`connectjob`]: DNS → TCP → TLS connection flow
//! - [`client`]: the connected socket (plain TCP or BoringSSL)

pub mod client;
pub mod connectjob;
