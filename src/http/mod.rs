//! HTTP building blocks: headers, bodies and the codecs around them.

pub mod blob;
pub mod constants;
pub mod dataurl;
pub mod decoder;
pub mod headertable;
pub mod messagebody;
pub mod mime;
pub mod multipart;
pub mod range;

// Re-exports for convenience
pub use blob::{Blob, BlobRegistry, File};
pub use headertable::HeaderTable;
pub use messagebody::{BodyInit, BodySource, ByteStream, MessageBody};
pub use multipart::{FormData, FormDataEntryValue};
