//! Content-Encoding decoder chain.
//!
//! One stage per coding listed in `Content-Encoding`, applied from the
//! rightmost (last applied, innermost) coding outward. Each stage is a
//! push-style writer so chunks can be decoded as the transport delivers them.

use crate::base::neterror::NetError;
use bytes::Bytes;
use flate2::write::{DeflateDecoder, GzDecoder, ZlibDecoder};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

const BROTLI_BUFFER_SIZE: usize = 4096;

/// Writer that collects decoder output for draining between writes.
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl Sink {
    fn drain(&self) -> Vec<u8> {
        std::mem::take(&mut *self.0.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Decoder {
    Gzip(GzDecoder<Sink>),
    /// `deflate` is meant to be zlib-wrapped but servers often send raw
    /// deflate; the first byte decides.
    DeflateUndecided,
    Zlib(ZlibDecoder<Sink>),
    RawDeflate(DeflateDecoder<Sink>),
    Brotli(Box<brotli::DecompressorWriter<Sink>>),
}

struct Stage {
    decoder: Decoder,
    sink: Sink,
}

impl Stage {
    fn new(coding: &str) -> Option<Stage> {
        let sink = Sink::default();
        let decoder = match coding {
            "gzip" | "x-gzip" => Decoder::Gzip(GzDecoder::new(sink.clone())),
            "deflate" => Decoder::DeflateUndecided,
            "br" => {
                let writer = brotli::DecompressorWriter::new(sink.clone(), BROTLI_BUFFER_SIZE);
                Decoder::Brotli(Box::new(writer))
            }
            _ => return None,
        };
        Some(Stage { decoder, sink })
    }

    fn write(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }
        if matches!(self.decoder, Decoder::DeflateUndecided) {
            self.decoder = if input[0] & 0x0F == 0x08 {
                Decoder::Zlib(ZlibDecoder::new(self.sink.clone()))
            } else {
                Decoder::RawDeflate(DeflateDecoder::new(self.sink.clone()))
            };
        }
        match &mut self.decoder {
            Decoder::Gzip(d) => d.write_all(input)?,
            Decoder::Zlib(d) => d.write_all(input)?,
            Decoder::RawDeflate(d) => d.write_all(input)?,
            Decoder::Brotli(d) => d.write_all(input)?,
            Decoder::DeflateUndecided => {}
        }
        Ok(self.sink.drain())
    }

    fn finish(&mut self) -> io::Result<Vec<u8>> {
        match &mut self.decoder {
            Decoder::Gzip(d) => d.try_finish()?,
            Decoder::Zlib(d) => d.try_finish()?,
            Decoder::RawDeflate(d) => d.try_finish()?,
            Decoder::Brotli(d) => d.flush()?,
            Decoder::DeflateUndecided => {}
        }
        Ok(self.sink.drain())
    }
}

pub struct DecoderChain {
    stages: Vec<Stage>,
    codings: Vec<String>,
}

impl std::fmt::Debug for DecoderChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderChain").field("codings", &self.codings).finish()
    }
}

impl DecoderChain {
    /// Builds a chain for `codings` as listed in the header (left to right).
    ///
    /// Returns `None` when there is nothing to decode or when any coding is
    /// unknown; in the latter case the body is passed through untouched.
    pub fn from_codings(codings: &[String]) -> Option<DecoderChain> {
        let codings: Vec<String> = codings
            .iter()
            .map(|c| c.trim().to_ascii_lowercase())
            .filter(|c| !c.is_empty() && c != "identity")
            .collect();
        if codings.is_empty() {
            return None;
        }

        let mut stages = Vec::with_capacity(codings.len());
        for coding in codings.iter().rev() {
            match Stage::new(coding) {
                Some(stage) => stages.push(stage),
                None => {
                    tracing::debug!(
                        coding = %coding,
                        "unknown content coding, passing body through"
                    );
                    return None;
                }
            }
        }
        Some(DecoderChain { stages, codings })
    }

    pub fn codings(&self) -> &[String] {
        &self.codings
    }

    /// Pushes an encoded chunk through every stage and returns whatever
    /// decoded output is available so far (possibly empty).
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Bytes, NetError> {
        let mut data = chunk.to_vec();
        for stage in &mut self.stages {
            data = stage.write(&data).map_err(decoding_failed)?;
        }
        Ok(Bytes::from(data))
    }

    /// Flushes every stage at end of input.
    pub fn finish(&mut self) -> Result<Bytes, NetError> {
        let mut data = Vec::new();
        for stage in &mut self.stages {
            let mut out = stage.write(&data).map_err(decoding_failed)?;
            out.extend(stage.finish().map_err(decoding_failed)?);
            data = out;
        }
        Ok(Bytes::from(data))
    }
}

fn decoding_failed(e: io::Error) -> NetError {
    NetError::ContentDecodingFailed(e.to_string())
}
