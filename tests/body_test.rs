mod common;

use base64::Engine;
use common::{gzip, MockDispatcher, MockResponse};
use fetchnet::{Client, NetError, ResponseView};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::io::Write;

#[tokio::test]
async fn test_body_reads_once() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200).body("once")]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();

    assert!(!resp.body_used());
    assert_eq!(resp.text().await.unwrap(), "once");
    assert!(resp.body_used());
    assert_eq!(resp.text().await.unwrap_err(), NetError::BodyUnusable);
    assert!(resp.try_clone().is_err());
}

#[tokio::test]
async fn test_clone_reads_independently() {
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).chunks(["split ", "into ", "chunks"]),
    ]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    let mut copy = resp.try_clone().unwrap();

    assert_eq!(copy.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "split into chunks");
    assert_eq!(copy.text().await.unwrap(), "split into chunks");
}

#[tokio::test]
async fn test_json_body() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200)
        .header("Content-Type", "application/json")
        .body(r#"{"name":"widget","count":3}"#)]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();

    let value: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(value["name"], "widget");
    assert_eq!(value["count"], 3);
}

#[tokio::test]
async fn test_invalid_json_fails_only_the_read() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200).body("{not json")]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    let err = resp.json::<serde_json::Value>().await.unwrap_err();
    assert!(matches!(err, NetError::JsonParse(_)));
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_blob_keeps_content_type() {
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).header("Content-Type", "image/png").body(&b"\x89PNG"[..]),
    ]);
    let mut resp = mock.client().get("http://site.example/logo.png").send().await.unwrap();
    let blob = resp.blob().await.unwrap();
    assert_eq!(blob.size(), 4);
    assert_eq!(blob.content_type(), "image/png");
}

#[tokio::test]
async fn test_form_data_from_urlencoded_response() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200)
        .header("Content-Type", "application/x-www-form-urlencoded")
        .body("a=1&b=two+words")]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    let form = resp.form_data().await.unwrap();
    assert_eq!(form.get("a").and_then(|v| v.as_text()), Some("1"));
    assert_eq!(form.get("b").and_then(|v| v.as_text()), Some("two words"));
}

#[tokio::test]
async fn test_form_data_rejects_other_types() {
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).header("Content-Type", "text/plain").body("a=1"),
    ]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    assert_eq!(resp.form_data().await.unwrap_err(), NetError::FormDataContentType);
}

#[tokio::test]
async fn test_gzip_is_decoded() {
    let plain = "the quick brown fox jumps over the lazy dog ".repeat(50);
    let encoded = gzip(plain.as_bytes());
    let (head, tail) = encoded.split_at(encoded.len() / 2);
    let mock = MockDispatcher::with(vec![MockResponse::new(200)
        .header("Content-Encoding", "gzip")
        .body(head.to_vec())
        .body(tail.to_vec())]);

    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), plain);

    let timing = resp.timing();
    assert_eq!(timing.encoded_body_size, encoded.len() as u64);
    assert_eq!(timing.decoded_body_size, plain.len() as u64);
}

#[tokio::test]
async fn test_deflate_is_decoded() {
    let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(b"deflated payload").unwrap();
    let encoded = encoder.finish().unwrap();

    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).header("Content-Encoding", "deflate").body(encoded),
    ]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "deflated payload");
}

#[tokio::test]
async fn test_brotli_is_decoded() {
    let mut encoded = Vec::new();
    {
        let mut writer = brotli::CompressorWriter::new(&mut encoded, 4096, 5, 22);
        writer.write_all(b"brotli payload").unwrap();
    }
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).header("Content-Encoding", "br").body(encoded),
    ]);
    let mut resp = mock.client().get("https://site.example/").send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "brotli payload");
}

#[tokio::test]
async fn test_layered_codings_decode_in_reverse() {
    let inner = gzip(b"twice wrapped");
    let outer = gzip(&inner);
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).header("Content-Encoding", "gzip, gzip").body(outer),
    ]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "twice wrapped");
}

#[tokio::test]
async fn test_unknown_coding_passes_through() {
    let raw = b"\x28\xb5\x2f\xfd not really zstd".to_vec();
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).header("Content-Encoding", "zstd").body(raw.clone()),
    ]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    assert_eq!(resp.bytes().await.unwrap().as_ref(), raw.as_slice());
}

#[tokio::test]
async fn test_corrupt_gzip_errors_the_body() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200)
        .header("Content-Encoding", "gzip")
        .body(&b"definitely not gzip data"[..])]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert!(resp.bytes().await.is_err());
}

#[tokio::test]
async fn test_head_has_no_body() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200).header("Content-Length", "5")]);
    let resp = mock.client().head("http://site.example/").send().await.unwrap();
    assert!(!resp.has_body());
    assert_eq!(resp.headers().get("content-length"), Some("5"));
}

#[tokio::test]
async fn test_no_content_has_no_body() {
    let mock = MockDispatcher::with(vec![MockResponse::new(204).status_text("No Content")]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();
    assert!(!resp.has_body());
    assert_eq!(resp.text().await.unwrap(), "");
}

#[tokio::test]
async fn test_backpressure_preserves_order() {
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).chunks(["aaaa", "bbbb", "cccc", "dddd", "eeee"]),
    ]);
    let client = Client::builder().dispatcher(mock.clone()).high_water_mark(4).build();

    let mut resp = client.get("http://site.example/").send().await.unwrap();
    let mut stream = resp.body_mut().unwrap().take_stream().unwrap();
    let mut seen = Vec::new();
    while let Some(chunk) = stream.next().await {
        seen.push(chunk.unwrap());
        tokio::task::yield_now().await;
    }
    assert_eq!(seen.concat(), b"aaaabbbbccccddddeeee");
}

#[tokio::test]
async fn test_transport_error_mid_body() {
    let mock = MockDispatcher::with(vec![
        MockResponse::new(200).body("partial").error(NetError::ConnectionReset),
    ]);
    let mut resp = mock.client().get("http://site.example/").send().await.unwrap();

    let mut stream = resp.body_mut().unwrap().take_stream().unwrap();
    assert_eq!(stream.next().await.unwrap().unwrap().as_ref(), b"partial");
    let err = stream.next().await.unwrap().unwrap_err();
    assert!(matches!(err, NetError::Terminated { .. }));
    assert_eq!(err.cause(), Some(&NetError::ConnectionReset));
    assert!(stream.next().await.is_none());
}

fn sri_sha256(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    format!("sha256-{}", base64::engine::general_purpose::STANDARD.encode(digest))
}

#[tokio::test]
async fn test_integrity_match() {
    let body = "console.log('hi');";
    let mock = MockDispatcher::with(vec![MockResponse::new(200).body(body)]);
    let mut resp = mock
        .client()
        .get("http://site.example/app.js")
        .integrity(sri_sha256(body.as_bytes()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.text().await.unwrap(), body);
}

#[tokio::test]
async fn test_integrity_mismatch() {
    let mock = MockDispatcher::with(vec![MockResponse::new(200).body("tampered")]);
    let err = mock
        .client()
        .get("http://site.example/app.js")
        .integrity(sri_sha256(b"original"))
        .send()
        .await
        .unwrap_err();
    assert_eq!(err.cause(), Some(&NetError::IntegrityMismatch));
}
