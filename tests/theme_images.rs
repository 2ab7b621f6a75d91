mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use common::{harness, list_dir};
use sha2::{Digest, Sha256};
use tomorin::Error;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

const PNG: &[u8] = &[
    0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0, 0, 13, b'I', b'H', b'D', b'R', 0, 0,
    0, 1, 0, 0, 0, 1,
];

fn expected_name(data: &[u8], ext: &str) -> String {
    format!("{:x}.{ext}", Sha256::digest(data))
}

#[tokio::test]
async fn data_url_is_stored_once_by_content_hash() {
    let h = harness().await;
    let data_url = format!("data:image/png;base64,{}", STANDARD.encode(PNG));

    let first = h.service.save_theme_image_from_data_url(&data_url).await.unwrap();
    let second = h.service.save_theme_image_from_data_url(&data_url).await.unwrap();

    let name = expected_name(PNG, "png");
    assert_eq!(first, second);
    assert!(first.ends_with(&format!("/theme-image?f={name}")));
    assert_eq!(list_dir(&h.paths().theme_images_dir), vec![name]);
}

#[tokio::test]
async fn malformed_data_urls_are_rejected() {
    let h = harness().await;
    for input in [
        "",
        "https://example.com/a.png",
        "data:text/plain;base64,aGVsbG8=",
        "data:image/png,rawbytes",
        "data:image/png;base64,!!!",
        "data:image/png;base64,",
    ] {
        let err = h
            .service
            .save_theme_image_from_data_url(input)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{input}: {err:?}");
    }
    assert!(list_dir(&h.paths().theme_images_dir).is_empty());
}

#[tokio::test]
async fn remote_image_is_downloaded_and_stored() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/bg.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(PNG.to_vec()),
        )
        .mount(&h.server)
        .await;

    let url = h
        .service
        .save_theme_image_from_url(&format!("{}/bg.png", h.server.uri()))
        .await
        .unwrap();

    let name = expected_name(PNG, "png");
    assert!(url.ends_with(&name));
    assert_eq!(
        std::fs::read(h.paths().theme_images_dir.join(&name)).unwrap(),
        PNG
    );
}

#[tokio::test]
async fn missing_content_type_is_sniffed() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/bg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG.to_vec()))
        .mount(&h.server)
        .await;

    let url = h
        .service
        .save_theme_image_from_url(&format!("{}/bg", h.server.uri()))
        .await
        .unwrap();
    assert!(url.ends_with(".png"));
}

#[tokio::test]
async fn non_image_responses_are_rejected() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html; charset=utf-8")
                .set_body_string("<html></html>"),
        )
        .mount(&h.server)
        .await;

    let err = h
        .service
        .save_theme_image_from_url(&format!("{}/page", h.server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err:?}");
    assert!(list_dir(&h.paths().theme_images_dir).is_empty());
}

#[tokio::test]
async fn upstream_failure_status_is_reported() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&h.server)
        .await;

    let err = h
        .service
        .save_theme_image_from_url(&format!("{}/gone.png", h.server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UpstreamStatus(404)), "{err:?}");
}

#[tokio::test]
async fn oversized_images_are_rejected() {
    let h = harness().await;
    let mut body = PNG.to_vec();
    body.resize(20 * 1024 * 1024 + 1, 0);
    Mock::given(method("GET"))
        .and(path("/huge.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(body),
        )
        .mount(&h.server)
        .await;

    let err = h
        .service
        .save_theme_image_from_url(&format!("{}/huge.png", h.server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)), "{err:?}");
    assert!(list_dir(&h.paths().theme_images_dir).is_empty());
}

#[tokio::test]
async fn empty_and_non_http_urls_are_rejected() {
    let h = harness().await;
    for input in ["", "   ", "file:///etc/passwd", "javascript:alert(1)"] {
        let err = h.service.save_theme_image_from_url(input).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "{input}: {err:?}");
    }
    assert!(h.server.received_requests().await.unwrap().is_empty());
}
