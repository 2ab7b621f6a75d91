mod common;

use common::{client_for, harness, ok_envelope, service_in};
use serde_json::json;
use tomorin::bili::login::LoginPollState;
use tomorin::credentials::CredentialStore;
use tomorin::Error;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_poll(server: &MockServer, code: i64, set_cookie: Option<&str>) {
    let mut template = ResponseTemplate::new(200).set_body_json(ok_envelope(json!({
        "url": "",
        "refresh_token": "",
        "timestamp": 0,
        "code": code,
        "message": ""
    })));
    if let Some(cookie) = set_cookie {
        template = template.insert_header("set-cookie", cookie);
    }
    Mock::given(method("GET"))
        .and(path("/x/passport-login/web/qrcode/poll"))
        .and(query_param("qrcode_key", "key-1"))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn generate_returns_key_and_three_minute_expiry() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/x/passport-login/web/qrcode/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!({
            "url": "https://account.bilibili.com/h5/account-h5/auth/scan-web?qrcode_key=key-1",
            "qrcode_key": "key-1"
        }))))
        .mount(&h.server)
        .await;

    let qr = h.service.generate_login_qr().await.unwrap();
    assert_eq!(qr.qrcode_key, "key-1");
    let ttl = qr.expire_at - chrono::Utc::now();
    assert!(ttl <= chrono::Duration::minutes(3));
    assert!(ttl > chrono::Duration::minutes(2));
}

#[tokio::test]
async fn pending_poll_does_not_log_in() {
    let h = harness().await;
    mount_poll(&h.server, 86101, None).await;

    let state = h.service.poll_login("key-1").await.unwrap();
    assert_eq!(state, LoginPollState::NotScanned);
    assert!(!h.service.is_logged_in());
    assert!(!h.paths().credential_file.exists());
}

#[tokio::test]
async fn successful_poll_logs_in_and_persists_session() {
    let h = harness().await;
    mount_poll(&h.server, 0, Some("SESSDATA=abc%2C1767225600%2Cdef; Path=/; HttpOnly")).await;

    let state = h.service.poll_login("key-1").await.unwrap();
    assert_eq!(state, LoginPollState::Success);
    assert!(h.service.is_logged_in());

    let saved: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&h.paths().credential_file).unwrap()).unwrap();
    assert_eq!(saved["sessdata"], "abc%2C1767225600%2Cdef");
    assert!(saved["saved_at"].as_str().is_some_and(|s| !s.is_empty()));

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&h.paths().credential_file)
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[tokio::test]
async fn logout_clears_memory_and_disk() {
    let h = harness().await;
    mount_poll(&h.server, 0, Some("SESSDATA=abc; Path=/")).await;
    h.service.poll_login("key-1").await.unwrap();
    assert!(h.service.is_logged_in());

    h.service.logout().await;
    assert!(!h.service.is_logged_in());
    assert!(!h.paths().credential_file.exists());

    // Logging out twice is harmless.
    h.service.logout().await;
    assert!(!h.service.is_logged_in());
}

#[tokio::test]
async fn saved_session_is_restored_on_start() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let data_dir = tmp.path().join("data");
    std::fs::create_dir_all(&data_dir).unwrap();
    std::fs::write(
        data_dir.join("sessdata.json"),
        r#"{"sessdata":"restored-value","saved_at":"2025-01-01T00:00:00Z"}"#,
    )
    .unwrap();

    let service = service_in(&server, &tmp).await;
    assert!(service.is_logged_in());
}

#[tokio::test]
async fn restore_edge_cases() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let file = tmp.path().join("sessdata.json");
    let store = CredentialStore::new(client_for(&server), &file);

    // First run: no file.
    assert!(!store.restore().await.unwrap());

    std::fs::write(&file, r#"{"sessdata":"","saved_at":""}"#).unwrap();
    assert!(!store.restore().await.unwrap());
    assert!(!store.is_logged_in());

    std::fs::write(&file, "{broken").unwrap();
    assert!(matches!(store.restore().await.unwrap_err(), Error::Json(_)));
    assert!(!store.is_logged_in());
}

#[tokio::test]
async fn save_without_session_is_not_logged_in() {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let store = CredentialStore::new(client_for(&server), tmp.path().join("sessdata.json"));
    assert!(matches!(store.save().await.unwrap_err(), Error::NotLoggedIn));
    assert!(!store.path().exists());
}

#[tokio::test]
async fn user_info_requires_login() {
    let h = harness().await;
    assert!(matches!(
        h.service.user_info().await.unwrap_err(),
        Error::NotLoggedIn
    ));

    mount_poll(&h.server, 0, Some("SESSDATA=abc; Path=/")).await;
    h.service.poll_login("key-1").await.unwrap();
    Mock::given(method("GET"))
        .and(path("/x/web-interface/nav"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!({
            "isLogin": true,
            "mid": 20165629,
            "uname": "tomorin",
            "face": "https://i0.hdslb.com/bfs/face/a.jpg",
            "level_info": { "current_level": 6 },
            "vipType": 2
        }))))
        .mount(&h.server)
        .await;

    let user = h.service.user_info().await.unwrap();
    assert_eq!(user.uid, 20165629);
    assert_eq!(user.username, "tomorin");
    assert_eq!(user.level, 6);
    assert_eq!(user.vip_type, 2);
}
