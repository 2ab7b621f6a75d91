#![allow(dead_code)]

use serde_json::{json, Value};
use tempfile::TempDir;
use tomorin::bili::{BiliClient, BiliEndpoints};
use tomorin::settings::HttpTimeouts;
use tomorin::{PathConfig, Service, Settings};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const BVID: &str = "BV1xx411c7mD";

pub struct Harness {
    pub server: MockServer,
    pub tmp: TempDir,
    pub service: Service,
}

impl Harness {
    pub fn paths(&self) -> &PathConfig {
        self.service.paths()
    }
}

pub fn client_for(server: &MockServer) -> BiliClient {
    BiliClient::with_endpoints(BiliEndpoints::with_base(&server.uri()), HttpTimeouts::default())
        .unwrap()
}

pub fn test_settings() -> Settings {
    Settings {
        proxy_port: 0,
        ..Settings::default()
    }
}

/// Service with every platform endpoint pointed at a fresh mock server and
/// its data directory in a temp dir.
pub async fn harness() -> Harness {
    let server = MockServer::start().await;
    let tmp = tempfile::tempdir().unwrap();
    let service = service_in(&server, &tmp).await;
    Harness {
        server,
        tmp,
        service,
    }
}

pub async fn service_in(server: &MockServer, tmp: &TempDir) -> Service {
    Service::with_client(
        &test_settings(),
        PathConfig::new(tmp.path().join("data")),
        client_for(server),
    )
    .await
    .unwrap()
}

pub fn ok_envelope(data: Value) -> Value {
    json!({ "code": 0, "message": "0", "ttl": 1, "data": data })
}

pub async fn mount_pagelist(server: &MockServer, bvid: &str, cids: &[i64]) {
    let pages: Vec<Value> = cids
        .iter()
        .enumerate()
        .map(|(i, cid)| {
            json!({
                "cid": cid,
                "page": i + 1,
                "part": format!("P{}", i + 1),
                "duration": 200 + i as i64,
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/x/player/pagelist"))
        .and(query_param("bvid", bvid))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!(pages))))
        .mount(server)
        .await;
}

pub async fn mount_playurl(server: &MockServer, cid: i64, audio_url: &str) {
    Mock::given(method("GET"))
        .and(path("/x/player/playurl"))
        .and(query_param("cid", cid.to_string()))
        .and(query_param("fnval", "4048"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!({
            "dash": {
                "audio": [
                    { "id": 30280, "baseUrl": audio_url, "backupUrl": [], "bandwidth": 319173 }
                ]
            }
        }))))
        .mount(server)
        .await;
}

/// Files in `dir`, sorted, empty when the directory is absent.
pub fn list_dir(dir: &std::path::Path) -> Vec<String> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
