mod common;

use common::{harness, ok_envelope};
use serde_json::json;
use tomorin::Error;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn search_strips_markup_and_normalizes_covers() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/search/type"))
        .and(query_param("search_type", "video"))
        .and(query_param("keyword", "春日影"))
        .and(query_param("page", "1"))
        .and(query_param("page_size", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!({
            "result": [
                {
                    "bvid": "BV1xx411c7mD",
                    "title": "<em class=\"keyword\">春日影</em> MyGO!!!!!",
                    "author": "bushiroad",
                    "pic": "//i0.hdslb.com/bfs/archive/a.jpg",
                    "duration": "4:02"
                }
            ]
        }))))
        .mount(&h.server)
        .await;

    let hits = h.service.search_videos("春日影", 0, 99).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].title, "春日影 MyGO!!!!!");
    assert_eq!(hits[0].cover, "https://i0.hdslb.com/bfs/archive/a.jpg");
    assert_eq!(hits[0].duration, "4:02");
}

#[tokio::test]
async fn rejected_search_yields_no_hits() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/x/web-interface/search/type"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "code": -412, "message": "请求被拦截"
        })))
        .mount(&h.server)
        .await;

    assert!(h.service.search_videos("x", 1, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn favorite_ids_keep_only_videos() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/ids"))
        .and(query_param("media_id", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!([
            { "id": 1, "type": 2, "bvid": "BV1aa", "bv_id": "BV1aa" },
            { "id": 2, "type": 12, "bvid": "", "bv_id": "" },
            { "id": 3, "type": 2, "bv_id": "BV1cc" },
            { "id": 4, "type": 21, "bvid": "BV1dd" }
        ]))))
        .mount(&h.server)
        .await;

    let items = h.service.favorite_folder_bvids(42).await.unwrap();
    let bvids: Vec<&str> = items.iter().map(|i| i.bvid.as_str()).collect();
    assert_eq!(bvids, ["BV1aa", "BV1cc"]);
}

#[tokio::test]
async fn html_answer_means_folder_not_found() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/ids"))
        .respond_with(
            ResponseTemplate::new(404)
                .insert_header("content-type", "text/html")
                .set_body_string("<!DOCTYPE html><html><body>404</body></html>"),
        )
        .mount(&h.server)
        .await;

    assert!(h.service.favorite_folder_bvids(7).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn empty_folder_is_not_found() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/ids"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!([]))))
        .mount(&h.server)
        .await;

    assert!(h.service.favorite_folder_bvids(7).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn folder_info_reads_title_and_count() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/x/v3/fav/resource/list"))
        .and(query_param("media_id", "42"))
        .respond_with(ResponseTemplate::new(200).set_body_json(ok_envelope(json!({
            "info": { "id": 42, "title": "MyGO", "media_count": 13, "cover": "" },
            "medias": []
        }))))
        .mount(&h.server)
        .await;

    let folder = h.service.favorite_folder_info(42).await.unwrap();
    assert_eq!(folder.title, "MyGO");
    assert_eq!(folder.count, 13);
}

#[tokio::test]
async fn own_folders_need_a_session() {
    let h = harness().await;
    let err = h.service.my_favorite_folders().await.unwrap_err();
    assert!(matches!(err, Error::NotLoggedIn), "{err:?}");
    assert!(h.server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn play_history_round_trips_through_the_service() {
    let h = harness().await;
    assert_eq!(h.service.play_history().await.unwrap().song_id, "");

    let saved = h.service.save_play_history("fav-1", "song-1").await.unwrap();
    let loaded = h.service.play_history().await.unwrap();
    assert_eq!(loaded.favorite_id, "fav-1");
    assert_eq!(loaded.song_id, "song-1");
    assert_eq!(loaded.timestamp, saved.timestamp);
}
