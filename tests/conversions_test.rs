//! Integration tests for the conversion lifecycle.

mod common;

use serial_test::serial;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{list_files, upstream_with, TestHarness, FFMPEG_COPY, FFMPEG_FAIL, FFMPEG_HANG};

#[tokio::test]
#[serial]
async fn conversion_completes_and_file_is_served() {
    let h = TestHarness::with_ffmpeg(FFMPEG_COPY).await;
    let upstream = upstream_with("/voice.wav", b"RIFF....WAVEfmt fake audio").await;

    let task_id = h.submit_ok(&format!("{}/voice.wav", upstream.uri())).await;
    assert!(uuid_like(&task_id), "task id is not a UUID: {task_id}");

    let status = h.wait_until_finished(&task_id).await;
    assert_eq!(status["status"], "completed", "{status}");
    let url = status["converted_audio_url"].as_str().unwrap();
    assert_eq!(url, format!("http://{}/files/{task_id}.ogg", h.addr));
    assert!(status.get("detail").is_none());

    let resp = h.client.get(url).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "audio/ogg");
    assert_eq!(&resp.bytes().await.unwrap()[..], b"RIFF....WAVEfmt fake audio");

    assert_eq!(list_files(&h.output_dir()), vec![format!("{task_id}.ogg")]);
    assert!(list_files(&h.work_dir()).is_empty(), "scratch files leaked");
}

#[tokio::test]
#[serial]
async fn completed_status_is_stable() {
    let h = TestHarness::with_ffmpeg(FFMPEG_COPY).await;
    let upstream = upstream_with("/a.mp3", b"ID3").await;

    let task_id = h.submit_ok(&format!("{}/a.mp3", upstream.uri())).await;
    let first = h.wait_until_finished(&task_id).await;
    let (_, second) = h.status(&task_id).await;
    assert_eq!(first, second);
}

#[tokio::test]
#[serial]
async fn ffmpeg_failure_is_reported() {
    let h = TestHarness::with_ffmpeg(FFMPEG_FAIL).await;
    let upstream = upstream_with("/garbage.mp3", b"not audio").await;

    let task_id = h.submit_ok(&format!("{}/garbage.mp3", upstream.uri())).await;
    let status = h.wait_until_finished(&task_id).await;

    assert_eq!(status["status"], "failed");
    let detail = status["detail"].as_str().unwrap();
    assert!(detail.contains("Invalid data found"), "detail: {detail}");
    assert!(status.get("converted_audio_url").is_none());

    assert!(list_files(&h.output_dir()).is_empty());
    assert!(list_files(&h.work_dir()).is_empty(), "scratch files leaked");

    let resp = h
        .client
        .get(h.url(&format!("/files/{task_id}.ogg")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
#[serial]
async fn upstream_error_fails_task() {
    let h = TestHarness::with_ffmpeg(FFMPEG_COPY).await;
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&upstream)
        .await;

    let task_id = h.submit_ok(&format!("{}/missing.mp3", upstream.uri())).await;
    let status = h.wait_until_finished(&task_id).await;

    assert_eq!(status["status"], "failed");
    let detail = status["detail"].as_str().unwrap();
    assert!(detail.contains("404"), "detail: {detail}");
}

#[tokio::test]
#[serial]
async fn oversized_source_fails_task() {
    let h = TestHarness::with_ffmpeg_config(FFMPEG_COPY, |c| {
        c.conversion.max_download_bytes = Some(8);
    })
    .await;
    let upstream = upstream_with("/big.wav", &[7u8; 64]).await;

    let task_id = h.submit_ok(&format!("{}/big.wav", upstream.uri())).await;
    let status = h.wait_until_finished(&task_id).await;
    assert_eq!(status["status"], "failed");
}

#[tokio::test]
#[serial]
async fn invalid_url_is_rejected_without_task() {
    let h = TestHarness::with_ffmpeg(FFMPEG_COPY).await;

    for bad in ["", "not a url", "ftp://example.com/a.mp3"] {
        let (code, body) = h.submit(bad).await;
        assert_eq!(code, 400, "{bad}: {body}");
        assert_eq!(body["code"], "validation_error");
        assert!(body["detail"].is_string());
    }
    assert!(h.ctx.registry.is_empty());
}

#[tokio::test]
#[serial]
async fn malformed_body_is_validation_error() {
    let h = TestHarness::with_ffmpeg(FFMPEG_COPY).await;
    let bodies = [
        ("application/json", r#"{"uri": "http://example.com/a.mp3"}"#),
        ("application/json", "{not json"),
        ("application/json", r#"{"url": 42}"#),
        ("text/plain", r#"{"url": "http://example.com/a.mp3"}"#),
    ];

    for (content_type, raw) in bodies {
        let resp = h
            .client
            .post(h.url("/request-conversion/"))
            .header("content-type", content_type)
            .header("x-request-id", "bad-body")
            .body(raw)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400, "{content_type} {raw}");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["code"], "validation_error", "{body}");
        assert!(body["detail"].is_string());
        assert_eq!(body["request_id"], "bad-body");
    }
    assert!(h.ctx.registry.is_empty());
}

#[tokio::test]
async fn missing_ffmpeg_is_server_error() {
    let h = TestHarness::without_ffmpeg().await;
    let (code, body) = h.submit("http://example.com/a.mp3").await;

    assert_eq!(code, 500);
    assert_eq!(body["code"], "config_error");
    assert!(body["detail"].as_str().unwrap().contains("ffmpeg"));
    assert!(h.ctx.registry.is_empty());
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = TestHarness::without_ffmpeg().await;

    for id in ["00000000-0000-0000-0000-000000000001", "not-a-task"] {
        let (code, body) = h.status(id).await;
        assert_eq!(code, 404, "{id}");
        assert_eq!(body["code"], "not_found");
        assert!(body["request_id"].is_string());
    }
}

#[tokio::test]
#[serial]
async fn concurrent_submissions_get_distinct_ids() {
    let h = TestHarness::with_ffmpeg(FFMPEG_COPY).await;
    let upstream = upstream_with("/a.mp3", b"ID3").await;
    let source = format!("{}/a.mp3", upstream.uri());

    let mut requests = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let client = h.client.clone();
        let endpoint = h.url("/request-conversion/");
        let source = source.clone();
        requests.spawn(async move {
            let resp = client
                .post(endpoint)
                .json(&serde_json::json!({ "url": source }))
                .send()
                .await
                .unwrap();
            assert_eq!(resp.status(), 200);
            let body: serde_json::Value = resp.json().await.unwrap();
            body["task_id"].as_str().unwrap().to_string()
        });
    }
    let mut ids = Vec::new();
    while let Some(id) = requests.join_next().await {
        ids.push(id.unwrap());
    }

    for id in &ids {
        assert_eq!(h.wait_until_finished(id).await["status"], "completed");
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 8);
    assert_eq!(list_files(&h.output_dir()).len(), 8);
}

#[tokio::test]
#[serial]
async fn cancel_running_conversion() {
    let h = TestHarness::with_ffmpeg(FFMPEG_HANG).await;
    let upstream = upstream_with("/slow.mp3", b"ID3").await;

    let task_id = h.submit_ok(&format!("{}/slow.mp3", upstream.uri())).await;

    let resp = h
        .client
        .delete(h.url(&format!("/conversion/{task_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "failed");
    assert_eq!(body["detail"], "conversion cancelled");

    let status = h.wait_until_finished(&task_id).await;
    assert_eq!(status["detail"], "conversion cancelled");

    let again = h
        .client
        .delete(h.url(&format!("/conversion/{task_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 409);
}

#[tokio::test]
async fn cancel_unknown_task_is_not_found() {
    let h = TestHarness::without_ffmpeg().await;
    let resp = h
        .client
        .delete(h.url("/conversion/00000000-0000-0000-0000-000000000002"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
#[serial]
async fn slow_conversion_times_out() {
    let h = TestHarness::with_ffmpeg_config(FFMPEG_HANG, |c| {
        c.conversion.task_timeout_secs = 1;
    })
    .await;
    let upstream = upstream_with("/slow.mp3", b"ID3").await;

    let task_id = h.submit_ok(&format!("{}/slow.mp3", upstream.uri())).await;
    let status = h.wait_until_finished(&task_id).await;

    assert_eq!(status["status"], "failed");
    let detail = status["detail"].as_str().unwrap();
    assert!(detail.contains("Timed out"), "detail: {detail}");
}

#[tokio::test]
#[serial]
async fn full_queue_is_unavailable() {
    let h = TestHarness::with_ffmpeg_config(FFMPEG_HANG, |c| {
        c.conversion.max_concurrent = 1;
        c.conversion.queue_capacity = 1;
    })
    .await;
    let upstream = upstream_with("/slow.mp3", b"ID3").await;
    let source = format!("{}/slow.mp3", upstream.uri());

    let mut rejected = None;
    for _ in 0..10 {
        let (code, body) = h.submit(&source).await;
        if code == 503 {
            rejected = Some(body);
            break;
        }
        assert_eq!(code, 200, "{body}");
    }

    let body = rejected.expect("queue never filled up");
    assert_eq!(body["code"], "unavailable");
    assert!(h.ctx.registry.counts().failed >= 1);
}

fn uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().filter(|c| *c == '-').count() == 4
}
