//! End-to-end session tests against a mock HTTP server: the login redirect
//! heuristic, per-cache-type write triggers, restore-then-override
//! construction, and cookie persistence across session instances.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use persession::{CacheType, LoginStatus, Session, SessionConfig};

mod support;
use support::socket_guard::start_mock_server_or_skip;

fn cache_path(tempdir: &TempDir) -> PathBuf {
    tempdir.path().join("cache.json")
}

fn config(cache_file: &Path, cache_type: CacheType) -> SessionConfig {
    SessionConfig {
        cache_file_path: Some(cache_file.to_path_buf()),
        cache_type,
        ..SessionConfig::default()
    }
}

/// Mounts a login endpoint: POST answers 200 (optionally setting a cookie),
/// and a redirect-probe GET answers `probe_status`.
async fn mount_login(server: &MockServer, probe_status: u16, set_cookie: Option<&str>) {
    let mut post_response = ResponseTemplate::new(200);
    if let Some(cookie) = set_cookie {
        post_response = post_response.insert_header("set-cookie", cookie);
    }
    Mock::given(method("POST"))
        .and(path("/login"))
        .respond_with(post_response)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(probe_status))
        .mount(server)
        .await;
}

// ---- Login heuristic ----

#[tokio::test]
async fn test_login_success_when_probe_redirects_with_302() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    mount_login(&server, 302, None).await;

    let session = Session::new(config(&cache_file, CacheType::AfterEachLogin)).unwrap();
    let login_url = format!("{}/login", server.uri());
    let res = session
        .login(&login_url, &[("user", "u"), ("password", "p")])
        .await
        .unwrap();

    assert_eq!(res.login_status(), LoginStatus::Success);
    assert!(res.is_success());
    assert!(
        cache_file.exists(),
        "successful login must trigger the cache write"
    );
}

#[tokio::test]
async fn test_login_failure_when_probe_answers_200() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    mount_login(&server, 200, None).await;

    let session = Session::new(config(&cache_file, CacheType::AfterEachLogin)).unwrap();
    let login_url = format!("{}/login", server.uri());
    let res = session.login(&login_url, &[("user", "u")]).await.unwrap();

    assert_eq!(res.login_status(), LoginStatus::Failure);
    assert_eq!(res.login_status().to_string(), "Login Failed");
    assert!(!cache_file.exists(), "failed login must not write the cache");
}

#[tokio::test]
async fn test_login_with_customizes_the_login_post() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);

    // The POST only matches when the customized header is present.
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("x-csrf-token", "tok42"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(302))
        .mount(&server)
        .await;

    let session = Session::new(config(&cache_file, CacheType::Manual)).unwrap();
    let login_url = format!("{}/login", server.uri());
    let res = session
        .login_with(&login_url, &[("user", "u")], |builder| {
            builder.header("x-csrf-token", "tok42")
        })
        .await
        .unwrap();

    assert!(res.is_success());
    server.verify().await;
}

#[tokio::test]
async fn test_is_logged_in_only_accepts_exactly_302() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let session = Session::new(config(&cache_path(&tempdir), CacheType::Manual)).unwrap();

    // Any non-302 status, redirect or not, means "not logged in".
    for (status, expected) in [(200, false), (301, false), (302, true), (303, false), (307, false)]
    {
        Mock::given(method("GET"))
            .and(path(format!("/check/{status}")))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;

        let url = format!("{}/check/{status}", server.uri());
        assert_eq!(
            session.is_logged_in(&url).await.unwrap(),
            expected,
            "status {status}"
        );
    }
}

#[tokio::test]
async fn test_is_logged_in_empty_url_issues_no_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(302))
        .expect(0)
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let session = Session::new(config(&cache_path(&tempdir), CacheType::Manual)).unwrap();
    assert!(!session.is_logged_in("").await.unwrap());

    server.verify().await;
}

#[tokio::test]
async fn test_probe_does_not_follow_the_redirect() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/login"))
        .respond_with(ResponseTemplate::new(302).insert_header("location", "/home"))
        .mount(&server)
        .await;
    // The redirect target must never be fetched.
    Mock::given(method("GET"))
        .and(path("/home"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let tempdir = TempDir::new().unwrap();
    let session = Session::new(config(&cache_path(&tempdir), CacheType::Manual)).unwrap();
    let url = format!("{}/login", server.uri());
    assert!(session.is_logged_in(&url).await.unwrap());

    server.verify().await;
}

// ---- Per-request cache triggers ----

#[tokio::test]
async fn test_after_each_post_saves_only_after_post() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/submit"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = Session::new(config(&cache_file, CacheType::AfterEachPost)).unwrap();

    session.get(&format!("{}/page", server.uri())).await.unwrap();
    assert!(!cache_file.exists(), "GET must not trigger AfterEachPost");

    session
        .post_form(&format!("{}/submit", server.uri()), &[("k", "v")])
        .await
        .unwrap();
    assert!(cache_file.exists(), "POST must trigger AfterEachPost");
}

#[tokio::test]
async fn test_after_each_request_saves_on_get_and_probe() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = Session::new(config(&cache_file, CacheType::AfterEachRequest)).unwrap();
    session.get(&format!("{}/page", server.uri())).await.unwrap();
    assert!(cache_file.exists(), "any request triggers AfterEachRequest");

    // The login probe is a session request too.
    std::fs::remove_file(&cache_file).unwrap();
    session
        .is_logged_in(&format!("{}/page", server.uri()))
        .await
        .unwrap();
    assert!(cache_file.exists(), "the probe counts as a sent request");
}

#[tokio::test]
async fn test_manual_never_saves_automatically() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    mount_login(&server, 302, None).await;

    let session = Session::new(config(&cache_file, CacheType::Manual)).unwrap();
    let login_url = format!("{}/login", server.uri());
    let res = session.login(&login_url, &[("user", "u")]).await.unwrap();
    assert!(res.is_success());
    assert!(!cache_file.exists(), "Manual must never save on its own");

    session.cache_session().unwrap();
    assert!(cache_file.exists());
}

#[tokio::test]
async fn test_at_exit_saves_on_close_not_per_request() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let session = Session::new(config(&cache_file, CacheType::AtExit)).unwrap();
    session.get(&format!("{}/page", server.uri())).await.unwrap();
    assert!(!cache_file.exists(), "AtExit must not save per request");

    session.close().unwrap();
    assert!(cache_file.exists(), "scope exit must save");
}

// ---- Restore and overrides ----

#[tokio::test]
async fn test_explicit_user_agent_wins_over_restored_cache() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);

    // First session persists user agent "Y".
    let first = Session::new(SessionConfig {
        user_agent: Some("Y".to_string()),
        ..config(&cache_file, CacheType::Manual)
    })
    .unwrap();
    first.cache_session().unwrap();
    drop(first);

    // Second session overrides with "X"; the server must see "X".
    Mock::given(method("GET"))
        .and(path("/page"))
        .and(header("user-agent", "X"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let second = Session::new(SessionConfig {
        user_agent: Some("X".to_string()),
        ..config(&cache_file, CacheType::Manual)
    })
    .unwrap();
    assert_eq!(second.user_agent(), Some("X"));
    second.get(&format!("{}/page", server.uri())).await.unwrap();

    server.verify().await;
}

#[tokio::test]
async fn test_corrupt_cache_file_behaves_like_no_cache() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    std::fs::write(&cache_file, b"\x00\x01\x02 garbage, not a snapshot").unwrap();

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    // Construction must not fail, and the session must work normally.
    let session = Session::new(config(&cache_file, CacheType::Manual)).unwrap();
    let response = session.get(&format!("{}/page", server.uri())).await.unwrap();
    assert_eq!(response.status(), 200);
}

// ---- Cookie persistence across instances ----

#[tokio::test]
async fn test_login_cookie_survives_into_a_new_session() {
    let Some(server) = start_mock_server_or_skip().await else {
        return;
    };
    let tempdir = TempDir::new().unwrap();
    let cache_file = cache_path(&tempdir);
    mount_login(&server, 302, Some("sid=abc123; Path=/")).await;

    let first = Session::new(config(&cache_file, CacheType::AfterEachLogin)).unwrap();
    let login_url = format!("{}/login", server.uri());
    let res = first.login(&login_url, &[("user", "u")]).await.unwrap();
    assert!(res.is_success());
    drop(first);

    // A fresh process restores the cookie from the cache file and sends it
    // with matching requests.
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("cookie", "sid=abc123"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let second = Session::new(config(&cache_file, CacheType::Manual)).unwrap();
    let snapshot = second.snapshot();
    assert_eq!(snapshot.cookies.len(), 1);
    assert_eq!(snapshot.cookies[0].name, "sid");

    let response = second
        .get(&format!("{}/private", server.uri()))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    server.verify().await;
}
