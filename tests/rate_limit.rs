//! HTTP rate limiting through the route middleware.

use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;

mod common;

#[tokio::test]
async fn test_second_call_in_window_is_limited() {
    let server = common::start_server(common::demo_config()).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/limit")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "limit content");

    let res = client.get(server.url("/limit")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = res.headers()[RETRY_AFTER].to_str().unwrap().parse().unwrap();
    assert!(retry_after >= 1 && retry_after <= 60);
}

#[tokio::test]
async fn test_concurrent_callers_share_one_slot() {
    let server = common::start_server(common::demo_config()).await;
    let client = reqwest::Client::new();

    let requests = (0..8).map(|_| {
        let client = client.clone();
        let url = server.url("/limit");
        tokio::spawn(async move { client.get(url).send().await.unwrap().status() })
    });

    let mut admitted = 0;
    for handle in requests.collect::<Vec<_>>() {
        if handle.await.unwrap() == StatusCode::OK {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
}

#[tokio::test]
async fn test_keys_from_query_arguments() {
    let mut config = common::demo_config();
    config.limiter.rules[0].key = Some("'user:' + #query['user']".into());
    let server = common::start_server(config).await;
    let client = reqwest::Client::new();

    let status = |user: &'static str| {
        let client = client.clone();
        let url = server.url(&format!("/limit?user={}", user));
        async move { client.get(url).send().await.unwrap().status() }
    };

    assert_eq!(status("a").await, StatusCode::OK);
    assert_eq!(status("b").await, StatusCode::OK);
    assert_eq!(status("a").await, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_unlimited_routes_pass() {
    let server = common::start_server(common::demo_config()).await;
    let client = reqwest::Client::new();

    for _ in 0..3 {
        let res = client.get(server.url("/hello")).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}

#[tokio::test]
async fn test_missing_query_parameter_is_a_null_key() {
    let mut config = common::demo_config();
    config.limiter.rules[0].key = Some("'user:' + #query['user']".into());
    let server = common::start_server(config).await;
    let client = reqwest::Client::new();

    let res = client.get(server.url("/limit")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    // Every caller without `?user=` shares the `user:null` bucket.
    let res = client.get(server.url("/limit")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

    let res = client.get(server.url("/limit?user=a")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}
