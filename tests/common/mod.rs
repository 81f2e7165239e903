//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use request_guard::config::{GuardConfig, LimiterRuleConfig, UserConfig};
use request_guard::http::GuardServer;
use request_guard::lifecycle::Shutdown;
use tokio::net::TcpListener;

pub fn user(id: &str, username: &str, authorities: &[&str]) -> UserConfig {
    UserConfig {
        id: id.into(),
        username: username.into(),
        password: "secret".into(),
        authorities: authorities.iter().map(|a| a.to_string()).collect(),
        account_non_expired: true,
        account_non_locked: true,
        credentials_non_expired: true,
        enabled: true,
    }
}

/// Two users and the `/limit` rule keyed by a constant.
pub fn demo_config() -> GuardConfig {
    let mut config = GuardConfig::default();
    config.security.jwt_secret = "integration-secret".into();
    config.security.users = vec![
        user("u1", "alice", &["ROLE_user"]),
        user("u2", "root", &["ROLE_user", "ROLE_admin"]),
    ];
    config.limiter.rules.push(LimiterRuleConfig {
        target: "http".into(),
        operation: "GET /limit".into(),
        key: Some("'content'".into()),
        timeout_ms: 60_000,
    });
    config
}

/// A running server on an ephemeral port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

pub async fn start_server(config: GuardConfig) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server = GuardServer::new(config).unwrap();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    // Wait for server to start
    tokio::time::sleep(Duration::from_millis(100)).await;
    TestServer { addr, shutdown }
}

/// Form login; returns the response.
#[allow(dead_code)]
pub async fn login(client: &reqwest::Client, server: &TestServer, username: &str, password: &str) -> reqwest::Response {
    client
        .post(server.url("/login"))
        .form(&[("username", username), ("password", password)])
        .send()
        .await
        .unwrap()
}
