//! Shutdown on SIGTERM.
//!
//! Kept in its own test binary: the signal goes to the whole process and
//! would stop every server running alongside it.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dss_backend::auth::ScopeDeclaration;
use dss_backend::rpc::{Call, CallResult};
use dss_backend::server::ServerState;
use dss_backend::services::{ServiceModule, full_method};
use reqwest::StatusCode;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

use common::{claims, config, mint, start};

/// Parks each call for `delay`, signalling `started` on entry.
struct Parked {
    delay: Duration,
    started: Arc<Notify>,
}

#[async_trait]
impl ServiceModule for Parked {
    fn service_name(&self) -> &'static str {
        "test.Parked"
    }

    fn auth_scopes(&self) -> ScopeDeclaration {
        ScopeDeclaration::new("parked").method(full_method("test.Parked", "Wait"), ["parked.call"])
    }

    async fn handle(&self, _method: &str, _call: &Call) -> CallResult {
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(json!({"done": true}))
    }
}

fn send_sigterm() {
    let status = std::process::Command::new("kill")
        .args(["-TERM", &std::process::id().to_string()])
        .status()
        .unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn sigterm_drains_in_flight_call_and_refuses_new_connections() {
    // Registering a listener first keeps SIGTERM from killing the test process
    // before the server has installed its own handler.
    let _keep_alive = signal(SignalKind::terminate()).unwrap();

    let started = Arc::new(Notify::new());
    let module = Parked {
        delay: Duration::from_secs(2),
        started: Arc::clone(&started),
    };
    let server = start(&config(&["k1.pem"]), vec![Arc::new(module)]).await;
    let addr = server.base.trim_start_matches("http://").to_string();

    // GIVEN: a call parked inside the handler
    let url = server.url("/test.Parked/Wait");
    let token = mint("k1", Some("k1"), &claims("uss1", "parked.call"));
    let in_flight = tokio::spawn(async move {
        reqwest::Client::new()
            .post(url)
            .bearer_auth(token)
            .json(&json!({}))
            .send()
            .await
    });
    tokio::time::timeout(Duration::from_secs(5), started.notified())
        .await
        .unwrap();

    // WHEN: the process receives SIGTERM (repeated until the server's own
    // handler has picked it up)
    let mut state = server.state.clone();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            send_sigterm();
            let draining = tokio::time::timeout(
                Duration::from_millis(100),
                state.wait_for(|s| *s != ServerState::Serving),
            )
            .await;
            if draining.is_ok() {
                break;
            }
        }
    })
    .await
    .expect("server never started draining");

    // THEN: new connections are refused while the call is still running
    tokio::time::timeout(Duration::from_secs(1), async {
        while TcpStream::connect(&addr).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("listener still accepting while draining");
    assert!(!in_flight.is_finished(), "in-flight call ended before refusal was observed");

    // AND: the call completes with its real result
    let response = in_flight.await.unwrap().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<serde_json::Value>().await.unwrap(), json!({"done": true}));

    // AND: serve returns cleanly
    tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(*state.borrow(), ServerState::Stopped);
}
