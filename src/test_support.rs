//! Shared helpers for unit tests.

use async_trait::async_trait;
use axum::{http::StatusCode, response::Redirect, routing::get, Router};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::alerts::{Alert, AlertEvaluator, AlertKind, AlertThresholds, Severity};
use crate::monitor::Collector;
use crate::notify::Dispatcher;
use crate::probe::Prober;
use crate::store::{MetricsStore, PhaseTimings, Sample, StoreSettings, Target};

/// Start a loopback HTTP server with a few fixed routes.
///
/// `/` answers `hello`, `/fail` a 500, `/moved` a 307 and `/slow` answers
/// after two seconds.
pub async fn spawn_test_server() -> SocketAddr {
    let app = Router::new()
        .route("/", get(|| async { "hello" }))
        .route(
            "/fail",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        )
        .route("/moved", get(|| async { Redirect::temporary("/") }))
        .route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub fn ok_sample(ms: u64) -> Sample {
    Sample::from_status(Utc::now(), Duration::from_millis(ms), 200, 16, PhaseTimings::default())
}

pub fn status_sample(status: u16) -> Sample {
    Sample::from_status(Utc::now(), Duration::from_millis(5), status, 0, PhaseTimings::default())
}

/// Prober that replays a fixed script of samples.
///
/// The last scripted sample repeats once the script runs out. Each call
/// sleeps for the matching delay (on the tokio clock) and stamps the sample
/// with the wall-clock time the call started.
pub struct ScriptedProber {
    script: Mutex<VecDeque<Sample>>,
    delays: Mutex<VecDeque<Duration>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedProber {
    pub fn new(script: Vec<Sample>) -> Self {
        Self::with_delays(script, Vec::new())
    }

    pub fn with_delays(script: Vec<Sample>, delays: Vec<Duration>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            delays: Mutex::new(delays.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn next_sample(&self) -> Sample {
        let mut script = self.script.lock();
        if script.len() > 1 {
            script.pop_front().unwrap()
        } else {
            script.front().cloned().unwrap_or_else(|| ok_sample(1))
        }
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, url: &str, _timeout: Duration) -> Sample {
        let started = Utc::now();
        self.calls.lock().push(url.to_string());
        let delay = self.delays.lock().pop_front();
        let mut sample = self.next_sample();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        sample.timestamp = started;
        sample
    }
}

/// Prober whose probe task panics.
pub struct PanickingProber;

#[async_trait]
impl Prober for PanickingProber {
    async fn probe(&self, _url: &str, _timeout: Duration) -> Sample {
        panic!("probe exploded")
    }
}

pub fn test_alert(id: u64, kind: AlertKind, severity: Severity) -> Alert {
    Alert {
        id,
        target: "Website".to_string(),
        kind,
        severity,
        message: format!("{} {}", kind, severity),
        value: 1.0,
        threshold: 1.0,
        timestamp: Utc::now(),
    }
}

/// Collector with default thresholds and no notification channels.
pub fn test_collector(targets: &[Target]) -> Arc<Collector> {
    let settings = StoreSettings::default();
    let evaluator = AlertEvaluator::new(
        AlertThresholds::default(),
        Duration::from_secs(300),
        settings.availability_window,
    );
    Arc::new(Collector::new(
        MetricsStore::new(targets, settings),
        evaluator,
        Dispatcher::new(Vec::new(), Duration::from_secs(1)),
    ))
}
