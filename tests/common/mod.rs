//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use greenlight::config::AppConfig;
use greenlight::lifecycle::{LifecycleState, Signal};
use greenlight::notifications::{Notification, Notifier, NotifyError};
use greenlight::{Application, BackgroundTasks, RateLimiter, ServerError};

/// Config bound to an ephemeral localhost port.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

/// A running application driven by in-process signals.
pub struct TestApp {
    pub addr: SocketAddr,
    pub signals: mpsc::UnboundedSender<Signal>,
    pub lifecycle: watch::Receiver<LifecycleState>,
    pub tasks: BackgroundTasks,
    pub limiter: RateLimiter,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Send a termination signal and wait for the application to exit.
    pub async fn shutdown(self) -> Result<(), ServerError> {
        self.signals.send(Signal::Terminate).unwrap();
        self.handle.await.unwrap()
    }
}

pub async fn spawn_app(config: AppConfig, notifier: Arc<dyn Notifier>) -> TestApp {
    let app = Application::build_with_notifier(config, notifier)
        .await
        .expect("application failed to start");
    let addr = app.local_addr().unwrap();
    let mut lifecycle = app.lifecycle();
    let tasks = app.tasks();
    let limiter = app.limiter();
    let (signals, signal_rx) = mpsc::unbounded_channel();

    let handle = tokio::spawn(app.run_until(signal_rx));
    lifecycle
        .wait_for(|state| *state == LifecycleState::Serving)
        .await
        .unwrap();

    TestApp {
        addr,
        signals,
        lifecycle,
        tasks,
        limiter,
        handle,
    }
}

pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

/// Notifier that records deliveries after a fixed delay.
#[derive(Default)]
pub struct RecordingNotifier {
    pub delay: Duration,
    pub delivered: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            delivered: Mutex::new(Vec::new()),
        })
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            self.delivered.lock().unwrap().push(notification);
            Ok(())
        })
    }
}
