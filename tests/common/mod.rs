//! Log capture for integration tests.

#![allow(dead_code)]

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;
use plinth::logging::{self, LogConfig};
use serde_json::Value;
use tracing::subscriber::DefaultGuard;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;

#[derive(Clone, Default)]
pub struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    /// Installs a JSON-lines subscriber for the current thread. Keep the guard
    /// alive for the duration of the test.
    pub fn install() -> (Self, DefaultGuard) {
        let capture = Self::default();
        let config = LogConfig::new("plinth-tests", "production");
        let subscriber = tracing_subscriber::registry().with(logging::layer(&config, capture.clone()));
        let guard = tracing::subscriber::set_default(subscriber);
        (capture, guard)
    }

    pub fn records(&self) -> Vec<Value> {
        String::from_utf8_lossy(&self.0.lock())
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    /// The consolidated per-request records only.
    pub fn requests(&self) -> Vec<Value> {
        self.records().into_iter().filter(|r| r["msg"] == "HTTP Request").collect()
    }

    pub fn with_message(&self, msg: &str) -> Vec<Value> {
        self.records().into_iter().filter(|r| r["msg"] == msg).collect()
    }
}

impl io::Write for Capture {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
