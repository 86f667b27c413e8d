//! Helpers shared by the integration tests.

use std::sync::{Arc, Mutex};

use tracing::trace;

/// Routes `tracing` output through the test harness. Safe to call from every
/// test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Shared, ordered record of which handlers ran.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, name: impl Into<String>) {
        let name = name.into();
        trace!(%name, "handler ran");
        self.0.lock().unwrap_or_else(|p| p.into_inner()).push(name);
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap_or_else(|p| p.into_inner()).clear();
    }
}
