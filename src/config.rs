// ── Dispatch configuration ────────────────────────────────────────────────────
//
// Every queue constructor takes a `DispatchConfig` explicitly; there is no
// process-wide options store.  The struct can be built in code or read from a
// JSON document.  Missing fields fall back to their defaults so that older
// documents keep parsing.

use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::{error::Result, handle::HandlePolicy};

// ── Thread-affinity checks ────────────────────────────────────────────────────

/// When producer-thread checks on a batching queue are enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AffinityCheck {
    /// Checked in every build.
    Always,
    /// Checked only when `debug_assertions` are on.
    #[default]
    DebugOnly,
    /// Never checked.
    Never,
}

impl AffinityCheck {
    /// Whether the check is active in the current build.
    pub fn enabled(self) -> bool {
        match self {
            Self::Always => true,
            Self::DebugOnly => cfg!(debug_assertions),
            Self::Never => false,
        }
    }
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Construction-time settings shared by the queue factories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Thread name of the JS queue.
    pub js_thread_name: String,
    /// Thread name of generic serial queues.
    pub serial_thread_name: String,
    /// Queue name used in logs for the UI queue (the thread belongs to the host).
    pub ui_queue_name: String,
    /// Producer-thread enforcement on batching queues.
    pub batching_affinity: AffinityCheck,
    /// Default policy for thread-owned handles.
    pub handle_policy: HandlePolicy,
    /// Stack size for spawned consumer threads; `None` keeps the std default.
    pub thread_stack_size: Option<usize>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            js_thread_name: "bridgeq-js".to_owned(),
            serial_thread_name: "bridgeq-serial".to_owned(),
            ui_queue_name: "bridgeq-ui".to_owned(),
            batching_affinity: AffinityCheck::default(),
            handle_policy: HandlePolicy::default(),
            thread_stack_size: None,
        }
    }
}

impl DispatchConfig {
    /// Parse a JSON document.  Absent fields take their default values.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a JSON configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        let config = serde_json::from_slice(&data)?;
        tracing::debug!(path = %path.display(), "loaded dispatch config");
        Ok(config)
    }

    pub fn with_js_thread_name(mut self, name: impl Into<String>) -> Self {
        self.js_thread_name = name.into();
        self
    }

    pub fn with_batching_affinity(mut self, check: AffinityCheck) -> Self {
        self.batching_affinity = check;
        self
    }

    pub fn with_handle_policy(mut self, policy: HandlePolicy) -> Self {
        self.handle_policy = policy;
        self
    }

    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// A `std::thread::Builder` carrying `name` and the configured stack size.
    pub(crate) fn thread_builder(&self, name: &str) -> std::thread::Builder {
        let builder = std::thread::Builder::new().name(name.to_owned());
        match self.thread_stack_size {
            Some(bytes) => builder.stack_size(bytes),
            None => builder,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
