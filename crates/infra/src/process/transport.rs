//! Outbound trigger of the async endpoint.

use std::sync::Mutex;
use std::time::Duration;

use thiserror::Error;
use tracing::debug;

use shipq_core::{HttpMethod, ProcessId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRequest {
    pub method: HttpMethod,
    pub url: String,
    pub guid: ProcessId,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to build http client: {0}")]
    Client(String),

    #[error("trigger request failed: {0}")]
    Request(String),

    #[error("trigger answered with status {0}")]
    Status(u16),
}

/// Sends the trigger; the receiver's work is never awaited.
pub trait AsyncTransport: Send + Sync {
    fn trigger(&self, request: &TriggerRequest) -> Result<(), TransportError>;
}

/// Blocking HTTP transport.
///
/// The client is built on first use, because a blocking client may not be
/// created on an async runtime thread. Must be called from a thread that may
/// block.
pub struct HttpTransport {
    timeout: Duration,
    client: Mutex<Option<reqwest::blocking::Client>>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<reqwest::blocking::Client, TransportError> {
        let mut slot = self
            .client
            .lock()
            .map_err(|_| TransportError::Client("client lock poisoned".to_string()))?;
        if let Some(client) = slot.as_ref() {
            return Ok(client.clone());
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TransportError::Client(e.to_string()))?;
        *slot = Some(client.clone());
        Ok(client)
    }
}

impl AsyncTransport for HttpTransport {
    fn trigger(&self, request: &TriggerRequest) -> Result<(), TransportError> {
        let client = self.client()?;
        let builder = match request.method {
            HttpMethod::Get => client.get(&request.url),
            HttpMethod::Post => client.post(&request.url),
        };

        match builder.send() {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) => Err(TransportError::Status(response.status().as_u16())),
            // The receiver keeps working after we stop listening.
            Err(err) if err.is_timeout() => {
                debug!(url = %request.url, "async trigger timed out, treated as delivered");
                Ok(())
            }
            Err(err) => Err(TransportError::Request(err.to_string())),
        }
    }
}

impl core::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HttpTransport").field("timeout", &self.timeout).finish()
    }
}

/// Records triggers instead of sending them; the test harness (or a dev
/// host) replays them by calling `run_process` itself.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<TriggerRequest>>,
    failing: Mutex<bool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following trigger fail (requests are still recorded).
    pub fn set_failing(&self, failing: bool) {
        if let Ok(mut flag) = self.failing.lock() {
            *flag = failing;
        }
    }

    /// Take every recorded request, oldest first.
    pub fn drain(&self) -> Vec<TriggerRequest> {
        self.sent
            .lock()
            .map(|mut sent| std::mem::take(&mut *sent))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.sent.lock().map(|sent| sent.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsyncTransport for RecordingTransport {
    fn trigger(&self, request: &TriggerRequest) -> Result<(), TransportError> {
        self.sent
            .lock()
            .map_err(|_| TransportError::Request("recorder lock poisoned".to_string()))?
            .push(request.clone());
        if self.failing.lock().map(|flag| *flag).unwrap_or_default() {
            return Err(TransportError::Request("connection refused".to_string()));
        }
        Ok(())
    }
}
