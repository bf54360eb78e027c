//! Client pool keyed by configuration.
//!
//! Every queued client carries the [`ClientConfiguration`] it was built
//! from, so a round asking for a particular configuration never receives a
//! client built for another one. The queue sits behind a single mutex: a
//! client is handed to at most one caller at a time.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::HttpClient;
use crate::error::ExecutionError;

/// Connection settings for one pooled HTTP client.
///
/// # Example TOML
///
/// ```toml
/// [client]
/// request_timeout_ms = 30000
/// connect_timeout_ms = 5000
/// pool_idle_timeout_ms = 90000
/// pool_max_idle_per_host = 32
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientConfiguration {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_pool_idle_timeout_ms")]
    pub pool_idle_timeout_ms: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_pool_idle_timeout_ms() -> u64 {
    90_000
}

fn default_pool_max_idle_per_host() -> usize {
    32
}

impl Default for ClientConfiguration {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            pool_idle_timeout_ms: default_pool_idle_timeout_ms(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
        }
    }
}

impl ClientConfiguration {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_idle_timeout_ms)
    }
}

/// Builds the clients a [`ClientManager`] hands out.
pub type ClientFactory =
    Arc<dyn Fn(&ClientConfiguration) -> Result<HttpClient, ExecutionError> + Send + Sync>;

/// Queue of reusable HTTP clients.
pub struct ClientManager {
    queue: Mutex<VecDeque<HttpClient>>,
    factory: ClientFactory,
}

impl Default for ClientManager {
    fn default() -> Self {
        Self::with_factory(Arc::new(HttpClient::build))
    }
}

impl fmt::Debug for ClientManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientManager")
            .field("queued", &self.len())
            .finish_non_exhaustive()
    }
}

impl ClientManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(factory: ClientFactory) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            factory,
        }
    }

    /// Builds a fresh client without touching the queue.
    pub fn create_instance(&self, config: &ClientConfiguration) -> Result<HttpClient, ExecutionError> {
        (self.factory)(config)
    }

    /// Builds a client and appends it to the queue.
    pub fn create_and_queue_client(&self, config: &ClientConfiguration) -> Result<(), ExecutionError> {
        let client = self.create_instance(config)?;
        debug!(client_id = %client.id(), "queued new HTTP client");
        self.queue.lock().push_back(client);
        Ok(())
    }

    /// Takes the oldest queued client, whatever its configuration.
    pub fn dequeue_client(&self) -> Option<HttpClient> {
        self.queue.lock().pop_front()
    }

    /// Takes the oldest queued client built from `config`.
    ///
    /// When none is queued and `bypass_queue_if_empty` is set, a new client
    /// is created on the spot instead.
    pub fn dequeue_client_for(
        &self,
        config: &ClientConfiguration,
        bypass_queue_if_empty: bool,
    ) -> Result<Option<HttpClient>, ExecutionError> {
        let found = {
            let mut queue = self.queue.lock();
            queue
                .iter()
                .position(|c| c.config() == config)
                .and_then(|idx| queue.remove(idx))
        };
        match found {
            Some(client) => Ok(Some(client)),
            None if bypass_queue_if_empty => self.create_instance(config).map(Some),
            None => Ok(None),
        }
    }

    /// Returns a client to the back of the queue for reuse.
    pub fn release(&self, client: HttpClient) {
        self.queue.lock().push_back(client);
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}
