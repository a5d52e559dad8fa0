//! `TuglineServer` builder and accept loop.
//!
//! Ties the layers together: transport → protocol → auth → engine. One
//! handler task per accepted connection; the engine manager and control
//! API are shared across all of them.

use std::sync::Arc;
use std::time::Duration;

use tugline_auth::Authenticator;
use tugline_engine::{EngineConfig, EngineManager};
use tugline_protocol::{Codec, JsonCodec, WS_RATE_LIMIT_PER_SECOND};
use tugline_store::{StateStore, Storage};
use tugline_transport::{Transport, WebSocketTransport};

use crate::handler::handle_connection;
use crate::{ControlApi, TuglineError};

/// Connection-level tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// How long a fresh connection has to send `HELLO`.
    pub hello_grace: Duration,
    /// Recv idle timeout; `PING` keeps a quiet connection alive.
    pub idle_timeout: Duration,
    /// Messages per rolling second per connection.
    pub rate_limit_per_second: u32,
    /// Per-session engine tunables.
    pub engine: EngineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hello_grace: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
            rate_limit_per_second: WS_RATE_LIMIT_PER_SECOND,
            engine: EngineConfig::default(),
        }
    }
}

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<S: Storage, K: StateStore, A: Authenticator, C: Codec>
{
    pub(crate) manager: Arc<EngineManager<S, K>>,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Tugline server.
///
/// # Example
///
/// ```rust,ignore
/// use tugline::prelude::*;
///
/// let server = TuglineServer::builder()
///     .bind("0.0.0.0:8080")
///     .build(storage, states, my_auth)
///     .await?;
/// let control = server.control();
/// server.run().await
/// ```
pub struct TuglineServerBuilder {
    bind_addr: String,
    config: ServerConfig,
}

impl TuglineServerBuilder {
    pub fn new() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            config: ServerConfig::default(),
        }
    }

    /// Sets the address to bind the WebSocket listener to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// Overrides the connection/engine tunables.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the server with the given collaborators. Uses `JsonCodec`
    /// and `WebSocketTransport`.
    pub async fn build<S, K, A>(
        self,
        storage: Arc<S>,
        states: Arc<K>,
        auth: A,
    ) -> Result<TuglineServer<S, K, A, JsonCodec>, TuglineError>
    where
        S: Storage,
        K: StateStore,
        A: Authenticator,
    {
        let transport = WebSocketTransport::bind(&self.bind_addr).await?;
        let manager = Arc::new(EngineManager::new(
            storage,
            states,
            self.config.engine.clone(),
        ));
        let state = Arc::new(ServerState {
            manager,
            auth,
            codec: JsonCodec,
            config: self.config,
        });
        Ok(TuglineServer { transport, state })
    }
}

impl Default for TuglineServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Tugline server.
pub struct TuglineServer<S: Storage, K: StateStore, A: Authenticator, C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<S, K, A, C>>,
}

impl<S, K, A, C> TuglineServer<S, K, A, C>
where
    S: Storage,
    K: StateStore,
    A: Authenticator,
    C: Codec + Clone,
{
    /// Creates a new builder.
    pub fn builder() -> TuglineServerBuilder {
        TuglineServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// The control API the REST layer calls into.
    pub fn control(&self) -> ControlApi<S, K> {
        ControlApi::new(Arc::clone(&self.state.manager))
    }

    /// Runs the accept loop: one handler task per connection, until the
    /// process is terminated.
    pub async fn run(mut self) -> Result<(), TuglineError> {
        tracing::info!("Tugline server running");

        loop {
            match self.transport.accept().await {
                Ok(conn) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(conn, state).await {
                            tracing::debug!(
                                error = %e,
                                "connection ended with error"
                            );
                        }
                    });
                }
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                }
            }
        }
    }
}
