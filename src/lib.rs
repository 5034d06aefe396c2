/// Public library interface for the MCP relay
///
/// This module exports the relay server and the building blocks it is made
/// of, so that applications can register their own capabilities and tests
/// can drive each layer on its own.

use std::sync::Arc;

use axum::Router;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub mod config;
pub mod dispatch;
pub mod domain;
pub mod mcp;
pub mod queue;
pub mod registry;
pub mod session;
pub mod stream;
pub mod tools;

// Re-export public modules and types
pub use config::{Backend, RelayConfig};
pub use dispatch::{DispatchError, Dispatcher};
pub use domain::*;
pub use queue::{QueueError, ResponseQueue, RetryPolicy, RetryingQueue};
pub use registry::{HandlerError, HandlerRegistry, ParamSchema, ParamType, Params, RegistryError};
pub use session::{SessionError, SessionManager, SessionState};
pub use stream::{Frame, StreamProducer, StreamSettings};

/// Errors that can occur during server operation
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Relay server: owns the queue, the session manager and the dispatcher
///
/// Several relay processes pointed at the same Redis or SQLite backend serve
/// the same clients; any of them can accept a post for a session streamed by
/// another.
pub struct RelayServer {
    config: RelayConfig,
    registry: Arc<HandlerRegistry>,
    sessions: Arc<SessionManager>,
    queue: Arc<dyn ResponseQueue>,
    dispatcher: Dispatcher,
    shutdown: CancellationToken,
}

impl RelayServer {
    /// Create a relay server with the configured queue backend
    ///
    /// The registry is frozen from here on.
    pub async fn new(config: RelayConfig, registry: HandlerRegistry) -> Result<Self, ServerError> {
        config.validate().map_err(ServerError::Config)?;
        tracing::info!("Initializing relay with {:?} queue backend", config.backend);

        let queue = config.build_queue().await?;
        Ok(Self::with_queue(config, registry, queue))
    }

    /// Create a relay server on an existing queue backend
    ///
    /// The queue is wrapped with the configured retry policy.
    pub fn with_queue(config: RelayConfig, registry: HandlerRegistry, queue: Arc<dyn ResponseQueue>) -> Self {
        let queue: Arc<dyn ResponseQueue> = Arc::new(RetryingQueue::new(queue, config.retry_policy()));
        let registry = Arc::new(registry);
        let sessions = Arc::new(SessionManager::new(queue.clone(), config.session_ttl()));
        let dispatcher = Dispatcher::new(registry.clone(), sessions.clone(), queue.clone());

        Self {
            config,
            registry,
            sessions,
            queue,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// Build the HTTP router for this server
    pub fn router(&self) -> Router {
        mcp::router(mcp::AppState {
            sessions: self.sessions.clone(),
            queue: self.queue.clone(),
            dispatcher: self.dispatcher.clone(),
            registry: self.registry.clone(),
            settings: self.config.stream_settings(),
            stream_path: self.config.stream_path.clone(),
            message_path: self.config.message_path.clone(),
            server_name: self.config.server_name.clone(),
            shutdown: self.shutdown.clone(),
        })
    }

    /// Serve HTTP until Ctrl-C or SIGTERM
    ///
    /// Open streams are ended on shutdown so that graceful shutdown can finish.
    pub async fn run(self) -> Result<(), ServerError> {
        let listener = tokio::net::TcpListener::bind(self.config.bind).await?;
        tracing::info!(
            "Relay listening on {} (stream {}, messages {})",
            listener.local_addr()?,
            self.config.stream_path,
            self.config.message_path
        );

        let shutdown = self.shutdown.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                shutdown.cancel();
            })
            .await?;

        tracing::info!("Relay stopped");
        Ok(())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Get a reference to the session manager (useful for testing)
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// Get a reference to the dispatcher (useful for testing)
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Token that ends every open stream when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received, closing streams");
}
