use crate::callbacks::Callbacks;
use crate::client::Client;
use crate::config::ServerConfig;
use crate::connection::{self, dispatch_guarded};
use crate::error::{error_info, Error, ErrorInfo};
use futures::FutureExt;
use log::{debug, error, info};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;

/// The conventional port for a server that wasn't told otherwise.
pub const DEFAULT_PORT: u16 = 8080;

/// A WebSocket server endpoint: bind address, configuration and the
/// application handler table, plus the accept loop that serves them.
///
/// Handlers and configuration are set up front; `listen` then accepts
/// connections forever, each one served by its own task.
pub struct Server {
    addr: String,
    port: u16,
    config: ServerConfig,
    callbacks: Callbacks,
}

impl Server {
    pub fn new(addr: impl Into<String>, port: u16) -> Self {
        Self {
            addr: addr.into(),
            port,
            config: ServerConfig::default(),
            callbacks: Callbacks::default(),
        }
    }

    pub fn set_config(&mut self, config: ServerConfig) {
        self.config = config;
    }

    /// Called with the upgrade request's header map; return `false` to turn
    /// the connection away with a 400.
    pub fn on_handshake<F>(&mut self, handler: F)
    where
        F: Fn(&HashMap<String, String>) -> bool + Send + Sync + 'static,
    {
        self.callbacks.handshake = Some(Arc::new(handler));
    }

    /// Called for every complete text message.
    pub fn on_text<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Arc<Client>, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.text = Some(Arc::new(move |client: Arc<Client>, data: String| {
            handler(client, data).boxed()
        }));
    }

    /// Called for every complete binary message.
    pub fn on_binary<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Arc<Client>, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.binary = Some(Arc::new(move |client: Arc<Client>, data: Vec<u8>| {
            handler(client, data).boxed()
        }));
    }

    /// Called when the peer sends a close frame, before the engine answers
    /// it.
    pub fn on_close<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.close = Some(Arc::new(move |client: Arc<Client>| handler(client).boxed()));
    }

    /// Called when the peer sends a ping. The engine answers the ping
    /// itself either way.
    pub fn on_ping<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.ping = Some(Arc::new(move |client: Arc<Client>| handler(client).boxed()));
    }

    /// Called when the peer sends a pong.
    pub fn on_pong<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.pong = Some(Arc::new(move |client: Arc<Client>| handler(client).boxed()));
    }

    /// Called exactly once per established connection, on every exit path.
    pub fn on_disconnect<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Arc<Client>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.disconnect =
            Some(Arc::new(move |client: Arc<Client>| handler(client).boxed()));
    }

    /// Called with protocol and I/O failures. The client is `None` for
    /// accept-loop failures, which belong to no connection.
    pub fn on_error<F, Fut>(&mut self, handler: F)
    where
        F: Fn(Option<Arc<Client>>, ErrorInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.callbacks.error = Some(Arc::new(
            move |client: Option<Arc<Client>>, info: ErrorInfo| handler(client, info).boxed(),
        ));
    }

    /// Binds the listening socket and serves connections until the process
    /// exits. Each accepted connection runs on its own task; configuration
    /// and handlers are shared read-only with all of them.
    pub async fn listen(self) -> Result<(), Error> {
        self.config.validate()?;

        let listener = TcpListener::bind(format!("{}:{}", self.addr, self.port)).await?;
        info!("listening on {}:{}", self.addr, self.port);

        let callbacks = Arc::new(self.callbacks);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {}", peer);
                    let config = self.config.clone();
                    let callbacks = callbacks.clone();
                    tokio::spawn(async move {
                        connection::run(stream, peer, config, callbacks).await;
                    });
                }
                Err(source) => {
                    // A failed accept has no client to blame; report it and
                    // keep accepting.
                    let info = error_info!(Error::from(source));
                    error!("accept failed: {}", info);
                    if let Some(handler) = &callbacks.error {
                        dispatch_guarded(handler(None, info), "error").await;
                    }
                }
            }
        }
    }
}
