//! Broker runtime orchestration: configuration to a serving listener.

use crate::core::config::Config;
use crate::core::time::Clock;
use crate::net::listener::StompListener;
use crate::net::security::StaticAuthProvider;
use crate::session::engine::StompServer;
use crate::session::handler::{DefaultHandler, StompHandler};
use anyhow::Result;
use std::sync::Arc;

/// A configured broker ready to serve.
pub struct Runtime<C: Clock> {
    config: Config,
    server: Arc<StompServer<C>>,
    handler: Arc<dyn StompHandler<C>>,
}

impl<C: Clock> Runtime<C> {
    pub fn new(config: Config, clock: C) -> Result<Self> {
        config.validate()?;
        let mut server = StompServer::new(config.server_options(), clock);
        if config.auth.secured {
            server = server.with_auth(Arc::new(StaticAuthProvider::new(config.auth.users.clone())));
        }
        Ok(Self {
            config,
            server: Arc::new(server),
            handler: Arc::new(DefaultHandler),
        })
    }

    /// Substitute the command handler for this broker instance.
    pub fn with_handler(mut self, handler: Arc<dyn StompHandler<C>>) -> Self {
        self.handler = handler;
        self
    }

    pub fn server(&self) -> Arc<StompServer<C>> {
        self.server.clone()
    }

    /// Bind the listener and serve until interrupted.
    pub async fn serve(self) -> Result<()> {
        let listener = StompListener::bind(&self.config.listener.bind).await?;
        tracing::info!("stompd serving on {}", listener.local_addr());
        tokio::select! {
            result = listener.serve(self.server.clone(), self.handler.clone()) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                Ok(())
            }
        }
    }
}
