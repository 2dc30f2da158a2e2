//! Per-command handler seam.
//!
//! Every STOMP command is dispatched through a [`StompHandler`] method, and
//! every method has a default body implementing the standard semantics from
//! [`crate::session::engine`]. A server instance can be given any handler,
//! so alternate implementations override only the commands they care about:
//!
//! ```ignore
//! struct Audited;
//!
//! impl<C: Clock> StompHandler<C> for Audited {
//!     fn on_send<'a>(
//!         &'a self,
//!         server: &'a StompServer<C>,
//!         conn: &'a Connection,
//!         frame: Frame,
//!     ) -> HandlerFuture<'a> {
//!         Box::pin(async move {
//!             tracing::info!("SEND from {}", conn.id());
//!             server.send(conn, frame).await
//!         })
//!     }
//! }
//! ```

use crate::core::time::Clock;
use crate::protocol::Frame;
use crate::session::connection::Connection;
use crate::session::engine::{SessionAction, StompServer};
use std::future::Future;
use std::pin::Pin;

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = SessionAction> + Send + 'a>>;

/// Command callbacks with standard-semantics defaults.
pub trait StompHandler<C: Clock>: Send + Sync {
    fn on_connect<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.connect(conn, frame))
    }

    /// STOMP frames are CONNECT frames under a newer name.
    fn on_stomp<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.connect(conn, frame))
    }

    fn on_send<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.send(conn, frame))
    }

    fn on_subscribe<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.subscribe(conn, frame))
    }

    fn on_unsubscribe<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.unsubscribe(conn, frame))
    }

    fn on_begin<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.begin(conn, frame))
    }

    fn on_commit<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.commit(conn, frame))
    }

    fn on_abort<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.abort(conn, frame))
    }

    fn on_ack<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.ack(conn, frame))
    }

    fn on_nack<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.nack(conn, frame))
    }

    fn on_disconnect<'a>(
        &'a self,
        server: &'a StompServer<C>,
        conn: &'a Connection,
        frame: Frame,
    ) -> HandlerFuture<'a> {
        Box::pin(server.disconnect(conn, frame))
    }
}

/// The standard handler: every method keeps its default body.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHandler;

impl<C: Clock> StompHandler<C> for DefaultHandler {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::options::ServerOptions;
    use crate::core::time::SystemClock;
    use crate::protocol::frame::headers as h;
    use crate::protocol::Command;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    /// Counts SENDs, then falls through to the standard behavior.
    struct CountingHandler {
        sends: Arc<AtomicUsize>,
    }

    impl StompHandler<SystemClock> for CountingHandler {
        fn on_send<'a>(
            &'a self,
            server: &'a StompServer<SystemClock>,
            conn: &'a Connection,
            frame: Frame,
        ) -> HandlerFuture<'a> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            Box::pin(server.send(conn, frame))
        }
    }

    #[tokio::test]
    async fn test_override_keeps_default_semantics() {
        let server = StompServer::new(ServerOptions::default(), SystemClock);
        let (tx, mut rx) = mpsc::channel(16);
        let conn = server.new_connection(None, tx);
        let sends = Arc::new(AtomicUsize::new(0));
        let handler = CountingHandler {
            sends: sends.clone(),
        };

        let connect = Frame::new(Command::Connect).with_header(h::ACCEPT_VERSION, "1.2");
        server.handle_frame(&handler, &conn, connect).await;
        assert_eq!(rx.try_recv().unwrap().command, Command::Connected);

        let subscribe = Frame::new(Command::Subscribe)
            .with_header(h::ID, "0")
            .with_header(h::DESTINATION, "/topic/t");
        server.handle_frame(&handler, &conn, subscribe).await;

        let send = Frame::new(Command::Send)
            .with_header(h::DESTINATION, "/topic/t")
            .with_body("x");
        server.handle_frame(&handler, &conn, send).await;

        assert_eq!(sends.load(Ordering::SeqCst), 1);
        assert_eq!(rx.try_recv().unwrap().command, Command::Message);
    }
}
