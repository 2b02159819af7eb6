//! Listener lifecycle for the gateway.
//!
//! [`GatewayServer::start`] is idempotent: the first successful call binds
//! the configured address and spawns the axum server; later calls are
//! no-ops. A failed bind leaves the server unstarted so it can be retried.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use axum::Router;
use eyre::{Result, WrapErr};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::Instrument;

use crate::{
    adapters::http_handler::{HttpHandler, router},
    core::GatewayService,
    tracing_setup,
    utils::graceful_shutdown::ShutdownToken,
};

/// A running listener: its bound address and the server task.
#[derive(Debug)]
pub struct RunningServer {
    pub local_addr: SocketAddr,
    pub task: JoinHandle<Result<()>>,
}

/// Owns the router and starts it at most once.
pub struct GatewayServer {
    addr: SocketAddr,
    app: Router,
    shutdown: ShutdownToken,
    started: AtomicBool,
}

impl GatewayServer {
    /// Prepare a server for `service`, listening on the configured address.
    ///
    /// # Errors
    /// Fails if the listen address or the response headers are invalid.
    pub fn new(service: Arc<GatewayService>, shutdown: ShutdownToken) -> Result<Self> {
        let addr = service.config().socket_addr()?;
        let handler = Arc::new(HttpHandler::new(service)?);
        Ok(Self::with_router(addr, router(handler), shutdown))
    }

    /// Server for an already built router.
    pub fn with_router(addr: SocketAddr, app: Router, shutdown: ShutdownToken) -> Self {
        Self {
            addr,
            app,
            shutdown,
            started: AtomicBool::new(false),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Bind and serve in a background task.
    ///
    /// Returns `Ok(None)` if the server was already started.
    ///
    /// # Errors
    /// Fails if the address cannot be bound; the server may then be started again.
    pub async fn start(&self) -> Result<Option<RunningServer>> {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Gateway server already started");
            return Ok(None);
        }

        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(e) => {
                self.started.store(false, Ordering::Release);
                return Err(e).wrap_err_with(|| format!("Failed to bind to {}", self.addr));
            }
        };
        let local_addr = listener
            .local_addr()
            .wrap_err("Failed to get local addr")?;

        tracing::info!("Dendrite gateway listening on {}", local_addr);

        let app = self.app.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(
            async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let reason = shutdown.wait_for_shutdown().await;
                        tracing::info!("Stopping listener: {:?}", reason);
                    })
                    .await
                    .wrap_err("Server error")
            }
            .instrument(tracing_setup::configure_component_tracing("gateway_server")),
        );

        Ok(Some(RunningServer { local_addr, task }))
    }
}
