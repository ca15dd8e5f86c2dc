//! Network surfaces: control channel (WebSocket) and data channel (HTTP).
//!
//! The two listen on separate sockets. The control listener owns session
//! lifetime; the data listener only reads sessions through the registry.

pub mod control;
pub mod data;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::streaming::{Fetcher, RenderProfile, SessionRegistry};
use crate::tick::{SettingsHandle, TickBroadcaster};

/// Shared state for the control listener.
pub struct ControlState<F: Fetcher> {
    pub registry: Arc<SessionRegistry>,
    pub ticks: TickBroadcaster<F::State>,
    pub fetcher: Arc<F>,
    pub settings: SettingsHandle,
    pub profile: RenderProfile,
    pub stall_timeout: Option<Duration>,
}

impl<F: Fetcher> Clone for ControlState<F> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            ticks: self.ticks.clone(),
            fetcher: Arc::clone(&self.fetcher),
            settings: self.settings.clone(),
            profile: self.profile.clone(),
            stall_timeout: self.stall_timeout,
        }
    }
}

/// Serve both listeners until `shutdown` fires.
///
/// On shutdown every session is closed so open WebSockets finish promptly.
pub async fn serve<F: Fetcher>(
    control_listener: TcpListener,
    data_listener: TcpListener,
    state: ControlState<F>,
    shutdown: CancellationToken,
) -> Result<()> {
    let registry = Arc::clone(&state.registry);
    let control_app: Router = control::router(state);
    let data_app: Router = data::router(Arc::clone(&registry));

    let reaper = {
        let registry = Arc::clone(&registry);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            let closed = registry.close_all();
            tracing::info!(closed, "closed all sessions for shutdown");
        })
    };

    let control_shutdown = shutdown.clone();
    let control = async move {
        axum::serve(control_listener, control_app)
            .with_graceful_shutdown(async move { control_shutdown.cancelled().await })
            .await
            .context("control listener failed")
    };

    let data_shutdown = shutdown.clone();
    let data = async move {
        axum::serve(data_listener, data_app)
            .with_graceful_shutdown(async move { data_shutdown.cancelled().await })
            .await
            .context("data listener failed")
    };

    let result = tokio::try_join!(control, data);
    shutdown.cancel();
    let _ = reaper.await;
    result.map(|_| ())
}
