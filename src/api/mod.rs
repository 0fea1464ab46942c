//! Read-only query surface and shared application state.

pub mod routes;

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::engine::{CrashParams, SupervisorHandle, WsServerEvent};
use crate::ledger::WalletDb;

/// Application state shared across all handlers and sockets.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: SupervisorHandle,
    pub events: broadcast::Sender<WsServerEvent>,
    pub crash_params: CrashParams,
    /// Concrete wallet handle: deposits are account funding, not game
    /// settlement, and must not go through the settlement credit path.
    pub wallet: Arc<WalletDb>,
}
