//! Skyrush - Server-Authoritative Crash Game Engine
//!
//! One process owns the round timeline: the crash point is drawn and
//! committed server-side before betting closes, the multiplier clock runs
//! on the server tick, and clients are pure renderers of broadcast state.
//! Their commands race the same authoritative clock everyone else sees.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::Response,
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skyrush_backend::{
    api::{routes, AppState},
    engine::{SupervisorHandle, WsClientCommand, WsServerEvent},
    ledger::{SettlementLedger, WalletDb},
    models::Config,
};

const EVENT_CHANNEL_DEPTH: usize = 1024;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Config::from_env().context("Failed to load configuration")?;

    info!("🚁 Skyrush crash engine starting");
    info!(
        tick_ms = config.engine.tick_ms,
        waiting_ms = config.engine.waiting_ms,
        cooldown_ms = config.engine.cooldown_ms,
        p_low = config.engine.crash.p_low,
        tail_cap = config.engine.crash.tail_cap,
        "engine configuration loaded"
    );

    let wallet = Arc::new(WalletDb::new(&config.wallet_db_path)?);
    info!("💾 Wallet ledger initialized at: {}", config.wallet_db_path);

    let (event_tx, _event_rx) = broadcast::channel::<WsServerEvent>(EVENT_CHANNEL_DEPTH);

    let ledger: Arc<dyn SettlementLedger> = wallet.clone();
    let supervisor = SupervisorHandle::spawn(config.engine.clone(), ledger, event_tx.clone());

    let app_state = AppState {
        supervisor,
        events: event_tx,
        crash_params: config.engine.crash,
        wallet,
    };

    let app = Router::new()
        .route("/health", get(routes::health_check))
        .route("/api/round/snapshot", get(routes::get_round_snapshot))
        .route("/api/round/history", get(routes::get_round_history))
        .route("/api/round/verify", get(routes::get_round_verify))
        .route("/api/wallet/deposit", post(routes::post_wallet_deposit))
        .route("/api/wallet/balance", get(routes::get_wallet_balance))
        .route("/ws", get(websocket_handler))
        .with_state(app_state)
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyrush_backend=info,skyrush=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let mut rx = state.events.subscribe();

    // Replay the current round and recent outcomes immediately so a fresh
    // (or reconnecting) client renders real state before the next tick.
    if let Some(snapshot) = state.supervisor.snapshot().await {
        if send_event(&mut socket, &WsServerEvent::Snapshot { snapshot })
            .await
            .is_err()
        {
            return;
        }
    }
    let outcomes = state.supervisor.history().await;
    if send_event(&mut socket, &WsServerEvent::History { outcomes })
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Slow consumer; ticks are disposable, resume.
                        warn!(skipped, "ws client lagged behind broadcast");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        match serde_json::from_str::<WsClientCommand>(&text) {
                            Ok(cmd) => {
                                let ack = run_command(&state.supervisor, cmd).await;
                                if send_event(&mut socket, &ack).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => debug!("ignoring malformed ws command: {e}"),
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }
}

async fn run_command(supervisor: &SupervisorHandle, cmd: WsClientCommand) -> WsServerEvent {
    match cmd {
        WsClientCommand::PlaceBet {
            player_id,
            slot_index,
            amount,
        } => supervisor.place_bet(player_id, slot_index, amount).await,
        WsClientCommand::CashOut {
            player_id,
            slot_index,
        } => supervisor.cash_out(player_id, slot_index).await,
        WsClientCommand::CancelBet {
            player_id,
            slot_index,
        } => supervisor.cancel_bet(player_id, slot_index).await,
    }
}

async fn send_event(socket: &mut WebSocket, event: &WsServerEvent) -> Result<(), axum::Error> {
    let msg = serde_json::to_string(event).unwrap_or_else(|e| {
        warn!("Failed to serialize ws event: {}", e);
        "{}".to_string()
    });
    socket.send(Message::Text(msg)).await
}
