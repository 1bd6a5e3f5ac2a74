//! # 실시간 WebSocket 핸들러
//!
//! `GET /ws`로 들어온 요청을 WebSocket으로 업그레이드하고,
//! 연결이 끊길 때까지 수신/송신을 하나의 루프에서 처리합니다.
//!
//! ```text
//! ┌──────────── tokio::select! ────────────┐
//! │ rx.recv()     → 소켓으로 JSON 전송       │  (세션이 발행한 이벤트)
//! │ socket.recv() → Connection::handle_text │  (클라이언트 이벤트)
//! └─────────────────────────────────────────┘
//! ```
//!
//! 세션 잠금은 `handle_text` 안에서만 잡았다 놓으므로 `.await` 너머로 잠금을 들고 가지 않습니다.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use tokio::sync::mpsc;

use crate::{gateway::Gateway, models::ServerMessage, routes::AppState};

/// `GET /ws`: WebSocket 업그레이드
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// 연결 하나의 수명 전체를 담당하는 태스크
async fn handle_socket(mut socket: WebSocket, gateway: Gateway) {
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut conn = gateway.connect(tx);

    loop {
        tokio::select! {
            // 발신: 큐에 쌓인 이벤트를 소켓으로 보냅니다
            Some(msg) = rx.recv() => {
                let shutting_down = matches!(msg, ServerMessage::ServerShutdown);
                match serde_json::to_string(&msg) {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => tracing::error!(error = %err, "failed to encode server message"),
                }
                if shutting_down {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            // 수신: 클라이언트 이벤트
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => conn.handle_text(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(
                            player_id = %conn.player_id(),
                            error = %err,
                            "socket error"
                        );
                        break;
                    }
                    // ping/pong은 axum이 처리하고, 바이너리 프레임은 무시합니다
                    Some(Ok(_)) => continue,
                }
            }
        }
    }

    conn.disconnect();
}
