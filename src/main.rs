//! # TypeForge 레이스 서버 진입점
//!
//! 이 파일은 레이스 서버의 **시작점(entry point)**입니다.
//! 실제 로직은 라이브러리 크레이트(`src/lib.rs`)에 있고, 여기서는 조립만 합니다.
//!
//! 이 파일이 수행하는 작업:
//! 1. 환경변수(.env) 로딩
//! 2. 로깅(tracing) 초기화
//! 3. 설정 읽기
//! 4. 결과 채널과 리더보드 소비자 시작
//! 5. 레이스 레지스트리와 정리(sweep) 작업 시작
//! 6. 라우터 설정 (REST + WebSocket)
//! 7. HTTP 서버 시작, Ctrl+C 시 정상 종료 후 레지스트리 정리

use anyhow::Result; // anyhow::Result: 어떤 에러 타입이든 담을 수 있는 범용 Result 타입
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tower_http::{
    cors::{Any, CorsLayer}, // CORS(Cross-Origin Resource Sharing) 설정
    trace::TraceLayer,      // HTTP 요청/응답 로깅 미들웨어
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use typeforge::{
    config::Config,
    race::Registry,
    routes::{self, AppState},
    services::{
        leaderboard::{consume_results, Leaderboard},
        texts::ParagraphSource,
    },
};

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1단계: 환경변수 로딩 ──
    // .env 파일이 없어도 에러 없이 넘어갑니다.
    dotenvy::dotenv().ok();

    // ── 2단계: 로깅(tracing) 초기화 ──
    // EnvFilter: RUST_LOG 환경변수로 로그 레벨을 제어합니다.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "typeforge=debug,tower_http=debug,axum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // ── 3단계: 설정 로딩 ──
    let config = Config::from_env()?;
    tracing::info!("Starting TypeForge server on {}:{}", config.host, config.port);

    // ── 4단계: 결과 채널 + 리더보드 ──
    // 세션들이 결과를 보내는 쪽(tx), 리더보드가 받는 쪽(rx)
    let (results_tx, results_rx) = mpsc::unbounded_channel();
    let leaderboard = Arc::new(Leaderboard::new());
    let consumer = tokio::spawn(consume_results(results_rx, Arc::clone(&leaderboard)));

    // ── 5단계: 레지스트리 + 정리 작업 ──
    let texts = Arc::new(ParagraphSource::builtin());
    tracing::info!(paragraphs = texts.len(), "loaded race texts");
    let registry = Arc::new(Registry::new(config.registry_config(), texts, results_tx));

    let sweeper = {
        let registry = Arc::clone(&registry);
        let period = Duration::from_secs(config.sweep_interval_seconds);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                registry.sweep(Utc::now());
            }
        })
    };

    // ── 6단계: 라우터 ──
    let state = AppState::new(Arc::clone(&registry), leaderboard);
    let app = routes::router(state)
        .layer(cors_layer(&config.frontend_url)?)
        .layer(TraceLayer::new_for_http()); // HTTP 요청/응답 자동 로깅

    // ── 7단계: 서버 시작 ──
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Ctrl+C를 받으면 새 연결을 멈추고 진행 중인 요청이 끝날 때까지 기다립니다.
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // ── 종료 처리 ──
    // 진행 중인 레이스를 끝내 미완주 결과까지 리더보드로 보낸 뒤 레지스트리를 비웁니다.
    sweeper.abort();
    registry.drain(Utc::now());
    // 마지막 송신 핸들(레지스트리)이 사라져야 소비자가 끝까지 읽고 종료됩니다
    drop(registry);
    if let Err(err) = tokio::time::timeout(Duration::from_secs(5), consumer).await {
        tracing::warn!(error = %err, "leaderboard consumer did not finish in time");
    }
    tracing::info!("Server stopped");

    Ok(())
}

/// FRONTEND_URL이 `*`이면 모든 출처를, 아니면 그 출처 하나만 허용합니다.
fn cors_layer(frontend_url: &str) -> Result<CorsLayer> {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if frontend_url == "*" {
        return Ok(cors.allow_origin(Any));
    }
    let origin = frontend_url.parse::<axum::http::HeaderValue>()?;
    Ok(cors.allow_origin(origin))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        // 신호를 받을 수 없으면 영원히 대기 (서버는 계속 동작)
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
