//! Servidor Axum que executa o pipeline de anotação por documento (HTTP e WebSocket)

use std::sync::Arc;
use std::time::Duration;

use anotador_core::{AnnotationPipeline, AnotadorError, Document, PipelineConfig, PipelineEvent, ProcessSummary};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Endereço de escuta (padrão `0.0.0.0:3000`).
const ADDR_ENV: &str = "ANOTADOR_ADDR";
/// Prazo de uma requisição inteira, além do prazo da correferência.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

struct AppState {
    pipeline: AnnotationPipeline,
}

/// Corpo aceito: um documento completo ou texto puro.
#[derive(Deserialize)]
#[serde(untagged)]
enum ProcessRequest {
    Document { document: Document },
    Text {
        #[serde(default)]
        id: Option<String>,
        text: String,
    },
}

impl ProcessRequest {
    fn into_document(self) -> Document {
        match self {
            Self::Document { document } => document,
            Self::Text { id, text } => Document::from_text(id.unwrap_or_else(|| "doc".into()), &text),
        }
    }
}

#[derive(Serialize)]
struct ProcessResponse {
    document: Document,
    summary: ProcessSummary,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // configuração inválida é fatal: o servidor não sobe
    let config = PipelineConfig::from_env()?;
    let pipeline = AnnotationPipeline::from_config(&config)?;
    let state = Arc::new(AppState { pipeline });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/process", post(process_handler))
        .route("/ws", get(ws_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors))
        .with_state(state);

    let addr = std::env::var(ADDR_ENV).unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("servidor de anotação em http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Processa um documento inteiro; erros de documento não afetam outras requisições.
async fn process_handler(State(state): State<Arc<AppState>>, Json(req): Json<ProcessRequest>) -> Response {
    let mut document = req.into_document();
    let worker = Arc::clone(&state);
    let handle = tokio::task::spawn_blocking(move || {
        let result = worker.pipeline.process(&mut document);
        (document, result)
    });

    match tokio::time::timeout(REQUEST_TIMEOUT, handle).await {
        Ok(Ok((document, Ok(summary)))) => Json(ProcessResponse { document, summary }).into_response(),
        Ok(Ok((document, Err(e)))) => {
            warn!(document = %document.id, error = %e, "documento rejeitado");
            error_response(&e)
        }
        Ok(Err(join)) => {
            error!(error = %join, "falha na tarefa do pipeline");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "falha interna" })),
            )
                .into_response()
        }
        Err(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            Json(serde_json::json!({ "error": "prazo da requisição esgotado" })),
        )
            .into_response(),
    }
}

fn error_response(e: &AnotadorError) -> Response {
    let status = match e {
        AnotadorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        e if e.is_document_level() => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

/// Upgrade HTTP → WebSocket
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Cada mensagem é um documento (JSON ou texto puro); a resposta é a sequência de eventos.
async fn handle_websocket(mut socket: WebSocket, state: Arc<AppState>) {
    info!("WebSocket conectado");

    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Text(text) => {
                let document = match serde_json::from_str::<ProcessRequest>(&text) {
                    Ok(req) => req.into_document(),
                    Err(_) if !text.trim().is_empty() => Document::from_text("ws", text.trim()),
                    Err(_) => continue,
                };
                info!(document = %document.id, sentences = document.sentences().len(), "processando via WebSocket");

                let (tx, rx) = std::sync::mpsc::channel::<PipelineEvent>();
                let worker = Arc::clone(&state);
                let handle = tokio::task::spawn_blocking(move || {
                    let mut document = document;
                    // o evento Done/Error já carrega o resultado
                    let _ = worker.pipeline.process_streaming(&mut document, tx);
                });

                if tokio::time::timeout(REQUEST_TIMEOUT, handle).await.is_err() {
                    let event = PipelineEvent::Error {
                        message: "prazo da requisição esgotado".into(),
                    };
                    if send_event(&mut socket, &event).await.is_err() {
                        return;
                    }
                    continue;
                }

                // a tarefa terminou: todos os eventos já estão no canal
                let events: Vec<PipelineEvent> = rx.try_iter().collect();
                for event in &events {
                    if send_event(&mut socket, event).await.is_err() {
                        return; // cliente desconectou
                    }
                }
            }
            Message::Close(_) => {
                info!("WebSocket desconectado");
                return;
            }
            Message::Ping(payload) => {
                let _ = socket.send(Message::Pong(payload)).await;
            }
            _ => {}
        }
    }
}

async fn send_event(socket: &mut WebSocket, event: &PipelineEvent) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => socket.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "evento não serializável");
            Ok(())
        }
    }
}
