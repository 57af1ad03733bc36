use axum::{
    Router,
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{Json, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    agents::{ReferenceData, TextGenerator},
    config::ServiceConfig,
    conversation::{RoadsideAssistant, TurnOutcome},
    error::ServiceError,
    models::{CollectedFields, ConversationState, MessageKind, ProblemAnalysis, problem_types},
    orchestrator::{Confirmation, ConfirmationOutcome, DispatchOrchestrator, DispatchResult},
    relay::{ConnectionManager, Role},
    store::{CaseRepository, DocumentStore, FileDocumentStore},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

fn service_error(err: ServiceError) -> ApiError {
    match &err {
        ServiceError::Validation(message) => bad_request_error(message),
        ServiceError::NotReady => (
            StatusCode::CONFLICT,
            Json(json!({ "error": err.to_string() })),
        ),
        ServiceError::ConversationNotFound(id) => not_found_error("Conversation not found", id),
        ServiceError::ClaimNotFound(id) => not_found_error("Case not found", id),
        ServiceError::Persistence(details) => {
            error!(error = %details, "Storage failure");
            internal_error("Storage failure", details)
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub assistant: Arc<RoadsideAssistant>,
    pub orchestrator: Arc<DispatchOrchestrator>,
    pub repository: Arc<CaseRepository>,
    pub relay: Arc<ConnectionManager>,
    pub status_message: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        reference: ReferenceData,
        store: Arc<dyn DocumentStore>,
    ) -> Self {
        let repository = Arc::new(CaseRepository::new(store));
        let assistant = Arc::new(RoadsideAssistant::new(generator, reference.policy.clone()));
        let orchestrator = Arc::new(DispatchOrchestrator::new(
            Arc::new(reference),
            repository.clone(),
        ));

        Self {
            assistant,
            orchestrator,
            repository,
            relay: Arc::new(ConnectionManager::new()),
            status_message: Arc::new(RwLock::new(None)),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        info!(data_dir = %config.data_dir.display(), model = %config.llm_model, "Building application state");
        Self::new(
            config.text_generator(),
            ReferenceData::default(),
            Arc::new(FileDocumentStore::new(&config.data_dir)),
        )
    }

    async fn set_status(&self, line: Option<String>) {
        if let Some(line) = line {
            *self.status_message.write().await = Some(line);
        }
    }
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/conversation", post(conversation))
        .route("/api/check_coverage", post(check_coverage))
        .route("/api/process_claim", post(process_claim))
        .route("/api/confirm_dispatch", post(confirm_dispatch))
        .route("/api/get_status", get(get_status))
        .route("/api/admin/cases", get(admin_cases))
        .route("/api/admin/cases/{case_id}/takeover", post(takeover_case))
        .route(
            "/api/admin/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/api/admin/conversations/{conversation_id}/message",
            post(add_conversation_message),
        )
        .route(
            "/api/admin/conversations/{conversation_id}/admin_message",
            post(send_admin_message),
        )
        .route(
            "/api/admin/conversations/{conversation_id}/takeover",
            post(takeover_conversation),
        )
        .route(
            "/api/admin/conversations/{conversation_id}/close",
            post(close_conversation),
        )
        .route("/ws/client/{conversation_id}", get(client_socket))
        .route("/ws/admin/{conversation_id}", get(admin_socket))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ConversationRequest {
    #[serde(default)]
    message: String,
    #[serde(default)]
    state: Option<ConversationState>,
    #[serde(default)]
    conversation_id: Option<String>,
}

async fn conversation(
    State(state): State<AppState>,
    Json(request): Json<ConversationRequest>,
) -> ApiResult<TurnOutcome> {
    let message = request.message.trim();
    let outcome = state
        .assistant
        .handle_turn(message, request.state.unwrap_or_default())
        .await;

    let conversation_id = request
        .conversation_id
        .as_deref()
        .filter(|id| !id.trim().is_empty());
    if let (Some(conversation_id), false) = (conversation_id, message.is_empty()) {
        let collected = &outcome.state.collected;
        state
            .repository
            .log_turn(
                conversation_id,
                collected.customer_name.as_deref(),
                collected.problem_type.as_deref(),
                message,
                &outcome.reply,
            )
            .await
            .map_err(service_error)?;
    }

    Ok(Json(outcome))
}

#[derive(Debug, Deserialize)]
struct CheckCoverageRequest {
    #[serde(default)]
    problem_description: String,
}

async fn check_coverage(
    State(state): State<AppState>,
    Json(request): Json<CheckCoverageRequest>,
) -> ApiResult<ProblemAnalysis> {
    let description = request.problem_description.trim();
    if description.is_empty() {
        return Err(bad_request_error("problem_description is required"));
    }
    Ok(Json(state.assistant.analyzer().analyze(description, None).await))
}

/// Accepts a conversation state, or the older flat `name`/`location`/`issue`
/// payload which is treated as ready for dispatch.
#[derive(Debug, Deserialize)]
struct ProcessClaimRequest {
    #[serde(default)]
    conversation_state: Option<ConversationState>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    name: String,
    #[serde(default)]
    location: String,
    #[serde(default)]
    issue: String,
}

impl ProcessClaimRequest {
    fn into_state(self) -> ConversationState {
        match self.conversation_state {
            Some(state) => state,
            None => ConversationState {
                collected: CollectedFields {
                    customer_name: Some(self.name),
                    location_description: Some(self.location),
                    problem_description: Some(self.issue),
                    problem_type: Some(problem_types::GENERAL.to_string()),
                    ..CollectedFields::default()
                },
                ready_for_dispatch: true,
                ..ConversationState::default()
            },
        }
    }
}

async fn process_claim(
    State(state): State<AppState>,
    Json(request): Json<ProcessClaimRequest>,
) -> ApiResult<DispatchResult> {
    let conversation_id = request.conversation_id.clone();
    let conversation_state = request.into_state();

    let result = state
        .orchestrator
        .dispatch(&conversation_state, conversation_id.as_deref())
        .await
        .map_err(service_error)?;

    info!(status = ?result.status, agents = result.agents_executed.len(), "Claim processed");
    state.set_status(result.status_line()).await;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct ConfirmDispatchRequest {
    #[serde(default)]
    conversation_state: ConversationState,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(flatten)]
    confirmation: Confirmation,
}

async fn confirm_dispatch(
    State(state): State<AppState>,
    Json(request): Json<ConfirmDispatchRequest>,
) -> ApiResult<ConfirmationOutcome> {
    let outcome = state
        .orchestrator
        .confirm_dispatch(
            &request.conversation_state,
            request.confirmation,
            request.conversation_id.as_deref(),
        )
        .await
        .map_err(service_error)?;

    state.set_status(outcome.status_line()).await;
    Ok(Json(outcome))
}

async fn get_status(State(state): State<AppState>) -> Json<Value> {
    let message = state.status_message.read().await.clone();
    Json(json!({ "message": message }))
}

async fn admin_cases(State(state): State<AppState>) -> ApiResult<Value> {
    let cases = state
        .repository
        .list_cases_for_admin()
        .await
        .map_err(service_error)?;
    Ok(Json(json!({ "cases": cases })))
}

#[derive(Debug, Default, Deserialize)]
struct TakeoverCaseRequest {
    #[serde(default)]
    admin_user: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

async fn takeover_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    Json(request): Json<TakeoverCaseRequest>,
) -> ApiResult<Value> {
    let admin_user = request.admin_user.as_deref().unwrap_or("Unknown Admin");
    let reason = request.reason.as_deref().unwrap_or("Manual intervention");

    let claim = state
        .repository
        .takeover_case(&case_id, admin_user, reason)
        .await
        .map_err(service_error)?;

    Ok(Json(json!({
        "message": "Case taken over successfully",
        "case_id": case_id,
        "status": claim.status,
    })))
}

async fn list_conversations(State(state): State<AppState>) -> ApiResult<Value> {
    let board = state
        .repository
        .list_conversations()
        .await
        .map_err(service_error)?;
    Ok(Json(json!({ "conversations": board })))
}

#[derive(Debug, Deserialize)]
struct CreateConversationRequest {
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    customer_name: Option<String>,
    #[serde(default)]
    problem_type: Option<String>,
}

async fn create_conversation(
    State(state): State<AppState>,
    Json(request): Json<CreateConversationRequest>,
) -> ApiResult<Value> {
    let Some(conversation_id) = request.conversation_id.filter(|id| !id.trim().is_empty()) else {
        return Err(bad_request_error("conversation_id is required"));
    };

    state
        .repository
        .ensure_conversation(
            &conversation_id,
            request.customer_name.as_deref(),
            request.problem_type.as_deref(),
        )
        .await
        .map_err(service_error)?;

    Ok(Json(json!({
        "message": "Conversation created successfully",
        "conversation_id": conversation_id
    })))
}

#[derive(Debug, Deserialize)]
struct AddMessageRequest {
    #[serde(default)]
    message_type: Option<MessageKind>,
    #[serde(default)]
    content: String,
    #[serde(default)]
    sender: Option<String>,
}

async fn add_conversation_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<AddMessageRequest>,
) -> ApiResult<Value> {
    let kind = request.message_type.unwrap_or(MessageKind::User);
    let sender = request
        .sender
        .unwrap_or_else(|| kind.as_str().to_string());

    state
        .repository
        .append_message(&conversation_id, kind, &request.content, &sender)
        .await
        .map_err(service_error)?;

    Ok(Json(json!({ "message": "Message added successfully" })))
}

#[derive(Debug, Deserialize)]
struct AdminMessageRequest {
    #[serde(default)]
    admin_user: Option<String>,
    #[serde(default)]
    message: String,
}

async fn send_admin_message(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<AdminMessageRequest>,
) -> ApiResult<Value> {
    let admin_user = request.admin_user.as_deref().unwrap_or("Admin");
    if request.message.trim().is_empty() {
        return Err(bad_request_error("Message content is required"));
    }

    state
        .repository
        .append_message(&conversation_id, MessageKind::Admin, &request.message, admin_user)
        .await
        .map_err(service_error)?;

    state.relay.send_to_conversation(
        &conversation_id,
        &json!({
            "type": "admin_message",
            "content": request.message,
            "timestamp": Utc::now(),
            "sender": admin_user,
            "admin_user": admin_user,
        }),
        Some(Role::Admin),
    );

    Ok(Json(json!({ "message": "Message sent successfully" })))
}

#[derive(Debug, Default, Deserialize)]
struct TakeoverConversationRequest {
    #[serde(default)]
    admin_user: Option<String>,
}

async fn takeover_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(request): Json<TakeoverConversationRequest>,
) -> ApiResult<Value> {
    let admin_user = request.admin_user.as_deref().unwrap_or("Admin");
    state
        .repository
        .takeover_conversation(&conversation_id, admin_user)
        .await
        .map_err(service_error)?;
    Ok(Json(json!({ "message": "Conversation taken over successfully" })))
}

async fn close_conversation(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> ApiResult<Value> {
    state
        .repository
        .close_conversation(&conversation_id)
        .await
        .map_err(service_error)?;
    Ok(Json(json!({ "message": "Conversation closed successfully" })))
}

async fn client_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| relay_socket(socket, state, conversation_id, Role::Client))
}

async fn admin_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Response {
    ws.on_upgrade(move |socket| relay_socket(socket, state, conversation_id, Role::Admin))
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    admin_user: Option<String>,
}

async fn relay_socket(mut socket: WebSocket, state: AppState, conversation_id: String, role: Role) {
    let mut connection = state.relay.connect(&conversation_id, role);

    loop {
        tokio::select! {
            frame = connection.receiver.recv() => match frame {
                Some(text) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_inbound(&state, &conversation_id, role, text.as_str()).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.relay.disconnect(&conversation_id, role, connection.id);
}

async fn handle_inbound(state: &AppState, conversation_id: &str, role: Role, raw: &str) {
    let frame: InboundFrame = match serde_json::from_str(raw) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(conversation_id = %conversation_id, role = ?role, error = %e, "Ignoring malformed relay frame");
            return;
        }
    };
    if frame.content.trim().is_empty() {
        return;
    }

    let (outgoing, kind, author) = match (role, frame.kind.as_str()) {
        (Role::Client, "message") => (
            json!({
                "type": "client_message",
                "content": frame.content,
                "timestamp": Utc::now(),
                "sender": "Client",
            }),
            MessageKind::User,
            "Client".to_string(),
        ),
        (Role::Admin, "admin_message") => {
            let admin_user = frame.admin_user.unwrap_or_else(|| "Admin".to_string());
            (
                json!({
                    "type": "admin_message",
                    "content": frame.content,
                    "timestamp": Utc::now(),
                    "sender": frame.sender.as_deref().unwrap_or("Admin"),
                    "admin_user": admin_user,
                }),
                MessageKind::Admin,
                admin_user,
            )
        }
        _ => return,
    };

    state
        .relay
        .send_to_conversation(conversation_id, &outgoing, Some(role));

    if let Err(e) = state
        .repository
        .append_message(conversation_id, kind, &frame.content, &author)
        .await
    {
        warn!(conversation_id = %conversation_id, error = %e, "Relayed message was not logged");
    }
}
