//! HTTP route handlers for the API.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use scriptorium_agents::{
    AgentDescriptor, PipelineExecutor, StepRecord, WorkflowStep, step_text_for,
};
use scriptorium_common::{
    AgentId, ConfigError, Provider, Role, ScriptoriumError, TaskStatus, WorkflowMode,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;
use crate::session::{Effect, RunState, SessionEvent, UserAction};
use crate::state::{SharedSession, update_session};

/// API error. Serialised as `{"detail": ...}`, plus the attempted steps
/// when a provider call failed mid-chain.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{detail}")]
    Upstream {
        detail: String,
        steps: Vec<StepSummary>,
    },

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<Vec<StepSummary>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail, steps) = match self {
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, detail, None),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, detail, None),
            ApiError::Upstream { detail, steps } => (StatusCode::BAD_GATEWAY, detail, Some(steps)),
            ApiError::Unavailable(detail) => (StatusCode::SERVICE_UNAVAILABLE, detail, None),
            ApiError::Internal(detail) => (StatusCode::INTERNAL_SERVER_ERROR, detail, None),
        };
        (status, Json(ErrorBody { detail, steps })).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<ScriptoriumError> for ApiError {
    fn from(e: ScriptoriumError) -> Self {
        match e {
            ScriptoriumError::Config(e) => e.into(),
            ScriptoriumError::ProviderAuth { .. } | ScriptoriumError::ProviderCall { .. } => {
                ApiError::Upstream {
                    detail: e.to_string(),
                    steps: Vec::new(),
                }
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

/// Provider and bare model name for an agent.
///
/// An explicit provider wins. Otherwise a `provider/model` prefix is used,
/// and failing that the provider is inferred from well-known model families.
pub(crate) fn provider_and_model(
    provider: Option<&str>,
    model: &str,
) -> Result<(Provider, String), ConfigError> {
    let model = model.trim();
    let explicit = provider.map(str::trim).filter(|p| !p.is_empty());

    match (explicit, Provider::split_qualified_model(model)) {
        (Some(name), qualified) => {
            let provider: Provider = name.parse()?;
            let bare = match qualified {
                Some((Ok(prefix), rest)) if prefix == provider => rest,
                _ => model,
            };
            Ok((provider, bare.to_string()))
        }
        (None, Some((prefix, rest))) => Ok((prefix?, rest.to_string())),
        (None, None) => infer_provider(model)
            .map(|p| (p, model.to_string()))
            .ok_or_else(|| {
                ConfigError::UnsupportedProvider(format!(
                    "cannot infer a provider for model '{model}'"
                ))
            }),
    }
}

fn infer_provider(model: &str) -> Option<Provider> {
    let model = model.to_ascii_lowercase();
    if ["gpt", "chatgpt", "o1", "o3", "o4"]
        .iter()
        .any(|p| model.starts_with(p))
    {
        Some(Provider::OpenAi)
    } else if model.starts_with("claude") {
        Some(Provider::Anthropic)
    } else if model.starts_with("gemini") {
        Some(Provider::Google)
    } else if model.starts_with("grok") {
        Some(Provider::XAi)
    } else {
        None
    }
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Research Assistant API is running",
    })
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub sessions: usize,
    /// Providers whose API key is not currently set.
    pub missing_credentials: Vec<Provider>,
}

/// Health check endpoint.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        sessions: state.session_count().await,
        missing_credentials: state.config.llm.providers_missing_keys(),
    })
}

/// Agent as submitted to `/run-workflow`.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub name: String,
    pub model: String,
    pub role: String,
    #[serde(default)]
    pub instructions: String,
    #[serde(default)]
    pub provider: Option<String>,
}

impl AgentConfig {
    pub fn to_descriptor(&self) -> Result<AgentDescriptor, ConfigError> {
        let (provider, model) = provider_and_model(self.provider.as_deref(), &self.model)?;
        AgentDescriptor::new(
            self.id,
            self.name.clone(),
            Role::from(self.role.as_str()),
            provider,
            model,
            self.instructions.clone(),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    pub agents: Vec<AgentConfig>,
    pub workflow: Vec<AgentId>,
    pub topic: String,
    #[serde(default)]
    pub mode: WorkflowMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepSummary {
    pub agent_id: AgentId,
    pub agent_name: String,
    pub role: Role,
    pub model: String,
    pub output_preview: String,
}

impl From<&StepRecord> for StepSummary {
    fn from(record: &StepRecord) -> Self {
        Self {
            agent_id: record.agent_id,
            agent_name: record.agent_name.clone(),
            role: record.role.clone(),
            model: record.model.clone(),
            output_preview: record.output_preview.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub result: String,
    pub steps: Vec<StepSummary>,
}

/// Run a workflow over a topic and return the final document.
pub async fn run_workflow(
    State(state): State<Arc<AppState>>,
    Json(request): Json<WorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let topic = request.topic.trim();
    if topic.is_empty() {
        return Err(ConfigError::EmptyTopic.into());
    }
    if request.workflow.is_empty() {
        return Err(ConfigError::EmptyWorkflow.into());
    }

    let descriptors = request
        .agents
        .iter()
        .map(AgentConfig::to_descriptor)
        .collect::<Result<Vec<_>, _>>()?;

    // Unknown ids get no text here; the chain builder reports them.
    let steps: Vec<WorkflowStep> = request
        .workflow
        .iter()
        .map(|id| {
            let text = descriptors
                .iter()
                .find(|d| d.id == *id)
                .map(|d| step_text_for(&d.role, topic))
                .unwrap_or_default();
            WorkflowStep::new(*id, text)
        })
        .collect();

    info!(
        topic = %topic,
        agents = descriptors.len(),
        steps = steps.len(),
        mode = ?request.mode,
        "Running workflow"
    );

    let result = state
        .run_pipeline(&descriptors, &steps, topic, request.mode, PipelineExecutor::new())
        .await?;

    let summaries: Vec<StepSummary> = result
        .steps
        .iter()
        .filter(|s| s.status == TaskStatus::Completed)
        .map(StepSummary::from)
        .collect();

    if let Some(failed) = result.failed_step() {
        let detail = format!(
            "Step {} ({}) failed: {}",
            failed.index,
            failed.agent_name,
            failed.error.as_deref().unwrap_or("unknown error")
        );
        error!(step = failed.index, agent = %failed.agent_name, "Workflow failed");
        return Err(ApiError::Upstream {
            detail,
            steps: summaries,
        });
    }

    Ok(Json(WorkflowResponse {
        result: result.result,
        steps: summaries,
    }))
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub state: RunState,
}

async fn find_session(state: &AppState, id: Uuid) -> Result<SharedSession, ApiError> {
    state
        .session(&id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("Session {id} not found")))
}

fn rejection(effects: &[Effect]) -> Option<String> {
    effects.iter().find_map(|e| match e {
        Effect::Rejected(reason) => Some(reason.clone()),
        _ => None,
    })
}

pub async fn create_session(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let (id, session) = state
        .create_session()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    let snapshot = session.lock().await.clone();
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            id,
            state: snapshot,
        }),
    ))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = find_session(&state, id).await?;
    let snapshot = session.lock().await.clone();
    Ok(Json(SessionResponse {
        id,
        state: snapshot,
    }))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.remove_session(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Session {id} not found")))
    }
}

/// Apply one user action to a session.
pub async fn session_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(action): Json<UserAction>,
) -> Result<Json<SessionResponse>, ApiError> {
    let session = find_session(&state, id).await?;
    let (snapshot, effects) = update_session(&session, SessionEvent::Action(action)).await;
    if let Some(reason) = rejection(&effects) {
        warn!(session = %id, reason = %reason, "Session action rejected");
        return Err(ApiError::BadRequest(reason));
    }
    Ok(Json(SessionResponse {
        id,
        state: snapshot,
    }))
}

/// Start the session's workflow in the background.
pub async fn run_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session = find_session(&state, id).await?;
    let (snapshot, effects) = update_session(&session, SessionEvent::RunRequested).await;
    if let Some(reason) = rejection(&effects) {
        return Err(ApiError::BadRequest(reason));
    }

    for effect in effects {
        if let Effect::StartRun {
            agents,
            steps,
            seed,
            mode,
        } = effect
        {
            info!(session = %id, steps = steps.len(), ?mode, "Starting session run");
            tokio::spawn(drive_session_run(
                state.clone(),
                session.clone(),
                agents,
                steps,
                seed,
                mode,
            ));
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SessionResponse {
            id,
            state: snapshot,
        }),
    ))
}

/// Run a pipeline for a session, feeding progress into its debug log.
///
/// The pipeline runs in its own task so that a panic still ends the run.
pub(crate) async fn drive_session_run(
    state: Arc<AppState>,
    session: SharedSession,
    agents: Vec<AgentDescriptor>,
    steps: Vec<WorkflowStep>,
    seed: String,
    mode: WorkflowMode,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let forwarder = {
        let session = session.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                update_session(&session, SessionEvent::RunProgress(event)).await;
            }
        })
    };

    let pipeline = tokio::spawn(async move {
        state
            .run_pipeline(&agents, &steps, &seed, mode, PipelineExecutor::with_events(tx))
            .await
    });
    let outcome = match pipeline.await {
        Ok(outcome) => outcome.map_err(|e| e.to_string()),
        Err(e) => Err(format!("pipeline task aborted: {e}")),
    };

    // The executor and its sender are gone; drain what is left.
    if let Err(e) = forwarder.await {
        error!(error = %e, "Progress forwarder failed");
    }

    let event = match outcome {
        Ok(result) => SessionEvent::RunFinished(result),
        Err(e) => {
            error!(error = %e, "Session run failed");
            SessionEvent::RunFailed(e)
        }
    };
    update_session(&session, event).await;
}
