//! Application state for the API server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use scriptorium_agents::{
    AgentDescriptor, AgentResolver, PipelineExecutor, ToolSet, WorkflowResult, WorkflowStep,
    build_chain, build_fanout,
};
use scriptorium_common::{Result, WorkflowMode};
use scriptorium_llm::{ClientFactory, HttpClientFactory};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::session::{Effect, RunState, SessionEvent, apply};

/// One session, exclusively locked while an event is applied.
pub type SharedSession = Arc<Mutex<RunState>>;

struct SessionSlot {
    session: SharedSession,
    last_touched: Instant,
}

impl SessionSlot {
    /// Idle past `ttl` and not in the middle of a run.
    fn is_expired(&self, ttl: Duration) -> bool {
        if self.last_touched.elapsed() < ttl {
            return false;
        }
        match self.session.try_lock() {
            Ok(state) => !state.running,
            Err(_) => false,
        }
    }
}

/// Every live session is in use and none has gone idle.
#[derive(Debug, thiserror::Error)]
#[error("Session limit of {0} reached; delete an unused session or try again later")]
pub struct SessionLimitReached(pub usize);

/// Shared application state for the API server.
pub struct AppState {
    pub config: AppConfig,
    pub resolver: AgentResolver,
    sessions: RwLock<HashMap<Uuid, SessionSlot>>,
    /// Server start time (for health checks)
    pub start_time: std::time::Instant,
}

impl AppState {
    /// State backed by real provider clients and search tools.
    pub fn new(config: AppConfig) -> Self {
        let factory = Arc::new(HttpClientFactory::new(config.llm.clone()));
        let tools = ToolSet::from_config(&config.tools);
        Self::with_factory(config, factory, tools)
    }

    /// State with a caller-supplied client factory and tool set.
    pub fn with_factory(config: AppConfig, factory: Arc<dyn ClientFactory>, tools: ToolSet) -> Self {
        let resolver = AgentResolver::new(factory, tools)
            .with_sampling(config.llm.temperature, config.llm.max_tokens);
        Self {
            config,
            resolver,
            sessions: RwLock::new(HashMap::new()),
            start_time: std::time::Instant::now(),
        }
    }

    /// Get the uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Resolve `agents`, chain `steps` over `seed` and run the result.
    ///
    /// Parallel runs use fan-out tasks so that no task waits on another.
    pub async fn run_pipeline(
        &self,
        agents: &[AgentDescriptor],
        steps: &[WorkflowStep],
        seed: &str,
        mode: WorkflowMode,
        executor: PipelineExecutor,
    ) -> Result<WorkflowResult> {
        let roster = self.resolver.resolve_roster(agents)?;
        let tasks = match mode {
            WorkflowMode::Sequential => build_chain(steps, &roster, seed)?,
            WorkflowMode::Parallel => build_fanout(steps, &roster, seed)?,
        };
        debug!(tasks = tasks.len(), ?mode, "Built task chain");
        executor.run(&tasks, mode).await
    }

    fn idle_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session.idle_ttl_secs)
    }

    /// Create a session, first dropping any that have gone idle.
    pub async fn create_session(
        &self,
    ) -> std::result::Result<(Uuid, SharedSession), SessionLimitReached> {
        let ttl = self.idle_ttl();
        let max_sessions = self.config.session.max_sessions;
        let mut sessions = self.sessions.write().await;

        let before = sessions.len();
        sessions.retain(|_, slot| !slot.is_expired(ttl));
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Expired idle sessions");
        }

        if sessions.len() >= max_sessions {
            warn!(max_sessions, "Session limit reached");
            return Err(SessionLimitReached(max_sessions));
        }

        let id = Uuid::new_v4();
        let session = Arc::new(Mutex::new(RunState::starter(self.config.session.clone())));
        sessions.insert(
            id,
            SessionSlot {
                session: session.clone(),
                last_touched: Instant::now(),
            },
        );
        info!(session = %id, "Session created");
        Ok((id, session))
    }

    /// Look up a session and mark it as used. Expired sessions are dropped.
    pub async fn session(&self, id: &Uuid) -> Option<SharedSession> {
        let ttl = self.idle_ttl();
        let mut sessions = self.sessions.write().await;
        let slot = sessions.get_mut(id)?;
        if slot.is_expired(ttl) {
            sessions.remove(id);
            info!(session = %id, "Session expired");
            return None;
        }
        slot.last_touched = Instant::now();
        Some(slot.session.clone())
    }

    pub async fn remove_session(&self, id: &Uuid) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            info!(session = %id, "Session removed");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

/// Apply `event` under the session lock and return the new snapshot.
pub async fn update_session(session: &Mutex<RunState>, event: SessionEvent) -> (RunState, Vec<Effect>) {
    let mut guard = session.lock().await;
    let (next, effects) = apply(guard.clone(), event);
    *guard = next.clone();
    (next, effects)
}
