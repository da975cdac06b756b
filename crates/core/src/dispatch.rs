use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;
use lloom_llm::{CompletionRequest, Transport};
use tokio::task::JoinHandle;

use crate::ids::SpaceId;
use crate::registry::{SharedRegistry, SubmissionSnapshot};

/// One outbound call, fixed at submission time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchRequest {
    pub space_id: SpaceId,
    pub model_id: String,
    pub effective_system_prompt: Option<String>,
    pub(crate) generation: u64,
}

impl DispatchRequest {
    pub(crate) fn from_snapshot(
        snapshot: SubmissionSnapshot,
        global_system_prompt: Option<&str>,
    ) -> Self {
        Self {
            space_id: snapshot.space_id,
            effective_system_prompt: resolve_system_prompt(
                &snapshot.system_prompt,
                global_system_prompt,
            ),
            model_id: snapshot.selected_model,
            generation: snapshot.generation,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Success { content: String, model_id: String },
    Failure { reason: String },
}

impl DispatchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Result of one branch after it settled and was reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub space_id: SpaceId,
    pub outcome: DispatchOutcome,
    /// False when the space was removed or cleared while the call was in flight.
    pub applied: bool,
}

/// Per-space override wins when it has visible text, otherwise the global
/// prompt; blank on both sides means no system prompt at all.
pub fn resolve_system_prompt(space_prompt: &str, global_system_prompt: Option<&str>) -> Option<String> {
    if !space_prompt.trim().is_empty() {
        return Some(space_prompt.to_string());
    }

    global_system_prompt
        .filter(|prompt| !prompt.trim().is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, Copy)]
enum Scope {
    Every,
    Single(SpaceId),
}

/// Fans one user message out to spaces and folds each reply back into the
/// space that asked for it.
///
/// Every branch runs on its own task and reconciles itself when its call
/// settles, so one slow or failing model never holds up or poisons another.
#[derive(Clone)]
pub struct DispatchEngine {
    registry: SharedRegistry,
    transport: Arc<dyn Transport>,
}

impl DispatchEngine {
    pub fn new(registry: SharedRegistry, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    /// Sends `content` to every current space.
    ///
    /// User turns are appended and loading flags raised before this returns.
    /// Must be called from within a Tokio runtime.
    pub fn broadcast(&self, content: &str, global_system_prompt: Option<&str>) -> DispatchBatch {
        self.dispatch(Scope::Every, content, global_system_prompt)
    }

    /// Sends `content` to a single space; unknown ids are a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn dispatch_to_one(
        &self,
        space_id: SpaceId,
        content: &str,
        global_system_prompt: Option<&str>,
    ) -> DispatchBatch {
        self.dispatch(Scope::Single(space_id), content, global_system_prompt)
    }

    fn dispatch(
        &self,
        scope: Scope,
        content: &str,
        global_system_prompt: Option<&str>,
    ) -> DispatchBatch {
        let content = content.trim();
        if content.is_empty() {
            tracing::debug!(?scope, "ignoring blank submission");
            return DispatchBatch::default();
        }

        let requests = {
            let mut registry = self.registry.lock();
            let targets = match scope {
                Scope::Every => registry.ids(),
                Scope::Single(space_id) => vec![space_id],
            };

            targets
                .into_iter()
                .filter_map(|space_id| registry.begin_submission(space_id, content))
                .map(|snapshot| DispatchRequest::from_snapshot(snapshot, global_system_prompt))
                .collect::<Vec<_>>()
        };

        if requests.is_empty() {
            tracing::debug!(?scope, "no spaces to dispatch to");
            return DispatchBatch::default();
        }

        tracing::debug!(
            ?scope,
            branch_count = requests.len(),
            content_len = content.len(),
            "dispatching submission"
        );

        let mut batch = DispatchBatch::default();
        for request in requests {
            batch.targets.push(request.space_id);
            batch
                .branches
                .push(self.spawn_branch(content.to_string(), request));
        }
        batch
    }

    fn spawn_branch(&self, content: String, request: DispatchRequest) -> JoinHandle<DispatchReport> {
        let registry = Arc::clone(&self.registry);
        let transport = Arc::clone(&self.transport);

        tokio::spawn(async move {
            let completion = CompletionRequest::new(content, request.model_id.clone())
                .with_system_prompt(request.effective_system_prompt.clone());

            let settled = AssertUnwindSafe(async { transport.complete(completion).await })
                .catch_unwind()
                .await;

            let outcome = match settled {
                Ok(Ok(response)) => DispatchOutcome::Success {
                    content: response.content,
                    model_id: response.model_id,
                },
                Ok(Err(error)) => {
                    tracing::warn!(
                        space_id = %request.space_id,
                        model_id = %request.model_id,
                        error = %error,
                        "transport call failed"
                    );
                    DispatchOutcome::Failure {
                        reason: error.to_string(),
                    }
                }
                Err(_) => {
                    tracing::error!(
                        space_id = %request.space_id,
                        model_id = %request.model_id,
                        "transport call panicked"
                    );
                    DispatchOutcome::Failure {
                        reason: format!("transport for '{}' panicked", request.model_id),
                    }
                }
            };

            let applied = registry.lock().settle(&request, &outcome);
            DispatchReport {
                space_id: request.space_id,
                outcome,
                applied,
            }
        })
    }
}

/// Handle over the branches of one submission.
///
/// Dropping it does not cancel anything; each branch still settles and
/// reconciles on its own.
#[derive(Default)]
pub struct DispatchBatch {
    targets: Vec<SpaceId>,
    branches: Vec<JoinHandle<DispatchReport>>,
}

impl DispatchBatch {
    pub fn targets(&self) -> &[SpaceId] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Waits for every branch, in target order, regardless of which fail.
    pub async fn join(self) -> Vec<DispatchReport> {
        join_all(self.branches)
            .await
            .into_iter()
            .filter_map(|joined| match joined {
                Ok(report) => Some(report),
                Err(error) => {
                    tracing::error!(error = %error, "dispatch branch did not complete");
                    None
                }
            })
            .collect()
    }
}
