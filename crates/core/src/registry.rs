use std::sync::Arc;

use lloom_llm::ModelDescriptor;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use crate::dispatch::{DispatchOutcome, DispatchRequest};
use crate::ids::SpaceId;
use crate::message::Message;
use crate::space::Space;

const EVENT_CAPACITY: usize = 256;

/// Change notifications for observers of the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpaceEvent {
    ModelsLoaded,
    Created(SpaceId),
    Removed(SpaceId),
    Cleared(SpaceId),
    /// Model or system prompt changed.
    Updated(SpaceId),
    /// A user turn was appended and the space is now waiting on its model.
    Submitted(SpaceId),
    /// A model reply or failure was folded into the space.
    Settled(SpaceId),
}

/// Shared handle used by the dispatch engine and front ends.
///
/// The lock is only ever held for synchronous sections, never across an await.
pub type SharedRegistry = Arc<Mutex<SpaceRegistry>>;

/// Snapshot of one space taken when a submission starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SubmissionSnapshot {
    pub space_id: SpaceId,
    pub generation: u64,
    pub selected_model: String,
    pub system_prompt: String,
}

/// Ordered set of chat spaces plus the model descriptors they may use.
///
/// Every operation addressed to an unknown space id is a silent no-op: callers
/// routinely act on snapshots that went stale while an async event was queued.
pub struct SpaceRegistry {
    spaces: Vec<Space>,
    models: Vec<ModelDescriptor>,
    events: broadcast::Sender<SpaceEvent>,
}

impl Default for SpaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SpaceRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            spaces: Vec::new(),
            models: Vec::new(),
            events,
        }
    }

    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpaceEvent> {
        self.events.subscribe()
    }

    /// Replaces the available descriptors.
    ///
    /// The first non-empty list arriving while the registry has no spaces
    /// bootstraps one space; its id is returned.
    pub fn set_models(&mut self, models: Vec<ModelDescriptor>) -> Option<SpaceId> {
        self.models = models;
        self.emit(SpaceEvent::ModelsLoaded);

        if self.spaces.is_empty() {
            return self.create();
        }
        None
    }

    pub fn models(&self) -> &[ModelDescriptor] {
        &self.models
    }

    pub fn model_name(&self, model_id: &str) -> Option<&str> {
        self.models
            .iter()
            .find(|model| model.id == model_id)
            .map(|model| model.name.as_str())
    }

    /// Appends a new space bound to the first available model.
    ///
    /// Returns `None` without touching state when no descriptors are loaded.
    pub fn create(&mut self) -> Option<SpaceId> {
        let Some(default_model) = self.models.first() else {
            tracing::debug!("ignoring space creation because no models are available");
            return None;
        };

        let id = SpaceId::new_v7();
        self.spaces.push(Space::new(id, default_model.id.clone()));
        tracing::debug!(space_id = %id, model_id = %default_model.id, "created space");
        self.emit(SpaceEvent::Created(id));
        Some(id)
    }

    pub fn remove(&mut self, id: SpaceId) {
        let before = self.spaces.len();
        self.spaces.retain(|space| space.id() != id);
        if self.spaces.len() != before {
            tracing::debug!(space_id = %id, "removed space");
            self.emit(SpaceEvent::Removed(id));
        }
    }

    /// Wipes history and error. Loading state, model and prompt survive.
    pub fn clear(&mut self, id: SpaceId) {
        if let Some(space) = self.find_mut(id) {
            space.clear();
            self.emit(SpaceEvent::Cleared(id));
        }
    }

    /// Overwrites the selected model without checking it against the loaded
    /// descriptors; eligibility rules belong to the caller.
    pub fn set_model(&mut self, id: SpaceId, model_id: impl Into<String>) {
        if let Some(space) = self.find_mut(id) {
            space.set_selected_model(model_id.into());
            self.emit(SpaceEvent::Updated(id));
        }
    }

    /// Overwrites the per-space prompt. An empty string means "no override".
    pub fn set_system_prompt(&mut self, id: SpaceId, text: impl Into<String>) {
        if let Some(space) = self.find_mut(id) {
            space.set_system_prompt(text.into());
            self.emit(SpaceEvent::Updated(id));
        }
    }

    pub fn get(&self, id: SpaceId) -> Option<&Space> {
        self.spaces.iter().find(|space| space.id() == id)
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    pub fn ids(&self) -> Vec<SpaceId> {
        self.spaces.iter().map(Space::id).collect()
    }

    pub fn position(&self, id: SpaceId) -> Option<usize> {
        self.spaces.iter().position(|space| space.id() == id)
    }

    pub fn id_at(&self, index: usize) -> Option<SpaceId> {
        self.spaces.get(index).map(Space::id)
    }

    pub fn len(&self) -> usize {
        self.spaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spaces.is_empty()
    }

    pub fn any_loading(&self) -> bool {
        self.spaces.iter().any(Space::is_loading)
    }

    pub(crate) fn begin_submission(
        &mut self,
        id: SpaceId,
        content: &str,
    ) -> Option<SubmissionSnapshot> {
        let space = self.find_mut(id)?;
        let snapshot = SubmissionSnapshot {
            space_id: id,
            generation: space.generation(),
            selected_model: space.selected_model().to_string(),
            system_prompt: space.system_prompt().to_string(),
        };
        space.begin_submission(Message::user(content));
        self.emit(SpaceEvent::Submitted(id));
        Some(snapshot)
    }

    /// Folds one settlement into its space. Returns whether the outcome was
    /// recorded; settlements for removed spaces, or for a history wiped by
    /// `clear` since the request was issued, are discarded.
    pub(crate) fn settle(&mut self, request: &DispatchRequest, outcome: &DispatchOutcome) -> bool {
        let Some(space) = self.find_mut(request.space_id) else {
            tracing::debug!(
                space_id = %request.space_id,
                "discarding settlement for a removed space"
            );
            return false;
        };

        if space.generation() != request.generation {
            space.settle_discarded();
            tracing::debug!(
                space_id = %request.space_id,
                still_loading = space.is_loading(),
                "discarding settlement issued before the space was cleared"
            );
            return false;
        }

        match outcome {
            DispatchOutcome::Success { content, model_id } => {
                space.settle_success(Message::assistant(content.clone(), model_id.clone()));
            }
            DispatchOutcome::Failure { reason } => {
                space.settle_failure(reason.clone());
            }
        }
        self.emit(SpaceEvent::Settled(request.space_id));
        true
    }

    fn find_mut(&mut self, id: SpaceId) -> Option<&mut Space> {
        self.spaces.iter_mut().find(|space| space.id() == id)
    }

    fn emit(&self, event: SpaceEvent) {
        // No subscribers is fine; the registry never waits on observers.
        let _ = self.events.send(event);
    }
}
