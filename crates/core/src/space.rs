use crate::ids::SpaceId;
use crate::message::Message;

/// An independent conversation thread bound to one model and an optional
/// system prompt.
///
/// State only changes through [`crate::SpaceRegistry`] and the dispatch
/// engine; readers get shared references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    id: SpaceId,
    messages: Vec<Message>,
    loading: bool,
    error: Option<String>,
    selected_model: String,
    system_prompt: String,
    // Bumped by `clear` so in-flight settlements can tell the history they
    // were issued against is gone.
    generation: u64,
    // Calls issued in the current generation that have not settled yet.
    pending: usize,
}

impl Space {
    pub(crate) fn new(id: SpaceId, selected_model: impl Into<String>) -> Self {
        Self {
            id,
            messages: Vec::new(),
            loading: false,
            error: None,
            selected_model: selected_model.into(),
            system_prompt: String::new(),
            generation: 0,
            pending: 0,
        }
    }

    pub fn id(&self) -> SpaceId {
        self.id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn has_history(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_selected_model(&mut self, model_id: String) {
        self.selected_model = model_id;
    }

    pub(crate) fn set_system_prompt(&mut self, text: String) {
        self.system_prompt = text;
    }

    /// Starts a submission: appends the user turn, marks loading, drops any
    /// sticky error from the previous attempt.
    pub(crate) fn begin_submission(&mut self, message: Message) {
        self.messages.push(message);
        self.loading = true;
        self.error = None;
        self.pending += 1;
    }

    pub(crate) fn settle_success(&mut self, message: Message) {
        self.messages.push(message);
        self.loading = false;
        self.error = None;
        self.pending = self.pending.saturating_sub(1);
    }

    pub(crate) fn settle_failure(&mut self, reason: String) {
        self.loading = false;
        self.error = Some(reason);
        self.pending = self.pending.saturating_sub(1);
    }

    /// A call from before the last `clear` settled. Only drops `loading` when
    /// nothing issued since the clear is still in flight.
    pub(crate) fn settle_discarded(&mut self) {
        if self.pending == 0 {
            self.loading = false;
        }
    }

    /// Older calls stop counting as pending; they settle as discarded.
    pub(crate) fn clear(&mut self) {
        self.messages.clear();
        self.error = None;
        self.generation = self.generation.wrapping_add(1);
        self.pending = 0;
    }
}
