//! Agent state threaded through the reasoning graph
//!
//! One `AgentState` value is the complete working memory for a single
//! conversation turn. State is immutable: every mutation goes through
//! [`AgentState::apply`], which returns a fresh value, extends the
//! visited-node audit trail, and bumps the iteration counter. The executor
//! relies on those two fields never drifting apart, so nodes must produce
//! their result through exactly one `apply` call per step.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sdk::capability::CapabilityResponse;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Maximum number of extracted entities kept on a state
pub const MAX_ENTITIES: usize = 20;

/// Default iteration cap for single-shot turns
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Iteration cap for plan-mode turns, which need extra capability steps
pub const PLAN_MODE_MAX_ITERATIONS: u32 = 10;

/// Role of a conversation message
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,

    /// Assistant message
    Assistant,

    /// System message
    System,
}

/// One entry in the conversation history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// Who produced the message
    pub role: Role,

    /// Message text
    pub content: String,

    /// When the message was recorded
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a user message stamped with the current time
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Create an assistant message stamped with the current time
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Multi-step plan, present only while a plan-mode turn is executing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Plan {
    /// What the plan is trying to achieve
    pub goal: String,

    /// Ordered step descriptions
    pub steps: Vec<String>,

    /// Index of the step about to run; never exceeds `steps.len()`
    pub current_step: usize,
}

impl Plan {
    /// Create a plan positioned at its first step
    pub fn new(goal: impl Into<String>, steps: Vec<String>) -> Self {
        Self {
            goal: goal.into(),
            steps,
            current_step: 0,
        }
    }

    /// Returns true once every step has been consumed
    pub fn is_exhausted(&self) -> bool {
        self.current_step >= self.steps.len()
    }
}

/// Classified user intent
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Drive the UI directly (tap, scroll, type, navigate)
    DeviceControl,

    /// Calendar lookup or event creation
    Calendar,

    /// Contact lookup
    Contacts,

    /// Compose or read messages
    Messaging,

    /// Answer a question from screen context or general knowledge
    Question,

    /// Conversational filler with no actionable request
    SmallTalk,
}

impl FromStr for Intent {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "device_control" => Ok(Self::DeviceControl),
            "calendar" => Ok(Self::Calendar),
            "contacts" => Ok(Self::Contacts),
            "messaging" => Ok(Self::Messaging),
            "question" => Ok(Self::Question),
            "small_talk" => Ok(Self::SmallTalk),
            _ => Err(()),
        }
    }
}

/// Terminal device action handed back to the host for execution
///
/// The action vocabulary matches what the host accessibility layer accepts.
/// Serialized with an `"action"` tag so a grammar-constrained completion can
/// produce it directly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum DeviceAction {
    /// Tap the element whose text matches `target`
    Tap { target: String },

    /// Scroll the active view ("up" or "down")
    Scroll { direction: String },

    /// Type text into the focused element
    Type { text: String },

    /// Navigate back
    Back,

    /// Go to the home screen
    Home,

    /// Do nothing this step
    Wait,

    /// No action is appropriate
    None,
}

/// Immutable working memory for one conversation turn
///
/// Created empty (or loaded from the session store), threaded through every
/// graph node, and persisted once the turn completes. All fields carry serde
/// defaults so records written by older engine builds still load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Conversation this state belongs to
    pub conversation_id: String,

    /// Raw user query for the current turn
    #[serde(default)]
    pub user_query: String,

    /// Opaque screen / environment context supplied by the host
    #[serde(default)]
    pub screen_context: String,

    /// Conversation history, append-only across turns, bounded by the store
    #[serde(default)]
    pub history: Vec<ChatMessage>,

    /// Plan being executed, if this is a plan-mode turn
    #[serde(default)]
    pub plan: Option<Plan>,

    /// Name of the node about to run or that just ran
    #[serde(default)]
    pub current_node: String,

    /// Classified intent, once classification has run
    #[serde(default)]
    pub intent: Option<Intent>,

    /// Classifier confidence in [0, 1]
    #[serde(default)]
    pub confidence: f32,

    /// Extracted entities, capped at [`MAX_ENTITIES`]
    #[serde(default)]
    pub entities: HashMap<String, String>,

    /// Capability chosen for this turn
    #[serde(default)]
    pub selected_capability: Option<String>,

    /// Input assembled for the selected capability
    #[serde(default)]
    pub capability_input: HashMap<String, serde_json::Value>,

    /// Results of capability invocations, in execution order
    #[serde(default)]
    pub capability_results: Vec<CapabilityResponse>,

    /// Response text to show the user
    #[serde(default)]
    pub response: String,

    /// Device action to hand back to the host, if any
    #[serde(default)]
    pub final_action: Option<DeviceAction>,

    /// The turn is paused waiting on user input (permission, confirmation)
    #[serde(default)]
    pub needs_user_input: bool,

    /// Terminal flag: no further transitions happen once set
    #[serde(default)]
    pub is_complete: bool,

    /// Fatal error for this turn; implies `is_complete`
    #[serde(default)]
    pub error: Option<String>,

    /// Audit trail: one node name appended per graph step
    #[serde(default)]
    pub visited: Vec<String>,

    /// Number of graph steps taken this invocation
    #[serde(default)]
    pub iteration: u32,

    /// Iteration cap for this invocation
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl AgentState {
    /// Create an empty state for a conversation
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            user_query: String::new(),
            screen_context: String::new(),
            history: Vec::new(),
            plan: None,
            current_node: String::new(),
            intent: None,
            confidence: 0.0,
            entities: HashMap::new(),
            selected_capability: None,
            capability_input: HashMap::new(),
            capability_results: Vec::new(),
            response: String::new(),
            final_action: None,
            needs_user_input: false,
            is_complete: false,
            error: None,
            visited: Vec::new(),
            iteration: 0,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Reset per-turn fields for a new invocation, keeping the history
    ///
    /// The previous turn's classification, capability results, audit trail,
    /// and error are all cleared; only the conversation identity and history
    /// survive across turns.
    pub fn begin_turn(
        &self,
        user_query: impl Into<String>,
        screen_context: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        Self {
            conversation_id: self.conversation_id.clone(),
            user_query: user_query.into(),
            screen_context: screen_context.into(),
            history: self.history.clone(),
            plan: None,
            current_node: String::new(),
            intent: None,
            confidence: 0.0,
            entities: HashMap::new(),
            selected_capability: None,
            capability_input: HashMap::new(),
            capability_results: Vec::new(),
            response: String::new(),
            final_action: None,
            needs_user_input: false,
            is_complete: false,
            error: None,
            visited: Vec::new(),
            iteration: 0,
            max_iterations,
        }
    }

    /// Apply an update, producing the next state
    ///
    /// Every call extends the audit trail with the node that just ran
    /// (the current `current_node`) and bumps the iteration counter by one,
    /// even when the update changes nothing else. Setting an error forces
    /// the completion flag.
    pub fn apply(&self, update: StateUpdate) -> Self {
        let mut next = self.clone();

        next.visited.push(self.current_node.clone());
        next.iteration += 1;

        if let Some(plan) = update.plan {
            next.plan = plan;
        }
        if let Some(node) = update.current_node {
            next.current_node = node;
        }
        if let Some(intent) = update.intent {
            next.intent = Some(intent);
        }
        if let Some(confidence) = update.confidence {
            next.confidence = confidence.clamp(0.0, 1.0);
        }
        if let Some(entities) = update.entities {
            next.entities = cap_entities(entities);
        }
        if let Some(capability) = update.selected_capability {
            next.selected_capability = capability;
        }
        if let Some(input) = update.capability_input {
            next.capability_input = input;
        }
        for result in update.capability_results {
            next.capability_results.push(result);
        }
        if let Some(response) = update.response {
            next.response = response;
        }
        if let Some(action) = update.final_action {
            next.final_action = action;
        }
        if let Some(needs_input) = update.needs_user_input {
            next.needs_user_input = needs_input;
        }
        if let Some(complete) = update.is_complete {
            next.is_complete = complete;
        }
        if let Some(error) = update.error {
            next.error = Some(error);
            next.is_complete = true;
        }

        next
    }

    /// Mark this state as fatally halted, outside the audited update path
    ///
    /// Used by the executor for halts that do not correspond to a completed
    /// graph step (routing failures, node faults, the iteration bound), so
    /// the audit trail stays in lockstep with the iteration counter.
    pub fn halted(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self.is_complete = true;
        self
    }

    /// True iff a fatal error has been recorded
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Sole admission test for the executor's main loop
    pub fn should_continue(&self) -> bool {
        !self.is_complete && self.iteration < self.max_iterations && !self.has_error()
    }
}

/// Cap an entity map at [`MAX_ENTITIES`], keeping the smallest keys
///
/// Sorted-key selection keeps truncation deterministic so a resumed run
/// sees the same state a fresh run would.
fn cap_entities(entities: HashMap<String, String>) -> HashMap<String, String> {
    if entities.len() <= MAX_ENTITIES {
        return entities;
    }

    warn!(
        count = entities.len(),
        cap = MAX_ENTITIES,
        "entity map over cap, truncating"
    );

    let mut keys: Vec<&String> = entities.keys().collect();
    keys.sort();
    let keep: Vec<String> = keys.into_iter().take(MAX_ENTITIES).cloned().collect();

    let mut entities = entities;
    entities.retain(|k, _| keep.contains(k));
    entities
}

/// Typed builder for state updates
///
/// Replaces string-keyed field dispatch with per-field setters so an
/// unrecognized field is a compile error instead of a silent no-op.
#[derive(Debug, Default)]
pub struct StateUpdate {
    plan: Option<Option<Plan>>,
    current_node: Option<String>,
    intent: Option<Intent>,
    confidence: Option<f32>,
    entities: Option<HashMap<String, String>>,
    selected_capability: Option<Option<String>>,
    capability_input: Option<HashMap<String, serde_json::Value>>,
    capability_results: Vec<CapabilityResponse>,
    response: Option<String>,
    final_action: Option<Option<DeviceAction>>,
    needs_user_input: Option<bool>,
    is_complete: Option<bool>,
    error: Option<String>,
}

impl StateUpdate {
    /// Create an empty update
    ///
    /// Applying an empty update still advances the audit trail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set or clear the plan
    pub fn plan(mut self, plan: Option<Plan>) -> Self {
        self.plan = Some(plan);
        self
    }

    /// Override the current node name
    pub fn current_node(mut self, node: impl Into<String>) -> Self {
        self.current_node = Some(node.into());
        self
    }

    /// Record the classified intent
    pub fn intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    /// Record classifier confidence (clamped to [0, 1] on apply)
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.confidence = Some(confidence);
        self
    }

    /// Replace the extracted entities
    pub fn entities(mut self, entities: HashMap<String, String>) -> Self {
        self.entities = Some(entities);
        self
    }

    /// Set or clear the selected capability
    pub fn selected_capability(mut self, capability: Option<String>) -> Self {
        self.selected_capability = Some(capability);
        self
    }

    /// Replace the capability input map
    pub fn capability_input(mut self, input: HashMap<String, serde_json::Value>) -> Self {
        self.capability_input = Some(input);
        self
    }

    /// Append a capability result
    pub fn push_capability_result(mut self, result: CapabilityResponse) -> Self {
        self.capability_results.push(result);
        self
    }

    /// Set the response text
    pub fn response(mut self, response: impl Into<String>) -> Self {
        self.response = Some(response.into());
        self
    }

    /// Set or clear the final device action
    pub fn final_action(mut self, action: Option<DeviceAction>) -> Self {
        self.final_action = Some(action);
        self
    }

    /// Flag that the turn is waiting on user input
    pub fn needs_user_input(mut self, needs: bool) -> Self {
        self.needs_user_input = Some(needs);
        self
    }

    /// Mark the turn complete
    pub fn complete(mut self) -> Self {
        self.is_complete = Some(true);
        self
    }

    /// Record a fatal error (forces completion on apply)
    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }
}
