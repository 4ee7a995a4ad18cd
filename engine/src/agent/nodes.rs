//! Built-in graph nodes
//!
//! The standard three-node turn: classify the request, run the selected
//! capability, compose the reply. Each node only exercises the external
//! contracts (inference, extraction, capability dispatch) and folds the
//! outcome back into the state; none of them holds state of its own across
//! calls.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use async_trait::async_trait;
use sdk::capability::{CapabilityRequest, CapabilityResponse};
use sdk::EngineError;
use serde_json::Value;
use tracing::{debug, warn};

use crate::capability::CapabilityRegistry;
use crate::extract::{extract_structured, Extraction};
use crate::graph::{AgentGraph, GraphBuilder, GraphNode, END};
use crate::inference::{CompletionRequest, InferenceProvider};
use crate::state::{AgentState, DeviceAction, Intent, Plan, StateUpdate};

use super::prompt;

/// Node name: intent classification
pub const CLASSIFY_NODE: &str = "classify_intent";

/// Node name: capability execution
pub const RUN_CAPABILITY_NODE: &str = "run_capability";

/// Node name: response composition
pub const RESPOND_NODE: &str = "respond";

/// Wire the default agent graph
///
/// classify → (run_capability when one was selected) → respond → end.
pub fn build_agent_graph(
    provider: Arc<dyn InferenceProvider>,
    registry: Arc<CapabilityRegistry>,
    grammar: Option<String>,
) -> Result<AgentGraph, EngineError> {
    let catalog = registry.catalog();

    GraphBuilder::new()
        .add_node(Arc::new(ClassifyIntentNode::new(
            Arc::clone(&provider),
            grammar,
            catalog,
        )))
        .add_node(Arc::new(RunCapabilityNode::new(registry)))
        .add_node(Arc::new(RespondNode::new(provider)))
        .add_conditional_edge(CLASSIFY_NODE, |state: &AgentState| {
            if state.selected_capability.is_some() {
                RUN_CAPABILITY_NODE.to_string()
            } else {
                RESPOND_NODE.to_string()
            }
        })
        .add_conditional_edge(RUN_CAPABILITY_NODE, |state: &AgentState| {
            // TODO: decide whether a capability error should skip response
            // composition and surface the failure directly; both branches
            // route to the responder today, and the executor already halts
            // error-carrying states before this edge runs
            if state.has_error() {
                RESPOND_NODE.to_string()
            } else {
                RESPOND_NODE.to_string()
            }
        })
        .add_edge(RESPOND_NODE, END)
        .entry_point(CLASSIFY_NODE)
        .build()
}

/// Classifies the user request into an intent, entities, and an optional
/// capability selection
pub struct ClassifyIntentNode {
    provider: Arc<dyn InferenceProvider>,
    grammar: Option<String>,
    catalog: Vec<(String, String)>,
}

impl ClassifyIntentNode {
    /// Create a classification node
    ///
    /// `grammar` constrains the completion when the inference server
    /// supports it; `catalog` lists the capabilities the model may select.
    pub fn new(
        provider: Arc<dyn InferenceProvider>,
        grammar: Option<String>,
        catalog: Vec<(String, String)>,
    ) -> Self {
        Self {
            provider,
            grammar,
            catalog,
        }
    }

    fn classification_task(&self) -> String {
        let mut task = String::from(
            "Classify the user's request. Respond with JSON:\n\
             {\"intent\": \"...\", \"confidence\": 0.0, \"entities\": {}, \
             \"capability\": \"...\", \"operation\": \"...\", \"params\": {}}\n\
             Intents: device_control, calendar, contacts, messaging, question, small_talk.\n\
             Omit \"capability\" when none applies.",
        );

        if !self.catalog.is_empty() {
            task.push_str("\nAvailable capabilities:");
            for (id, description) in &self.catalog {
                let _ = write!(task, "\n- {id}: {description}");
            }
        }
        task
    }
}

#[async_trait]
impl GraphNode for ClassifyIntentNode {
    fn name(&self) -> &str {
        CLASSIFY_NODE
    }

    async fn run(&self, state: AgentState) -> Result<AgentState, EngineError> {
        let task = self.classification_task();
        let rendered = prompt::build_prompt(Some(&task), &state.screen_context, &state.user_query);

        let mut request = CompletionRequest::new(rendered);
        if let Some(grammar) = &self.grammar {
            request = request.with_grammar(grammar.clone());
        }

        let completion = self.provider.complete(&request).await?;

        let update = match extract_structured(&completion) {
            Extraction::ObjectFound(value, strategy) => {
                debug!(strategy = %strategy, "classification parsed");
                classification_update(&value)
            }
            Extraction::ArrayFound(_, _) | Extraction::NotFound(_) => {
                // Extraction failure is not fatal: treat the turn as
                // conversational and let the responder handle it
                warn!("classification output had no usable structure");
                StateUpdate::new().intent(Intent::SmallTalk).confidence(0.0)
            }
        };

        Ok(state.apply(update))
    }
}

/// Build a state update from a parsed classification object
fn classification_update(value: &Value) -> StateUpdate {
    let mut update = StateUpdate::new();

    match value.get("intent").and_then(Value::as_str) {
        Some(raw) => match raw.parse::<Intent>() {
            Ok(intent) => update = update.intent(intent),
            Err(()) => warn!(intent = raw, "unrecognized intent label"),
        },
        None => warn!("classification output missing intent"),
    }

    if let Some(confidence) = value.get("confidence").and_then(Value::as_f64) {
        update = update.confidence(confidence as f32);
    }

    if let Some(entities) = value.get("entities").and_then(Value::as_object) {
        let entities: HashMap<String, String> = entities
            .iter()
            .map(|(k, v)| {
                let text = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                (k.clone(), text)
            })
            .collect();
        update = update.entities(entities);
    }

    if let Some(capability) = value.get("capability").and_then(Value::as_str) {
        let operation = value
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or("run");
        update = update.selected_capability(Some(format!("{capability}.{operation}")));

        if let Some(params) = value.get("params").and_then(Value::as_object) {
            let input: HashMap<String, Value> =
                params.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            update = update.capability_input(input);
        }
    }

    if let Some(plan) = value.get("plan").and_then(Value::as_object) {
        let goal = plan
            .get("goal")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let steps: Vec<String> = plan
            .get("steps")
            .and_then(Value::as_array)
            .map(|steps| {
                steps
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !steps.is_empty() {
            update = update.plan(Some(Plan::new(goal, steps)));
        }
    }

    update
}

/// Dispatches the selected capability and folds the result into the state
pub struct RunCapabilityNode {
    registry: Arc<CapabilityRegistry>,
}

impl RunCapabilityNode {
    /// Create a capability execution node
    pub fn new(registry: Arc<CapabilityRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl GraphNode for RunCapabilityNode {
    fn name(&self) -> &str {
        RUN_CAPABILITY_NODE
    }

    async fn run(&self, state: AgentState) -> Result<AgentState, EngineError> {
        let Some(selected) = state.selected_capability.clone() else {
            // Nothing selected; the step still counts against the audit trail
            return Ok(state.apply(StateUpdate::new()));
        };

        let (capability_id, operation_id) = selected
            .split_once('.')
            .unwrap_or((selected.as_str(), "run"));

        let request = CapabilityRequest {
            capability_id: capability_id.to_string(),
            operation_id: operation_id.to_string(),
            params: state.capability_input.clone(),
        };

        let response = self.registry.dispatch(request).await;
        let needs_input = matches!(
            response,
            CapabilityResponse::PermissionNeeded { .. }
                | CapabilityResponse::ConfirmationNeeded { .. }
        );

        let mut update = StateUpdate::new().push_capability_result(response);
        if needs_input {
            update = update.needs_user_input(true);
        }

        // Advance the plan cursor when a plan is driving this turn
        if let Some(plan) = &state.plan {
            let mut plan = plan.clone();
            if !plan.is_exhausted() {
                plan.current_step += 1;
            }
            update = update.plan(Some(plan));
        }

        Ok(state.apply(update))
    }
}

/// Composes the user-facing reply and optional device action
pub struct RespondNode {
    provider: Arc<dyn InferenceProvider>,
}

impl RespondNode {
    /// Create a response composition node
    pub fn new(provider: Arc<dyn InferenceProvider>) -> Self {
        Self { provider }
    }

    fn respond_task(state: &AgentState) -> String {
        let mut task = String::from(
            "Compose the final reply. Respond with JSON:\n\
             {\"response\": \"...\", \"action\": \"none\"}\n\
             Use an action object like {\"action\": \"tap\", \"target\": \"OK\"} \
             only when a device action should run.",
        );

        if let Some(intent) = state.intent {
            let _ = write!(task, "\nClassified intent: {intent:?}");
        }
        if !state.capability_results.is_empty() {
            task.push_str("\nCapability results:");
            for result in &state.capability_results {
                match serde_json::to_string(result) {
                    Ok(json) => {
                        let _ = write!(task, "\n{json}");
                    }
                    Err(e) => warn!(error = %e, "capability result not serializable"),
                }
            }
        }
        task
    }
}

#[async_trait]
impl GraphNode for RespondNode {
    fn name(&self) -> &str {
        RESPOND_NODE
    }

    async fn run(&self, state: AgentState) -> Result<AgentState, EngineError> {
        let task = Self::respond_task(&state);
        let rendered = prompt::build_prompt(Some(&task), &state.screen_context, &state.user_query);
        let completion = self
            .provider
            .complete(&CompletionRequest::new(rendered))
            .await?;

        let update = match extract_structured(&completion) {
            Extraction::ObjectFound(value, _) => {
                let response = value
                    .get("response")
                    .and_then(Value::as_str)
                    .unwrap_or_else(|| completion.trim())
                    .to_string();
                // The action rides on the same object; absent or malformed
                // action fields mean no device action this turn
                let action = value
                    .get("action")
                    .and_then(|_| serde_json::from_value::<DeviceAction>(value.clone()).ok())
                    .filter(|action| *action != DeviceAction::None);
                StateUpdate::new().response(response).final_action(action)
            }
            Extraction::ArrayFound(_, _) | Extraction::NotFound(_) => {
                // Plain text is an acceptable reply; no action can be taken
                StateUpdate::new().response(completion.trim()).final_action(None)
            }
        };

        Ok(state.apply(update))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::ScriptedProvider;
    use crate::state::DEFAULT_MAX_ITERATIONS;
    use sdk::capability::Capability;

    struct StubCalendar;

    #[async_trait]
    impl Capability for StubCalendar {
        fn id(&self) -> &str {
            "calendar"
        }

        fn description(&self) -> &str {
            "Read and create calendar events"
        }

        async fn handle(&self, request: CapabilityRequest) -> CapabilityResponse {
            match request.operation_id.as_str() {
                "list_events" => CapabilityResponse::success(
                    "1 event found",
                    serde_json::json!([{"title": "Standup", "time": "09:30"}]),
                ),
                "create_event" => CapabilityResponse::ConfirmationNeeded {
                    message: "Create this event?".to_string(),
                    pending_action: serde_json::json!({"title": "Dentist"}),
                },
                other => CapabilityResponse::failure(
                    "unknown_operation",
                    format!("calendar has no operation '{other}'"),
                ),
            }
        }
    }

    fn registry_with_calendar() -> Arc<CapabilityRegistry> {
        let mut registry = CapabilityRegistry::empty();
        registry.register(Arc::new(StubCalendar));
        Arc::new(registry)
    }

    fn turn_state(query: &str) -> AgentState {
        AgentState::new("conv-test").begin_turn(query, "Screen: Calendar app", DEFAULT_MAX_ITERATIONS)
    }

    #[tokio::test]
    async fn test_classify_parses_structured_completion() {
        let provider = Arc::new(ScriptedProvider::with_completions([
            r#"{"intent":"calendar","confidence":0.92,"entities":{"range":"tomorrow"},"capability":"calendar","operation":"list_events","params":{"range":"tomorrow"}}"#,
        ]));
        let node = ClassifyIntentNode::new(provider.clone(), None, vec![]);

        let state = node.run(turn_state("what's on tomorrow?")).await.unwrap();

        assert_eq!(state.intent, Some(Intent::Calendar));
        assert!((state.confidence - 0.92).abs() < 1e-6);
        assert_eq!(state.entities.get("range").map(String::as_str), Some("tomorrow"));
        assert_eq!(
            state.selected_capability.as_deref(),
            Some("calendar.list_events")
        );
        assert_eq!(state.iteration, 1);
        assert!(!state.has_error());
    }

    #[tokio::test]
    async fn test_classify_grammar_is_forwarded() {
        let provider = Arc::new(ScriptedProvider::with_completions([r#"{"intent":"question"}"#]));
        let node = ClassifyIntentNode::new(
            provider.clone(),
            Some("root ::= object".to_string()),
            vec![],
        );

        node.run(turn_state("why is the sky blue?")).await.unwrap();

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].grammar.as_deref(), Some("root ::= object"));
    }

    #[tokio::test]
    async fn test_classify_falls_back_on_unparseable_output() {
        let provider = Arc::new(ScriptedProvider::with_completions(["no structure here"]));
        let node = ClassifyIntentNode::new(provider, None, vec![]);

        let state = node.run(turn_state("hello")).await.unwrap();

        assert_eq!(state.intent, Some(Intent::SmallTalk));
        assert_eq!(state.confidence, 0.0);
        assert!(state.selected_capability.is_none());
        assert!(!state.has_error());
    }

    #[tokio::test]
    async fn test_classify_advertises_catalog() {
        let provider = Arc::new(ScriptedProvider::with_completions([r#"{"intent":"question"}"#]));
        let node = ClassifyIntentNode::new(
            provider.clone(),
            None,
            vec![("calendar".to_string(), "Calendar events".to_string())],
        );

        node.run(turn_state("anything today?")).await.unwrap();

        let requests = provider.requests();
        assert!(requests[0].prompt.contains("- calendar: Calendar events"));
    }

    #[tokio::test]
    async fn test_run_capability_without_selection_is_a_plain_step() {
        let node = RunCapabilityNode::new(registry_with_calendar());

        let state = node.run(turn_state("hi")).await.unwrap();

        assert!(state.capability_results.is_empty());
        assert_eq!(state.iteration, 1);
    }

    #[tokio::test]
    async fn test_run_capability_dispatches_and_records_result() {
        let node = RunCapabilityNode::new(registry_with_calendar());
        let mut state = turn_state("what's on tomorrow?");
        state.selected_capability = Some("calendar.list_events".to_string());

        let state = node.run(state).await.unwrap();

        assert_eq!(state.capability_results.len(), 1);
        assert!(state.capability_results[0].is_success());
        assert!(!state.needs_user_input);
    }

    #[tokio::test]
    async fn test_confirmation_needed_pauses_for_user_input() {
        let node = RunCapabilityNode::new(registry_with_calendar());
        let mut state = turn_state("book the dentist");
        state.selected_capability = Some("calendar.create_event".to_string());

        let state = node.run(state).await.unwrap();

        assert!(state.needs_user_input);
        assert!(matches!(
            state.capability_results[0],
            CapabilityResponse::ConfirmationNeeded { .. }
        ));
    }

    #[tokio::test]
    async fn test_respond_extracts_reply_and_action() {
        let provider = Arc::new(ScriptedProvider::with_completions([
            r#"{"response":"Tapping OK now.","action":"tap","target":"OK"}"#,
        ]));
        let node = RespondNode::new(provider);

        let state = node.run(turn_state("press ok")).await.unwrap();

        assert_eq!(state.response, "Tapping OK now.");
        assert_eq!(
            state.final_action,
            Some(DeviceAction::Tap {
                target: "OK".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_respond_accepts_plain_text() {
        let provider = Arc::new(ScriptedProvider::with_completions([
            "The meeting starts at nine thirty.",
        ]));
        let node = RespondNode::new(provider);

        let state = node.run(turn_state("when is standup?")).await.unwrap();

        assert_eq!(state.response, "The meeting starts at nine thirty.");
        assert!(state.final_action.is_none());
    }

    #[tokio::test]
    async fn test_respond_treats_none_action_as_no_action() {
        let provider = Arc::new(ScriptedProvider::with_completions([
            r#"{"response":"Nothing to do.","action":"none"}"#,
        ]));
        let node = RespondNode::new(provider);

        let state = node.run(turn_state("wait")).await.unwrap();

        assert_eq!(state.response, "Nothing to do.");
        assert!(state.final_action.is_none());
    }

    #[tokio::test]
    async fn test_full_graph_capability_turn() {
        let provider = Arc::new(ScriptedProvider::with_completions([
            r#"{"intent":"calendar","confidence":0.9,"capability":"calendar","operation":"list_events","params":{}}"#,
            r#"{"response":"You have standup at 9:30.","action":"none"}"#,
        ]));
        let graph =
            build_agent_graph(provider, registry_with_calendar(), None).unwrap();

        let result = graph.invoke(turn_state("what's on tomorrow?")).await;

        assert!(result.is_complete);
        assert!(!result.has_error());
        assert_eq!(result.response, "You have standup at 9:30.");
        assert_eq!(
            result.visited,
            vec![
                CLASSIFY_NODE.to_string(),
                RUN_CAPABILITY_NODE.to_string(),
                RESPOND_NODE.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_full_graph_conversational_turn_skips_capability() {
        let provider = Arc::new(ScriptedProvider::with_completions([
            r#"{"intent":"small_talk","confidence":0.8}"#,
            r#"{"response":"Hello! How can I help?","action":"none"}"#,
        ]));
        let graph =
            build_agent_graph(provider, Arc::new(CapabilityRegistry::empty()), None).unwrap();

        let result = graph.invoke(turn_state("hey")).await;

        assert!(result.is_complete);
        assert_eq!(
            result.visited,
            vec![CLASSIFY_NODE.to_string(), RESPOND_NODE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_full_graph_inference_outage_becomes_state_error() {
        // Empty script: the first completion request fails like a dead server
        let provider = Arc::new(ScriptedProvider::new());
        let graph =
            build_agent_graph(provider, Arc::new(CapabilityRegistry::empty()), None).unwrap();

        let result = graph.invoke(turn_state("hello")).await;

        assert!(result.is_complete);
        let error = result.error.expect("outage must surface as state error");
        assert!(error.contains(CLASSIFY_NODE), "unexpected error: {error}");
    }
}
