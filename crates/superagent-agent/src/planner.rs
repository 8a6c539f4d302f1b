//! The default reasoning engine: analyse, plan, execute, review, answer.
//!
//! 1. The assistant analyses the request and decides whether tools are needed.
//! 2. The planner picks tool calls as JSON.
//! 3. Calls are dispatched one after another under the executor role. A call
//!    rejected for bad arguments gets one repair attempt by the executor model.
//! 4. The critic reviews what the tools returned.
//! 5. The assistant writes the answer.
//!
//! Model output that is not valid JSON never fails the run: analysis falls
//! back to "no tools", a plan to "no calls".

use async_stream::try_stream;
use futures::Stream;
use serde::Deserialize;
use serde_json::{Map, Value};
use superagent_llm::{CompletionRequest, SharedModel};
use superagent_types::{AgentRole, AgentStatus, HistoryMessage, ToolErrorKind, ToolInvocation, ToolResult};

use crate::engine::{EngineRequest, ReasoningEngine, SharedDispatch, Step, StepStream};
use crate::error::Result;
use crate::tool::ToolDefinition;

const ASSISTANT_SYSTEM: &str = "You are a highly capable AI assistant with access to various tools.

Your role is to:
1. Understand user requests thoroughly
2. Break down complex tasks into manageable steps
3. Use available tools appropriately to accomplish tasks
4. Provide clear, helpful responses
5. Maintain context and coherence throughout conversations

Be concise but informative, and stay within the scope of the available tools.";

const PLANNER_SYSTEM: &str = "You are a planning agent. You decide which tools to call, \
in which order and with which arguments. You answer with JSON only.";

const EXECUTOR_SYSTEM: &str = "You are an execution agent. You fix tool call arguments so \
they match the tool's parameter schema. You answer with a JSON object only.";

const CRITIC_SYSTEM: &str = "You are a critical reviewer. You check tool results for errors, \
gaps and contradictions before an answer is written.";

/// Characters of each tool observation included in prompts.
const MAX_OBSERVATION_CHARS: usize = 4000;

// ─────────────────────────────────────────────────────────────────────────────
// Model output parsing
// ─────────────────────────────────────────────────────────────────────────────

/// The assistant's reading of a request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RequestAnalysis {
    pub main_task: String,
    pub needs_tools: bool,
    pub subtasks: Vec<Value>,
    pub constraints: Vec<Value>,
    pub needs_clarification: bool,
}

impl RequestAnalysis {
    fn fallback(query: &str) -> Self {
        Self {
            main_task: query.to_string(),
            ..Default::default()
        }
    }
}

/// One tool call chosen by the planner.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PlannedCall {
    pub name: String,
    #[serde(default, alias = "arguments")]
    pub args: Value,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolPlan {
    #[serde(default)]
    tools: Vec<PlannedCall>,
}

/// Find a JSON value in model output.
///
/// Accepts bare JSON, JSON inside a Markdown code fence, or the outermost
/// `{...}` span of surrounding prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map_or(0, |i| i + 1);
        if let Some(end) = after[body_start..].find("```")
            && let Ok(value) = serde_json::from_str(after[body_start..body_start + end].trim())
        {
            return Some(value);
        }
    }

    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}

fn parse_analysis(text: &str, query: &str) -> RequestAnalysis {
    extract_json(text)
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or_else(|| {
            tracing::debug!("Analysis was not valid JSON; assuming no tools");
            RequestAnalysis::fallback(query)
        })
}

fn parse_plan(text: &str, tools: &[ToolDefinition]) -> Vec<PlannedCall> {
    let plan: ToolPlan = match extract_json(text) {
        Some(Value::Array(items)) => ToolPlan {
            tools: serde_json::from_value(Value::Array(items)).unwrap_or_default(),
        },
        Some(value) => serde_json::from_value(value).unwrap_or_default(),
        None => {
            tracing::debug!("Tool plan was not valid JSON; running no tools");
            ToolPlan::default()
        }
    };

    plan.tools
        .into_iter()
        .map(|mut call| {
            if !call.args.is_object() {
                call.args = Value::Object(Map::new());
            }
            call
        })
        .inspect(|call| {
            if !tools.iter().any(|t| t.name == call.name) {
                tracing::debug!(tool = %call.name, "Planner chose an unknown tool");
            }
        })
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Prompts
// ─────────────────────────────────────────────────────────────────────────────

fn analysis_prompt(query: &str) -> String {
    format!(
        "Analyze this user request and provide structured information about:
1. The main task or question
2. Whether any tools might be needed
3. Any potential subtasks
4. Any constraints or preferences mentioned
5. Any missing information that needs clarification

User request: {query}

Provide your analysis in JSON format with the keys \"main_task\", \"needs_tools\", \
\"subtasks\", \"constraints\" and \"needs_clarification\"."
    )
}

fn plan_prompt(query: &str, analysis: &RequestAnalysis, tools: &[ToolDefinition]) -> String {
    let tools_desc = tools
        .iter()
        .map(|t| format!("- {}: {}\n  parameters: {}", t.name, t.description, t.parameters))
        .collect::<Vec<_>>()
        .join("\n");
    let subtasks = analysis
        .subtasks
        .iter()
        .map(|s| s.as_str().map_or_else(|| s.to_string(), str::to_string))
        .collect::<Vec<_>>()
        .join("; ");

    format!(
        "Based on this user request and analysis, determine which tools to use.

User request: {query}

Available tools:
{tools_desc}

Analysis:
main task: {}
subtasks: {subtasks}

Provide your tool usage plan in JSON format, including:
1. List of tools to use in sequence
2. Arguments for each tool
3. Reason for using each tool

Answer with {{\"tools\": [{{\"name\": \"...\", \"args\": {{...}}, \"reason\": \"...\"}}]}}.",
        analysis.main_task
    )
}

fn repair_prompt(call: &PlannedCall, error: &str, schema: Option<&Value>) -> String {
    let schema = schema.map_or_else(|| "unknown".to_string(), Value::to_string);
    format!(
        "The call to tool '{}' was rejected: {error}

Parameter schema: {schema}
Arguments sent: {}

Reply with the corrected arguments as a single JSON object.",
        call.name, call.args
    )
}

struct Observation {
    tool: String,
    result: ToolResult,
}

fn render_observations(observations: &[Observation]) -> String {
    observations
        .iter()
        .map(|o| {
            let mut text = o.result.to_observation();
            if let Some((cut, _)) = text.char_indices().nth(MAX_OBSERVATION_CHARS) {
                text.truncate(cut);
                text.push_str("\n[truncated]");
            }
            format!("[{}]\n{}", o.tool, text)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn review_prompt(query: &str, observations: &[Observation]) -> String {
    format!(
        "User request: {query}

Tool results:
{}

Review these results. Point out errors, missing information or contradictions, \
and say whether they are enough to answer the request.",
        render_observations(observations)
    )
}

fn answer_prompt(query: &str, observations: &[Observation], review: Option<&str>) -> String {
    if observations.is_empty() {
        return query.to_string();
    }
    let mut prompt = format!(
        "User request: {query}\n\nTool results:\n{}",
        render_observations(observations)
    );
    if let Some(review) = review {
        prompt.push_str("\n\nReview of the results:\n");
        prompt.push_str(review);
    }
    prompt.push_str("\n\nUsing the information above, write the final answer to the user.");
    prompt
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Plan/execute engine configuration.
#[derive(Debug, Clone)]
pub struct PlanExecuteConfig {
    /// Calls beyond this many in one plan are dropped.
    pub max_tool_calls: usize,
    /// Give a call rejected for bad arguments one corrected retry.
    pub repair_arguments: bool,
    pub temperature: Option<f32>,
}

impl Default for PlanExecuteConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: 8,
            repair_arguments: true,
            temperature: None,
        }
    }
}

/// The default [`ReasoningEngine`].
#[derive(Debug, Clone, Default)]
pub struct PlanExecuteEngine {
    config: PlanExecuteConfig,
}

impl PlanExecuteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: PlanExecuteConfig) -> Self {
        Self { config }
    }
}

async fn ask(
    model: &SharedModel,
    system: &str,
    prompt: String,
    history: &[HistoryMessage],
    config: &PlanExecuteConfig,
) -> Result<String> {
    let mut request = CompletionRequest::prompt(prompt)
        .with_system(system)
        .with_history(history);
    if let Some(t) = config.temperature {
        request = request.with_temperature(t);
    }
    tracing::debug!(model = %model.describe(), "Requesting completion");
    Ok(model.complete(request).await?.text)
}

/// Dispatch a planned call, repairing its arguments once if they are rejected.
async fn execute_call(
    call: &PlannedCall,
    dispatch: &SharedDispatch,
    executor: &SharedModel,
    tools: &[ToolDefinition],
    config: &PlanExecuteConfig,
) -> Result<(ToolResult, bool)> {
    let result = dispatch
        .dispatch(AgentRole::Executor, ToolInvocation::new(&call.name, call.args.clone()))
        .await;

    if !config.repair_arguments || result.error_kind() != Some(ToolErrorKind::InvalidArguments) {
        return Ok((result, false));
    }

    let schema = tools.iter().find(|t| t.name == call.name).map(|t| &t.parameters);
    let reply = ask(
        executor,
        EXECUTOR_SYSTEM,
        repair_prompt(call, &result.to_observation(), schema),
        &[],
        config,
    )
    .await?;

    match extract_json(&reply) {
        Some(args @ Value::Object(_)) if args != call.args => {
            tracing::debug!(tool = %call.name, "Retrying with repaired arguments");
            let retried = dispatch
                .dispatch(AgentRole::Executor, ToolInvocation::new(&call.name, args))
                .await;
            Ok((retried, true))
        }
        _ => Ok((result, false)),
    }
}

fn boxed(stream: impl Stream<Item = Result<Step>> + Send + 'static) -> StepStream {
    Box::pin(stream)
}

impl ReasoningEngine for PlanExecuteEngine {
    fn run(&self, request: EngineRequest) -> StepStream {
        let config = self.config.clone();

        let stream = try_stream! {
            let EngineRequest { query, history, tools, dispatch, models } = request;

            yield Step::status(AgentRole::Assistant, AgentStatus::Thinking, "Understanding your request");
            let reply = ask(&models.assistant, ASSISTANT_SYSTEM, analysis_prompt(&query), &history, &config).await?;
            let analysis = parse_analysis(&reply, &query);
            tracing::debug!(needs_tools = analysis.needs_tools, "Request analysed");

            let mut observations = Vec::new();
            if analysis.needs_tools && !tools.is_empty() {
                yield Step::status(AgentRole::Planner, AgentStatus::Thinking, "Planning tool usage");
                let reply = ask(&models.planner, PLANNER_SYSTEM, plan_prompt(&query, &analysis, &tools), &[], &config).await?;
                let mut plan = parse_plan(&reply, &tools);
                if plan.len() > config.max_tool_calls {
                    tracing::debug!(
                        planned = plan.len(),
                        kept = config.max_tool_calls,
                        "Trimming tool plan"
                    );
                    plan.truncate(config.max_tool_calls);
                }

                if !plan.is_empty() {
                    let names = plan.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
                    yield Step::status(AgentRole::Executor, AgentStatus::Executing, format!("Using tools: {names}"));

                    for call in plan {
                        let (result, repaired) = execute_call(&call, &dispatch, &models.executor, &tools, &config).await?;
                        let message = if repaired {
                            format!("Executed {} (arguments corrected)", call.name)
                        } else {
                            format!("Executed {}", call.name)
                        };
                        let mut step = Step::status(AgentRole::Executor, AgentStatus::Executing, message);
                        if let Some(reason) = &call.reason {
                            step = step.with_task(reason.clone());
                        }
                        yield step;
                        observations.push(Observation { tool: call.name, result });
                    }
                }
            }

            let review = if observations.is_empty() {
                None
            } else {
                yield Step::status(AgentRole::Critic, AgentStatus::Thinking, "Reviewing results");
                let review = ask(&models.critic, CRITIC_SYSTEM, review_prompt(&query, &observations), &[], &config).await?;
                yield Step::thought(AgentRole::Critic, review.clone());
                Some(review)
            };

            yield Step::status(AgentRole::Assistant, AgentStatus::Thinking, "Generating response");
            let answer = ask(
                &models.assistant,
                ASSISTANT_SYSTEM,
                answer_prompt(&query, &observations, review.as_deref()),
                &history,
                &config,
            )
            .await?;

            yield Step::status(AgentRole::Assistant, AgentStatus::Done, "Response ready");
            yield Step::final_answer(AgentRole::Assistant, answer);
        };

        boxed(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{RoleModels, StepContent, ToolDispatch};
    use async_trait::async_trait;
    use futures::StreamExt;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use superagent_llm::MockModel;

    #[derive(Default)]
    struct RecordingDispatch {
        calls: Mutex<Vec<ToolInvocation>>,
        reject_first: bool,
    }

    #[async_trait]
    impl ToolDispatch for RecordingDispatch {
        async fn dispatch(&self, _role: AgentRole, invocation: ToolInvocation) -> ToolResult {
            let mut calls = self.calls.lock();
            calls.push(invocation.clone());
            if self.reject_first && calls.len() == 1 {
                return ToolResult::error(ToolErrorKind::InvalidArguments, "missing 'query'");
            }
            ToolResult::text(format!("result of {}", invocation.name))
        }
    }

    fn tools() -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "web_search".into(),
            description: "Search the web".into(),
            parameters: json!({"type": "object"}),
        }]
    }

    fn request(models: RoleModels, dispatch: Arc<RecordingDispatch>) -> EngineRequest {
        EngineRequest {
            query: "What is Rust?".into(),
            history: Arc::from(vec![HistoryMessage::user("hi"), HistoryMessage::assistant("hello")]),
            tools: tools(),
            dispatch,
            models,
        }
    }

    async fn collect(stream: StepStream) -> Vec<Result<Step>> {
        stream.collect().await
    }

    #[test]
    fn test_extract_json_variants() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": 2}\n```\nthanks"),
            Some(json!({"a": 2}))
        );
        assert_eq!(extract_json("Sure! {\"a\": 3} hope that helps"), Some(json!({"a": 3})));
        assert_eq!(extract_json("no json here"), None);
    }

    #[test]
    fn test_parse_analysis_fallback() {
        let analysis = parse_analysis("I think you need tools", "q");
        assert!(!analysis.needs_tools);
        assert_eq!(analysis.main_task, "q");

        let analysis = parse_analysis(r#"{"main_task": "t", "needs_tools": true}"#, "q");
        assert!(analysis.needs_tools);
        assert_eq!(analysis.main_task, "t");
    }

    #[test]
    fn test_parse_plan_shapes() {
        let plan = parse_plan(
            r#"{"tools": [{"name": "web_search", "args": {"query": "rust"}, "reason": "look it up"}]}"#,
            &tools(),
        );
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].args, json!({"query": "rust"}));

        let plan = parse_plan(r#"[{"name": "web_search", "arguments": {"query": "x"}}]"#, &tools());
        assert_eq!(plan[0].args, json!({"query": "x"}));

        let plan = parse_plan(r#"{"tools": [{"name": "web_search"}]}"#, &tools());
        assert_eq!(plan[0].args, json!({}));

        assert!(parse_plan("nonsense", &tools()).is_empty());
    }

    #[tokio::test]
    async fn test_direct_answer_without_tools() {
        let model = Arc::new(MockModel::new([r#"{"needs_tools": false}"#, "Rust is a language."]));
        let dispatch = Arc::new(RecordingDispatch::default());
        let steps = collect(PlanExecuteEngine::new().run(request(RoleModels::uniform(model.clone()), dispatch.clone()))).await;

        let steps: Vec<Step> = steps.into_iter().map(|s| s.unwrap()).collect();
        assert_eq!(
            steps.last().unwrap().content,
            StepContent::Final("Rust is a language.".into())
        );
        assert!(dispatch.calls.lock().is_empty());
        // History reaches the model.
        assert_eq!(model.requests()[0].messages.len(), 3);
    }

    #[tokio::test]
    async fn test_tool_flow_with_review() {
        let assistant = Arc::new(MockModel::new([r#"{"needs_tools": true}"#, "Final answer"]));
        let planner = Arc::new(MockModel::new([
            r#"{"tools": [{"name": "web_search", "args": {"query": "rust"}}]}"#,
        ]));
        let critic = Arc::new(MockModel::new(["Looks complete."]));
        let models = RoleModels {
            assistant: assistant.clone(),
            planner,
            executor: Arc::new(MockModel::new(Vec::<String>::new())),
            critic,
        };
        let dispatch = Arc::new(RecordingDispatch::default());
        let steps: Vec<Step> = collect(PlanExecuteEngine::new().run(request(models, dispatch.clone())))
            .await
            .into_iter()
            .map(|s| s.unwrap())
            .collect();

        let messages: Vec<String> = steps
            .iter()
            .filter_map(|s| match &s.content {
                StepContent::Status { message, .. } => Some(message.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            messages,
            [
                "Understanding your request",
                "Planning tool usage",
                "Using tools: web_search",
                "Executed web_search",
                "Reviewing results",
                "Generating response",
                "Response ready"
            ]
        );
        assert!(steps.contains(&Step::thought(AgentRole::Critic, "Looks complete.")));
        assert_eq!(dispatch.calls.lock().len(), 1);

        let final_prompt = assistant.requests()[1].last_user_text().unwrap().to_string();
        assert!(final_prompt.contains("result of web_search"));
        assert!(final_prompt.contains("Looks complete."));
    }

    #[tokio::test]
    async fn test_invalid_arguments_repaired_once() {
        let assistant = Arc::new(MockModel::new([r#"{"needs_tools": true}"#, "done"]));
        let planner = Arc::new(MockModel::new([r#"{"tools": [{"name": "web_search", "args": {}}]}"#]));
        let executor = Arc::new(MockModel::new([r#"{"query": "rust"}"#]));
        let models = RoleModels {
            assistant,
            planner,
            executor,
            critic: Arc::new(MockModel::with_text("ok")),
        };
        let dispatch = Arc::new(RecordingDispatch {
            reject_first: true,
            ..Default::default()
        });
        let steps: Vec<Step> = collect(PlanExecuteEngine::new().run(request(models, dispatch.clone())))
            .await
            .into_iter()
            .map(|s| s.unwrap())
            .collect();

        let calls = dispatch.calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].arguments, json!({"query": "rust"}));
        assert!(steps.iter().any(|s| matches!(
            &s.content,
            StepContent::Status { message, .. } if message.contains("arguments corrected")
        )));
    }

    #[tokio::test]
    async fn test_model_failure_ends_stream_with_error() {
        let model = Arc::new(MockModel::failing("provider down"));
        let dispatch = Arc::new(RecordingDispatch::default());
        let steps = collect(PlanExecuteEngine::new().run(request(RoleModels::uniform(model), dispatch))).await;

        assert_eq!(steps.len(), 2);
        assert!(steps[0].is_ok());
        let err = steps[1].as_ref().unwrap_err();
        assert!(err.to_string().contains("provider down"));
    }
}
