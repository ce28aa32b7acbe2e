//! The workflow runner — ordered steps with an optional state machine.
//!
//! A workflow artifact's content is a JSON [`WorkflowDef`]: named steps
//! (code, LLM, emit), each with an optional `run_if` guard and an error
//! policy, plus an optional state machine whose states select steps and
//! whose transitions are guarded by expressions on the shared context.
//! The runner advances at most one state per iteration and stops at the
//! first step that emits a non-noop intent, so one iteration produces at
//! most one dispatcher turn and other loops are not starved.

use crate::expr::{eval_bool, eval_value, EvalError, Expression, ValueExpr};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;

/// Errors from workflow execution.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// An expression failed to evaluate.
    #[error("eval error in step '{step}': {source}")]
    Eval {
        /// The step that failed.
        step: String,
        /// The underlying evaluation error.
        #[source]
        source: EvalError,
    },

    /// A step failed and its policy was `fail`.
    #[error("step '{step}' failed: {message}")]
    StepFailed {
        /// The step that failed.
        step: String,
        /// What went wrong.
        message: String,
    },

    /// The state machine referenced an unknown state.
    #[error("unknown state: {0}")]
    UnknownState(String),

    /// A state referenced an unknown step name.
    #[error("unknown step: {0}")]
    UnknownStep(String),

    /// An LLM step failed to think.
    #[error("think failed: {0}")]
    Think(String),
}

/// What to do when a step fails.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnError {
    /// Retry up to `max_retries` times, then fail.
    Retry,
    /// Skip the step and continue.
    Skip,
    /// Fail the iteration.
    #[default]
    Fail,
}

/// The work a step performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step_type", rename_all = "snake_case")]
pub enum StepKind {
    /// Evaluate an expression and store the result in the context.
    Code {
        /// Context key to assign.
        assign: String,
        /// The expression.
        expr: ValueExpr,
    },
    /// Render a prompt template, call the model, store the parsed reply.
    Llm {
        /// Template with `{dotted.path}` placeholders.
        prompt: String,
        /// Context key to assign the reply to.
        assign: String,
        /// Optional model override.
        #[serde(default)]
        model: Option<String>,
    },
    /// Render an intent template; a non-noop intent stops the iteration.
    Emit {
        /// Intent template; string leaves may hold `{dotted.path}`
        /// placeholders.
        intent: Value,
    },
}

/// One workflow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step name, referenced by state definitions.
    pub name: String,
    /// The work.
    #[serde(flatten)]
    pub kind: StepKind,
    /// Guard: the step runs only when this holds.
    #[serde(default)]
    pub run_if: Option<Expression>,
    /// Error policy.
    #[serde(default)]
    pub on_error: OnError,
    /// Retry budget when `on_error = retry`.
    #[serde(default)]
    pub max_retries: u32,
}

/// A guarded transition between states.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    /// Target state.
    pub to: String,
    /// Condition on the context.
    pub when: Expression,
}

/// One state: which steps run and where to go next.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDef {
    /// Names of steps to run in this state, in order.
    #[serde(default)]
    pub steps: Vec<String>,
    /// Transitions, evaluated in order after the steps; the first match
    /// wins.
    #[serde(default)]
    pub transitions: Vec<Transition>,
}

/// The optional state machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMachine {
    /// The state a fresh context starts in.
    pub initial: String,
    /// All states.
    pub states: HashMap<String, StateDef>,
}

/// A complete workflow definition — the content of a workflow artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
    /// Named constants available to expressions.
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    /// All steps.
    pub steps: Vec<Step>,
    /// Optional state machine; absent means "run all steps in order".
    #[serde(default)]
    pub state_machine: Option<StateMachine>,
}

/// Something that can answer an LLM step's prompt. The loop manager
/// implements this over the gateway with the agent as the paying caller.
#[async_trait]
pub trait Thinker: Send + Sync {
    /// Answer a rendered prompt; returns the model's text.
    async fn think(&self, prompt: &str, model: Option<&str>) -> Result<String, WorkflowError>;
}

/// What one iteration produced.
#[derive(Debug, Clone, PartialEq)]
pub enum IterationOutcome {
    /// A step emitted an intent to dispatch (never `noop`).
    Emit(Value),
    /// All selected steps ran without emitting.
    Idle,
}

/// Drives a [`WorkflowDef`] one iteration at a time.
pub struct WorkflowRunner {
    def: WorkflowDef,
}

impl WorkflowRunner {
    /// Wrap a definition.
    #[must_use]
    pub fn new(def: WorkflowDef) -> Self {
        Self { def }
    }

    /// Parse a definition from a workflow artifact's content.
    pub fn from_content(content: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_str(content)?))
    }

    /// The wrapped definition.
    #[must_use]
    pub fn def(&self) -> &WorkflowDef {
        &self.def
    }

    /// Run one iteration.
    ///
    /// With a state machine, runs the current state's steps and then
    /// advances at most one transition; `current_state` is updated in
    /// place. Without one, runs all steps in order. Stops at the first
    /// emitted non-noop intent.
    pub async fn run_iteration(
        &self,
        context: &mut Value,
        current_state: &mut Option<String>,
        thinker: &dyn Thinker,
    ) -> Result<IterationOutcome, WorkflowError> {
        let selected: Vec<&Step> = match &self.def.state_machine {
            Some(machine) => {
                let state_name = current_state
                    .get_or_insert_with(|| machine.initial.clone())
                    .clone();
                let state = machine
                    .states
                    .get(&state_name)
                    .ok_or_else(|| WorkflowError::UnknownState(state_name.clone()))?;
                state
                    .steps
                    .iter()
                    .map(|name| {
                        self.def
                            .steps
                            .iter()
                            .find(|s| &s.name == name)
                            .ok_or_else(|| WorkflowError::UnknownStep(name.clone()))
                    })
                    .collect::<Result<_, _>>()?
            }
            None => self.def.steps.iter().collect(),
        };

        let mut outcome = IterationOutcome::Idle;
        for step in selected {
            if let Some(guard) = &step.run_if {
                let holds = eval_bool(guard, context, &self.def.parameters).map_err(|source| {
                    WorkflowError::Eval {
                        step: step.name.clone(),
                        source,
                    }
                })?;
                if !holds {
                    continue;
                }
            }
            if let Some(intent) = self.run_step(step, context, thinker).await? {
                outcome = IterationOutcome::Emit(intent);
                break;
            }
        }

        // Advance the state machine at most one state per iteration.
        if let (Some(machine), Some(state_name)) = (&self.def.state_machine, current_state.as_mut())
        {
            let state = machine
                .states
                .get(state_name)
                .ok_or_else(|| WorkflowError::UnknownState(state_name.clone()))?;
            for transition in &state.transitions {
                let holds = eval_bool(&transition.when, context, &self.def.parameters)
                    .unwrap_or(false);
                if holds {
                    tracing::debug!(from = %state_name, to = %transition.to, "workflow transition");
                    *state_name = transition.to.clone();
                    break;
                }
            }
        }

        Ok(outcome)
    }

    /// Run one step under its error policy. `Ok(Some(intent))` stops the
    /// iteration.
    async fn run_step(
        &self,
        step: &Step,
        context: &mut Value,
        thinker: &dyn Thinker,
    ) -> Result<Option<Value>, WorkflowError> {
        let attempts = match step.on_error {
            OnError::Retry => step.max_retries + 1,
            _ => 1,
        };
        let mut last_error = None;
        for attempt in 0..attempts {
            if attempt > 0 {
                tracing::debug!(step = %step.name, attempt, "retrying workflow step");
            }
            match self.attempt_step(step, context, thinker).await {
                Ok(emitted) => return Ok(emitted),
                Err(err) => last_error = Some(err),
            }
        }
        let err = last_error.expect("at least one attempt");
        match step.on_error {
            OnError::Skip => {
                tracing::debug!(step = %step.name, %err, "skipping failed step");
                Ok(None)
            }
            _ => Err(WorkflowError::StepFailed {
                step: step.name.clone(),
                message: err.to_string(),
            }),
        }
    }

    async fn attempt_step(
        &self,
        step: &Step,
        context: &mut Value,
        thinker: &dyn Thinker,
    ) -> Result<Option<Value>, WorkflowError> {
        match &step.kind {
            StepKind::Code { assign, expr } => {
                let value =
                    eval_value(expr, context, &self.def.parameters).map_err(|source| {
                        WorkflowError::Eval {
                            step: step.name.clone(),
                            source,
                        }
                    })?;
                set_key(context, assign, value);
                Ok(None)
            }
            StepKind::Llm {
                prompt,
                assign,
                model,
            } => {
                let rendered = render_template(prompt, context);
                let reply = thinker.think(&rendered, model.as_deref()).await?;
                // Structured replies land as JSON; anything else as text.
                let parsed = serde_json::from_str::<Value>(&reply)
                    .unwrap_or(Value::String(reply));
                set_key(context, assign, parsed);
                Ok(None)
            }
            StepKind::Emit { intent } => {
                let rendered = render_value(intent, context);
                let is_noop = rendered
                    .get("action_type")
                    .and_then(|t| t.as_str())
                    .is_none_or(|t| t == "noop");
                if is_noop {
                    Ok(None)
                } else {
                    Ok(Some(rendered))
                }
            }
        }
    }
}

/// Set a top-level context key.
fn set_key(context: &mut Value, key: &str, value: Value) {
    if !context.is_object() {
        *context = Value::Object(Default::default());
    }
    context
        .as_object_mut()
        .expect("context is an object")
        .insert(key.to_string(), value);
}

/// Replace `{dotted.path}` placeholders in a string with context values.
/// Strings substitute verbatim; other values substitute as JSON.
#[must_use]
pub fn render_template(template: &str, context: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let path = &after[..close];
                match lookup_path(context, path) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => {
                        out.push('{');
                        out.push_str(path);
                        out.push('}');
                    }
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Render placeholders in every string leaf of a JSON template. A string
/// that is exactly one placeholder substitutes the raw value, preserving
/// its type — `"{balances.scrip}"` becomes a number, not a string.
#[must_use]
pub fn render_value(template: &Value, context: &Value) -> Value {
    match template {
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('{') && trimmed.ends_with('}') && !trimmed[1..].contains('{') {
                let path = &trimmed[1..trimmed.len() - 1];
                if let Some(found) = lookup_path(context, path) {
                    return found.clone();
                }
            }
            Value::String(render_template(s, context))
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|i| render_value(i, context)).collect())
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_value(v, context)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn lookup_path<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = context;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}
