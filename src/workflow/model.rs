//! Workflow Data Model
//!
//! Plain records for workflows and steps. Synchronization lives next to the
//! records in the store ([`SharedWorkflow`], [`SharedStep`]), not inside them.
//!
//! # Lifecycle
//!
//! ```text
//! Queued -> Dispatched -> Done
//!                      \-> Failed
//! ```
//!
//! A step reaches a terminal state exactly once and is never mutated after.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Multi-valued HTTP headers, ordered by name.
pub type Headers = BTreeMap<String, Vec<String>>;

/// A workflow record shared between the store and concurrent readers.
pub type SharedWorkflow = Arc<RwLock<Workflow>>;

/// A step record shared between the store, the worker and concurrent readers.
pub type SharedStep = Arc<RwLock<Step>>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Generates a new namespaced random identifier.
            pub fn generate() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Identifier of a workflow, caller-chosen or generated as `wf_<uuid>`.
    WorkflowId,
    "wf"
);

string_id!(
    /// Identifier of a step, always generated as `st_<uuid>`.
    StepId,
    "st"
);

/// The outbound call a step performs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StepRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: String,
}

impl StepRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into().trim().to_uppercase(),
            url: url.into().trim().to_string(),
            headers: Headers::new(),
            body: String::new(),
        }
    }

    /// Appends a header value; repeated names keep every value.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

/// What the step's target answered.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct StepResult {
    /// HTTP status, absent until the call completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: String,
}

/// Position of a step in its lifecycle.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepState {
    #[default]
    Queued,
    Dispatched,
    Done,
    Failed,
}

impl StepState {
    /// Returns true for `Done` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Done | StepState::Failed)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StepState::Queued => "queued",
            StepState::Dispatched => "dispatched",
            StepState::Done => "done",
            StepState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One deferred outbound HTTP call plus its recorded result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    pub workflow_id: WorkflowId,
    pub id: StepId,
    pub name: String,

    /// Where the aggregated workflow results are posted once this step finishes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_url: Option<String>,

    pub request: StepRequest,
    pub state: StepState,
    pub result: StepResult,

    /// Failure reason, set only in the `Failed` state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Step {
    /// Creates a queued step.
    pub fn new(
        workflow_id: WorkflowId,
        id: StepId,
        name: impl Into<String>,
        request: StepRequest,
    ) -> Self {
        Self {
            workflow_id,
            id,
            name: name.into(),
            callback_url: None,
            request,
            state: StepState::Queued,
            result: StepResult::default(),
            error: None,
        }
    }

    /// Sets the callback URL; an empty URL means no callback.
    pub fn with_callback(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        self.callback_url = (!url.trim().is_empty()).then_some(url);
        self
    }

    /// True once the step reached a terminal state.
    pub fn is_done(&self) -> bool {
        self.state.is_terminal()
    }

    /// Moves a queued step to `Dispatched`.
    pub fn mark_dispatched(&mut self) -> bool {
        if self.state != StepState::Queued {
            return false;
        }
        self.state = StepState::Dispatched;
        true
    }

    /// Records a successful result. Returns false if the step was already terminal.
    pub fn complete(&mut self, result: StepResult) -> bool {
        if self.is_done() {
            return false;
        }
        self.result = result;
        self.state = StepState::Done;
        true
    }

    /// Records a failure. Returns false if the step was already terminal.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.is_done() {
            return false;
        }
        self.error = Some(reason.into());
        self.state = StepState::Failed;
        true
    }
}

/// A named, ordered group of steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: WorkflowId,

    /// Step ids in enqueue order, append-only
    pub step_ids: Vec<StepId>,
}

impl Workflow {
    pub fn new(id: WorkflowId) -> Self {
        Self {
            id,
            step_ids: Vec::new(),
        }
    }

    /// Appends a step id. Duplicates are rejected.
    pub fn push_step(&mut self, step_id: StepId) -> bool {
        if self.step_ids.contains(&step_id) {
            return false;
        }
        self.step_ids.push(step_id);
        true
    }

    /// The step ids recorded up to and including `step_id`, or `None` if it
    /// does not belong to this workflow.
    pub fn steps_through(&self, step_id: &StepId) -> Option<&[StepId]> {
        self.step_ids
            .iter()
            .position(|id| id == step_id)
            .map(|index| &self.step_ids[..=index])
    }

    pub fn len(&self) -> usize {
        self.step_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_ids.is_empty()
    }
}
