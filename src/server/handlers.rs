//! Request Handlers
//!
//! Translate JSON requests into engine calls and engine records into the
//! public response shapes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use axum::Json;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use url::Url;

use super::errors::ApiError;
use crate::execution::{Engine, EngineStats, EnqueueRequest};
use crate::workflow::{Headers, Step, StepRequest, StepState, Workflow, WorkflowId};

/// Methods a step may use.
const ALLOWED_METHODS: &[&str] = &["GET", "POST"];

/// Body of `POST /v1/enqueue`.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct EnqueueBody {
    pub method: String,
    pub url: String,
    pub header: HashMap<String, String>,
    pub body: String,
    pub workflow_id: Option<WorkflowId>,
    pub step_name: String,
    pub callback_url: Option<String>,
}

impl EnqueueBody {
    /// Checks required fields, the method and the URL schemes.
    pub fn validate(&self) -> Result<(), String> {
        if self.method.trim().is_empty() {
            return Err("method is required".to_string());
        }
        if !ALLOWED_METHODS.contains(&self.method.trim().to_uppercase().as_str()) {
            return Err(format!("Unhandled method: {}", self.method));
        }
        if !is_http_url(&self.url) {
            return Err(format!("url must be an http(s) URL: '{}'", self.url));
        }
        if self.step_name.trim().is_empty() {
            return Err("stepName is required".to_string());
        }
        if let Some(callback) = self.callback_url.as_deref() {
            if !callback.is_empty() && !is_http_url(callback) {
                return Err(format!("callbackUrl must be an http(s) URL: '{}'", callback));
            }
        }
        Ok(())
    }

    fn into_request(self) -> EnqueueRequest {
        let mut request = StepRequest::new(self.method, self.url).with_body(self.body);
        for (name, value) in self.header {
            request = request.with_header(name, value);
        }

        let mut enqueue = EnqueueRequest::new(self.step_name, request);
        enqueue.workflow_id = self.workflow_id;
        enqueue.callback_url = self.callback_url.filter(|url| !url.is_empty());
        enqueue
    }
}

fn is_http_url(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => {
            matches!(parsed.scheme(), "http" | "https")
                && parsed.host_str().is_some_and(|host| !host.is_empty())
        }
        Err(_) => false,
    }
}

/// Reply of `POST /v1/enqueue`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnqueueReply {
    pub workflow_id: WorkflowId,
    pub step_id: String,
    pub read_workflow_token: String,
}

/// Public view of a step result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub header: Headers,
    pub body: String,
}

/// Public view of a step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepView {
    pub workflow_id: String,
    pub id: String,
    pub name: String,
    pub done: bool,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub result: ResultView,
}

impl From<Step> for StepView {
    fn from(step: Step) -> Self {
        Self {
            done: step.is_done(),
            workflow_id: step.workflow_id.to_string(),
            id: step.id.to_string(),
            name: step.name,
            state: step.state,
            error: step.error,
            result: ResultView {
                status: step.result.status,
                header: step.result.headers,
                body: step.result.body,
            },
        }
    }
}

/// Reply of the two workflow listing endpoints.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct PollReply {
    pub steps: Vec<StepView>,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn enqueue(
    State(engine): State<Arc<Engine>>,
    body: Result<Json<EnqueueBody>, JsonRejection>,
) -> Result<Json<EnqueueReply>, ApiError> {
    let Json(body) = body?;
    body.validate().map_err(ApiError::BadRequest)?;
    debug!("Enqueue request: {:?}", body);
    info!("Received step '{}'", body.step_name);

    let accepted = engine.enqueue(body.into_request()).await?;
    Ok(Json(EnqueueReply {
        workflow_id: accepted.workflow_id,
        step_id: accepted.step_id.to_string(),
        read_workflow_token: accepted.read_workflow_token,
    }))
}

pub async fn poll(
    State(engine): State<Arc<Engine>>,
    Path(workflow_id): Path<String>,
) -> Result<Json<PollReply>, ApiError> {
    let workflow = engine.get_workflow(&WorkflowId::from(workflow_id))?;
    Ok(list_steps(&engine, &workflow))
}

pub async fn workflow(
    State(engine): State<Arc<Engine>>,
    headers: HeaderMap,
) -> Result<Json<PollReply>, ApiError> {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

    let workflow = engine.get_workflow_from_token(token)?;
    Ok(list_steps(&engine, &workflow))
}

pub async fn stats(State(engine): State<Arc<Engine>>) -> Json<EngineStats> {
    Json(engine.stats())
}

fn list_steps(engine: &Engine, workflow: &Workflow) -> Json<PollReply> {
    let steps = engine
        .workflow_steps(workflow)
        .into_iter()
        .map(StepView::from)
        .collect();
    Json(PollReply { steps })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_body() -> EnqueueBody {
        EnqueueBody {
            method: "GET".into(),
            url: "https://example.com/a".into(),
            step_name: "fetch".into(),
            ..EnqueueBody::default()
        }
    }

    #[test]
    fn test_validate_accepts_get_and_post() {
        assert!(valid_body().validate().is_ok());
        let post = EnqueueBody {
            method: "post".into(),
            ..valid_body()
        };
        assert!(post.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_other_methods() {
        let body = EnqueueBody {
            method: "DELETE".into(),
            ..valid_body()
        };
        assert_eq!(body.validate().unwrap_err(), "Unhandled method: DELETE");
    }

    #[test]
    fn test_validate_required_fields() {
        let no_name = EnqueueBody {
            step_name: " ".into(),
            ..valid_body()
        };
        assert!(no_name.validate().is_err());

        let no_url = EnqueueBody {
            url: String::new(),
            ..valid_body()
        };
        assert!(no_url.validate().is_err());

        let bad_scheme = EnqueueBody {
            url: "ftp://example.com".into(),
            ..valid_body()
        };
        assert!(bad_scheme.validate().is_err());

        let bad_host = EnqueueBody {
            url: "http://a b".into(),
            ..valid_body()
        };
        assert!(bad_host.validate().is_err());

        let no_host = EnqueueBody {
            url: "http://".into(),
            ..valid_body()
        };
        assert!(no_host.validate().is_err());

        let bad_callback = EnqueueBody {
            callback_url: Some("not a url".into()),
            ..valid_body()
        };
        assert!(bad_callback.validate().is_err());
    }

    #[test]
    fn test_body_deserializes_camel_case() {
        let body: EnqueueBody = serde_json::from_str(
            r#"{"method":"POST","url":"http://t","header":{"a":"b"},"body":"x",
                "workflowId":"wf_1","stepName":"s","callbackUrl":"http://cb"}"#,
        )
        .unwrap();

        assert_eq!(body.workflow_id, Some(WorkflowId::from("wf_1")));
        let request = body.into_request();
        assert_eq!(request.step_name, "s");
        assert_eq!(request.callback_url.as_deref(), Some("http://cb"));
        assert_eq!(request.request.headers["a"], vec!["b"]);
        assert_eq!(request.request.body, "x");
    }

    #[test]
    fn test_empty_callback_is_dropped() {
        let body = EnqueueBody {
            callback_url: Some(String::new()),
            ..valid_body()
        };
        assert!(body.validate().is_ok());
        assert!(body.into_request().callback_url.is_none());
    }

    #[test]
    fn test_step_view_shape() {
        let step = Step::new(
            WorkflowId::from("wf_1"),
            "st_1".into(),
            "fetch",
            StepRequest::new("GET", "http://t"),
        );
        let value = serde_json::to_value(StepView::from(step)).unwrap();

        assert_eq!(value["workflowId"], "wf_1");
        assert_eq!(value["id"], "st_1");
        assert_eq!(value["done"], false);
        assert_eq!(value["state"], "queued");
        assert_eq!(value["result"]["body"], "");
        assert!(value.get("error").is_none());
    }
}
