//! Callback Aggregation
//!
//! When a step carrying a callback URL finishes, the results of the steps
//! recorded in its workflow up to and including that step are collected
//! into one JSON object (`{ step name: result body }`) and posted to the
//! URL. The post waits until every one of those steps is terminal, so the
//! receiver never sees a half-finished workflow prefix.
//!
//! Delivery is fire-and-forget: failures are logged, never retried.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{info, warn};
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, StatusCode};

use crate::error::{Error, Result};
use crate::store::ExpiringStore;
use crate::workflow::{SharedStep, StepId, WorkflowId};

/// Header carrying the workflow id of the delivered results.
pub const WORKFLOW_ID_HEADER: &str = "Durable-Workflow-Id";

/// Header echoing the callback URL the results were sent to.
pub const CALLBACK_HEADER: &str = "Durable-Callback";

/// A callback waiting for its workflow prefix to finish.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCallback {
    pub workflow_id: WorkflowId,
    /// The step whose completion triggered the callback
    pub trigger: StepId,
    pub url: String,
    /// Steps whose results are delivered, in workflow order
    pub members: Vec<StepId>,
}

impl PendingCallback {
    /// Returns true once every member is terminal.
    ///
    /// Members evicted from the store no longer block delivery.
    pub fn is_ready(&self, steps: &ExpiringStore<SharedStep>) -> bool {
        self.members.iter().all(|id| match steps.get(id.as_str()) {
            Ok(step) => step.read().is_done(),
            Err(_) => true,
        })
    }

    /// Collects `{ step name: result body }` for every member still stored.
    pub fn payload(&self, steps: &ExpiringStore<SharedStep>) -> BTreeMap<String, String> {
        let mut payload = BTreeMap::new();
        for id in &self.members {
            match steps.get(id.as_str()) {
                Ok(step) => {
                    let step = step.read();
                    payload.insert(step.name.clone(), step.result.body.clone());
                }
                Err(_) => {
                    warn!(
                        "Step {} of workflow {} expired before its callback was sent",
                        id, self.workflow_id
                    );
                }
            }
        }
        payload
    }
}

/// Posts an aggregated payload to the callback URL.
///
/// Returns the status the receiver answered with; callers decide how to
/// report a rejection.
pub async fn deliver(
    client: &Client,
    callback: &PendingCallback,
    payload: &BTreeMap<String, String>,
    user_agent: &str,
    timeout: Duration,
) -> Result<StatusCode> {
    let body = serde_json::to_vec(payload)?;

    info!(
        "Sending callback for workflow {} to {}",
        callback.workflow_id, callback.url
    );
    let response = client
        .post(&callback.url)
        .timeout(timeout)
        .header(USER_AGENT, user_agent)
        .header(CONTENT_TYPE, "application/json")
        .header(WORKFLOW_ID_HEADER, callback.workflow_id.as_str())
        .header(CALLBACK_HEADER, callback.url.as_str())
        .body(body)
        .send()
        .await
        .map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(timeout)
            } else {
                Error::Transport(e.to_string())
            }
        })?;

    Ok(response.status())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parking_lot::RwLock;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::workflow::{Step, StepRequest, StepResult};

    fn store_with(steps: &[(&str, &str, Option<&str>)]) -> ExpiringStore<SharedStep> {
        let store = ExpiringStore::new("step", Duration::from_secs(60));
        for (id, name, body) in steps {
            let mut step = Step::new(
                WorkflowId::from("wf_cb"),
                StepId::from(*id),
                *name,
                StepRequest::new("GET", "http://localhost"),
            );
            if let Some(body) = body {
                step.complete(StepResult {
                    status: Some(200),
                    body: body.to_string(),
                    ..StepResult::default()
                });
            }
            store.set(*id, Arc::new(RwLock::new(step)));
        }
        store
    }

    fn pending(members: &[&str], url: &str) -> PendingCallback {
        PendingCallback {
            workflow_id: WorkflowId::from("wf_cb"),
            trigger: StepId::from(*members.last().unwrap()),
            url: url.to_string(),
            members: members.iter().map(|id| StepId::from(*id)).collect(),
        }
    }

    #[test]
    fn test_not_ready_until_all_members_done() {
        let store = store_with(&[("st_1", "first", None), ("st_2", "second", Some("two"))]);
        let callback = pending(&["st_1", "st_2"], "http://cb");
        assert!(!callback.is_ready(&store));

        store
            .get("st_1")
            .unwrap()
            .write()
            .fail("connection refused");
        assert!(callback.is_ready(&store));
    }

    #[test]
    fn test_evicted_members_do_not_block() {
        let store = store_with(&[("st_2", "second", Some("two"))]);
        let callback = pending(&["st_1", "st_2"], "http://cb");

        assert!(callback.is_ready(&store));
        let payload = callback.payload(&store);
        assert_eq!(payload.len(), 1);
        assert_eq!(payload["second"], "two");
    }

    #[test]
    fn test_payload_maps_names_to_bodies() {
        let store = store_with(&[
            ("st_1", "first", Some(r#"{"a":1}"#)),
            ("st_2", "second", Some("plain")),
        ]);
        let payload = pending(&["st_1", "st_2"], "http://cb").payload(&store);

        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"first":"{\"a\":1}","second":"plain"}"#
        );
    }

    #[tokio::test]
    async fn test_deliver_sets_identifying_headers() {
        let server = MockServer::start().await;
        let url = format!("{}/hook", server.uri());
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("user-agent", "durable.io"))
            .and(header("content-type", "application/json"))
            .and(header("durable-workflow-id", "wf_cb"))
            .and(header("durable-callback", url.as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let store = store_with(&[("st_1", "first", Some("one"))]);
        let callback = pending(&["st_1"], &url);
        let status = deliver(
            &Client::new(),
            &callback,
            &callback.payload(&store),
            "durable.io",
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert_eq!(status, StatusCode::NO_CONTENT);
        let received = server.received_requests().await.unwrap();
        let body: BTreeMap<String, String> = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body["first"], "one");
    }

    #[tokio::test]
    async fn test_deliver_unreachable() {
        let callback = pending(&["st_1"], "http://127.0.0.1:1/hook");
        let result = deliver(
            &Client::new(),
            &callback,
            &BTreeMap::new(),
            "durable.io",
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
