//! Correlation of comment events with the boards their subject belongs to.
//!
//! When a comment is created on an issue or pull request, the handler asks the
//! GraphQL API for the subject's title and its first [`MAX_ASSOCIATIONS`]
//! project memberships, then hands the resulting [`CorrelationResult`] to the
//! configured [`DecisionStep`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::{
    BoardAssociation, CorrelationQuery, CorrelationQueryError, CorrelationResult, DecisionStep,
    DeliveryError, EventHandler, InboundEvent, QuerySession, SubjectNodeId, MAX_ASSOCIATIONS,
};

/// Routing key the handler is registered under.
pub const ISSUE_COMMENT_CREATED: &str = "issue_comment.created";

/// Subject title plus board memberships. The subject id and page size travel
/// as variables.
const SUBJECT_BOARDS_QUERY: &str = r#"
query SubjectBoards($subjectId: ID!, $first: Int!) {
  node(id: $subjectId) {
    ... on Issue {
      title
      projectItems(first: $first) {
        nodes {
          project {
            url
            title
          }
        }
      }
    }
    ... on PullRequest {
      title
      projectItems(first: $first) {
        nodes {
          project {
            url
            title
          }
        }
      }
    }
  }
}
"#;

// ---------------------------------------------------------------------------
// Response shape
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SubjectBoardsData {
    node: Option<SubjectNode>,
}

/// Both fragments resolve to the same fields. A node of any other type comes
/// back as `{}`, leaving `title` empty.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubjectNode {
    title: Option<String>,
    #[serde(default)]
    project_items: Option<ItemConnection>,
}

#[derive(Debug, Default, Deserialize)]
struct ItemConnection {
    #[serde(default)]
    nodes: Vec<Option<ProjectItem>>,
}

#[derive(Debug, Deserialize)]
struct ProjectItem {
    project: Option<ProjectRef>,
}

#[derive(Debug, Deserialize)]
struct ProjectRef {
    url: String,
    title: String,
}

impl CorrelationQuery {
    fn variables(&self) -> Value {
        json!({
            "subjectId": self.subject_node_id.as_str(),
            "first": MAX_ASSOCIATIONS,
        })
    }

    /// Decodes the `data` member of a [`SUBJECT_BOARDS_QUERY`] response.
    fn parse_response(&self, data: Value) -> Result<CorrelationResult, CorrelationQueryError> {
        let data: SubjectBoardsData =
            serde_json::from_value(data).map_err(|e| CorrelationQueryError::MalformedResponse {
                message: e.to_string(),
            })?;
        let node = data
            .node
            .ok_or_else(|| CorrelationQueryError::SubjectNotFound {
                node_id: self.subject_node_id.clone(),
            })?;
        let title = node
            .title
            .ok_or_else(|| CorrelationQueryError::MalformedResponse {
                message: format!(
                    "node {} is neither an issue nor a pull request",
                    self.subject_node_id
                ),
            })?;

        // Items whose project is hidden from the installation come back null.
        let associations = node
            .project_items
            .unwrap_or_default()
            .nodes
            .into_iter()
            .flatten()
            .filter_map(|item| item.project)
            .map(|project| BoardAssociation {
                board_url: project.url,
                board_title: project.title,
            });
        Ok(CorrelationResult::new(title, associations))
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// Handles [`ISSUE_COMMENT_CREATED`] events.
pub struct CommentCorrelationHandler {
    decision: Arc<dyn DecisionStep>,
}

impl CommentCorrelationHandler {
    pub fn new(decision: Arc<dyn DecisionStep>) -> Self {
        Self { decision }
    }

    /// Extracts the subject from `event` and fetches its board memberships.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::MalformedPayload`] if `comment.body` or
    ///   `issue.node_id` is missing.
    /// - [`DeliveryError::CorrelationQuery`] if the query fails.
    pub async fn correlate(
        &self,
        event: &InboundEvent,
        session: &dyn QuerySession,
    ) -> Result<CorrelationResult, DeliveryError> {
        let comment_body = event.str_field("/comment/body")?;
        let subject_node_id = SubjectNodeId::new(event.str_field("/issue/node_id")?)
            .ok_or_else(|| DeliveryError::malformed("issue.node_id"))?;
        debug!(comment = comment_body, subject = %subject_node_id, "Comment created");

        let query = CorrelationQuery { subject_node_id };
        let data = session
            .graphql(SUBJECT_BOARDS_QUERY, query.variables())
            .await?;
        Ok(query.parse_response(data)?)
    }
}

impl std::fmt::Debug for CommentCorrelationHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommentCorrelationHandler")
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventHandler for CommentCorrelationHandler {
    fn name(&self) -> &str {
        "comment_correlation"
    }

    async fn handle(
        &self,
        event: &InboundEvent,
        session: &dyn QuerySession,
    ) -> Result<(), DeliveryError> {
        let result = self.correlate(event, session).await?;
        let action = self.decision.decide(&result);
        info!(
            subject = result.subject_title(),
            boards = result.associations().len(),
            action = ?action,
            "Correlated comment with project boards"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::{
        Action, Delivery, DeliveryId, DeliveryOutcome, DeliveryVerifier, ErrorSink, EventName,
        EventRouter, InstallationId,
    };

    // -- fakes ---------------------------------------------------------------

    /// Answers queries from a table keyed by subject id; unknown subjects get
    /// a transport error. Yields once per query so concurrent deliveries
    /// interleave.
    #[derive(Default)]
    struct ScriptedSession {
        responses: HashMap<String, Value>,
        seen_variables: Mutex<Vec<Value>>,
    }

    impl ScriptedSession {
        fn with(mut self, subject: &str, node: Value) -> Self {
            self.responses
                .insert(subject.into(), json!({ "node": node }));
            self
        }
    }

    #[async_trait]
    impl QuerySession for ScriptedSession {
        fn installation_id(&self) -> Option<InstallationId> {
            None
        }

        async fn graphql(
            &self,
            query: &str,
            variables: Value,
        ) -> Result<Value, CorrelationQueryError> {
            assert!(query.contains("projectItems(first: $first)"));
            tokio::task::yield_now().await;
            self.seen_variables.lock().unwrap().push(variables.clone());
            let subject = variables["subjectId"].as_str().unwrap_or_default();
            self.responses
                .get(subject)
                .cloned()
                .ok_or_else(|| CorrelationQueryError::Transport {
                    message: format!("connection reset while querying {subject}"),
                })
        }
    }

    #[derive(Default)]
    struct RecordingDecision(Mutex<Vec<CorrelationResult>>);

    impl DecisionStep for RecordingDecision {
        fn decide(&self, result: &CorrelationResult) -> Action {
            self.0.lock().unwrap().push(result.clone());
            Action::NoAction
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<DeliveryError>>);

    impl ErrorSink for RecordingSink {
        fn report(&self, error: &DeliveryError) {
            self.0.lock().unwrap().push(error.clone());
        }
    }

    struct AcceptAll;

    impl DeliveryVerifier for AcceptAll {
        fn verify(&self, _: &[u8], _: &str) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn comment_event(body: Value) -> InboundEvent {
        InboundEvent::new(
            EventName::new("issue_comment").unwrap(),
            DeliveryId::new("d-1").unwrap(),
            body,
        )
    }

    fn comment_payload(node_id: &str) -> Value {
        json!({
            "action": "created",
            "comment": { "body": "looks good" },
            "issue": { "node_id": node_id },
        })
    }

    fn project_item(url: &str, title: &str) -> Value {
        json!({ "project": { "url": url, "title": title } })
    }

    fn fix_bug_node() -> Value {
        json!({
            "title": "Fix bug",
            "projectItems": { "nodes": [project_item("https://x/1", "Sprint")] }
        })
    }

    // -- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn comment_is_correlated_with_its_board() {
        let session = ScriptedSession::default().with("I_123", fix_bug_node());
        let handler = CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()));

        let result = handler
            .correlate(&comment_event(comment_payload("I_123")), &session)
            .await
            .unwrap();

        assert_eq!(
            result,
            CorrelationResult::new(
                "Fix bug",
                [BoardAssociation {
                    board_url: "https://x/1".into(),
                    board_title: "Sprint".into(),
                }]
            )
        );
        assert_eq!(
            session.seen_variables.lock().unwrap()[0],
            json!({ "subjectId": "I_123", "first": 5 })
        );
    }

    #[tokio::test]
    async fn handle_passes_result_to_decision_step() {
        let session = ScriptedSession::default().with("I_123", fix_bug_node());
        let decision = Arc::new(RecordingDecision::default());
        let handler = CommentCorrelationHandler::new(decision.clone());

        handler
            .handle(&comment_event(comment_payload("I_123")), &session)
            .await
            .unwrap();

        let decided = decision.0.lock().unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].subject_title(), "Fix bug");
    }

    #[tokio::test]
    async fn oversized_membership_lists_are_truncated() {
        let nodes: Vec<Value> = (1..=9)
            .map(|n| project_item(&format!("https://x/{n}"), &format!("P{n}")))
            .collect();
        let session = ScriptedSession::default().with(
            "I_big",
            json!({ "title": "Epic", "projectItems": { "nodes": nodes } }),
        );
        let handler = CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()));

        let result = handler
            .correlate(&comment_event(comment_payload("I_big")), &session)
            .await
            .unwrap();

        assert_eq!(result.associations().len(), MAX_ASSOCIATIONS);
        assert_eq!(result.associations()[4].board_title, "P5");
    }

    #[tokio::test]
    async fn hidden_projects_are_skipped() {
        let visible = project_item("https://x/2", "Visible");
        let session = ScriptedSession::default().with(
            "I_1",
            json!({
                "title": "Partly visible",
                "projectItems": { "nodes": [null, { "project": null }, visible] }
            }),
        );
        let handler = CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()));

        let result = handler
            .correlate(&comment_event(comment_payload("I_1")), &session)
            .await
            .unwrap();

        assert_eq!(result.associations().len(), 1);
        assert_eq!(result.associations()[0].board_title, "Visible");
    }

    #[tokio::test]
    async fn missing_node_id_is_malformed() {
        let session = ScriptedSession::default();
        let handler = CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()));
        let payload = json!({ "action": "created", "comment": { "body": "hi" }, "issue": {} });
        let event = comment_event(payload);

        let err = handler.correlate(&event, &session).await.unwrap_err();

        assert_eq!(err, DeliveryError::malformed("issue.node_id"));
        assert!(session.seen_variables.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_comment_body_is_malformed() {
        let session = ScriptedSession::default();
        let handler = CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()));
        let event = comment_event(json!({ "action": "created", "issue": { "node_id": "I_1" } }));

        let err = handler.correlate(&event, &session).await.unwrap_err();

        assert_eq!(err, DeliveryError::malformed("comment.body"));
    }

    #[tokio::test]
    async fn null_node_is_subject_not_found() {
        let session = ScriptedSession::default().with("I_gone", Value::Null);
        let handler = CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()));

        let err = handler
            .correlate(&comment_event(comment_payload("I_gone")), &session)
            .await
            .unwrap_err();

        assert_eq!(
            err,
            DeliveryError::CorrelationQuery(CorrelationQueryError::SubjectNotFound {
                node_id: SubjectNodeId::new("I_gone").unwrap()
            })
        );
    }

    #[tokio::test]
    async fn node_of_other_type_is_malformed_response() {
        let session = ScriptedSession::default().with("D_1", json!({}));
        let handler = CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()));

        let err = handler
            .correlate(&comment_event(comment_payload("D_1")), &session)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DeliveryError::CorrelationQuery(CorrelationQueryError::MalformedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn failed_query_does_not_affect_concurrent_delivery() {
        let session = Arc::new(ScriptedSession::default().with("I_123", fix_bug_node()));
        let decision = Arc::new(RecordingDecision::default());
        let sink = Arc::new(RecordingSink::default());
        let router = EventRouter::new(Arc::new(AcceptAll), session, sink.clone()).on(
            EventName::new(ISSUE_COMMENT_CREATED).unwrap(),
            Arc::new(CommentCorrelationHandler::new(decision.clone())),
        );
        let delivery = |node_id: &str| Delivery {
            event: "issue_comment".into(),
            signature: Some("sha256=any".into()),
            delivery_id: DeliveryId::new(format!("d-{node_id}")),
            body: serde_json::to_vec(&comment_payload(node_id)).unwrap(),
        };

        let (failed, succeeded) = tokio::join!(
            router.handle_delivery(delivery("I_unreachable")),
            router.handle_delivery(delivery("I_123")),
        );

        assert_eq!(failed, DeliveryOutcome::Failed);
        assert_eq!(succeeded, DeliveryOutcome::Handled { handlers: 1 });
        let reports = sink.0.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(matches!(
            reports[0],
            DeliveryError::CorrelationQuery(CorrelationQueryError::Transport { .. })
        ));
        let decided = decision.0.lock().unwrap();
        assert_eq!(decided.len(), 1);
        assert_eq!(decided[0].subject_title(), "Fix bug");
        assert_eq!(decided[0].associations()[0].board_url, "https://x/1");
    }

    #[tokio::test]
    async fn malformed_payload_is_reported_once_and_router_keeps_serving() {
        let session = Arc::new(ScriptedSession::default().with("I_123", fix_bug_node()));
        let sink = Arc::new(RecordingSink::default());
        let router = EventRouter::new(Arc::new(AcceptAll), session, sink.clone()).on(
            EventName::new(ISSUE_COMMENT_CREATED).unwrap(),
            Arc::new(CommentCorrelationHandler::new(Arc::new(RecordingDecision::default()))),
        );
        let payload = json!({ "action": "created", "comment": { "body": "x" }, "issue": {} });
        let broken = Delivery {
            event: "issue_comment".into(),
            signature: Some("sha256=any".into()),
            delivery_id: DeliveryId::new("d-broken"),
            body: serde_json::to_vec(&payload).unwrap(),
        };
        let good = Delivery {
            delivery_id: DeliveryId::new("d-good"),
            body: serde_json::to_vec(&comment_payload("I_123")).unwrap(),
            ..broken.clone()
        };

        assert_eq!(
            router.handle_delivery(broken).await,
            DeliveryOutcome::Failed
        );
        assert_eq!(
            router.handle_delivery(good).await,
            DeliveryOutcome::Handled { handlers: 1 }
        );
        assert_eq!(
            *sink.0.lock().unwrap(),
            vec![DeliveryError::malformed("issue.node_id")]
        );
    }
}
