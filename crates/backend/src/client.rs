use chrono::{DateTime, Utc};
use snafu::ResultExt;

use cordial_session::{ChatId, ChatInfo, MessageId, SessionId};

use crate::error::{BackendResult, RequestSnafu, StatusSnafu};
use crate::types::{
    AgentChatRequest, ChatSnapshot, FollowUpsRequest, FollowUpsResponse, HistoryEntry,
    InitialLoadResponse, SeenRequest,
};

/// Thin client over the collaborator backend's REST surface.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Fetches the initial chat + messages + unseen-count snapshot.
    pub async fn fetch_snapshot(
        &self,
        embed_id: &str,
        session_id: &SessionId,
    ) -> BackendResult<ChatSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("/api/chat/{embed_id}/{session_id}")))
            .send()
            .await
            .context(RequestSnafu {
                stage: "fetch-snapshot",
            })?;
        let response = ensure_success("fetch-snapshot-status", response).await?;
        response.json().await.context(crate::error::DecodeSnafu {
            stage: "fetch-snapshot-decode",
        })
    }

    /// Clears server-side history for the session. 2xx means the caller may
    /// refetch a fresh thread.
    pub async fn clear_history(&self, embed_id: &str, session_id: &SessionId) -> BackendResult<()> {
        let response = self
            .http
            .delete(self.url(&format!("/api/chat/{embed_id}/{session_id}")))
            .send()
            .await
            .context(RequestSnafu {
                stage: "clear-history",
            })?;
        ensure_success("clear-history-status", response).await?;
        Ok(())
    }

    /// Acknowledges one message as seen, tagged with the client timestamp.
    pub async fn acknowledge_seen(
        &self,
        message_id: &MessageId,
        seen_at: DateTime<Utc>,
    ) -> BackendResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/seen/{message_id}")))
            .json(&SeenRequest { seen_at })
            .send()
            .await
            .context(RequestSnafu {
                stage: "acknowledge-seen",
            })?;
        ensure_success("acknowledge-seen-status", response).await?;
        Ok(())
    }

    /// Requests suggested quick replies for the given history.
    pub async fn generate_follow_ups(
        &self,
        history: Vec<HistoryEntry>,
    ) -> BackendResult<Vec<String>> {
        let response = self
            .http
            .post(self.url("/api/generatefollowups"))
            .json(&FollowUpsRequest { history })
            .send()
            .await
            .context(RequestSnafu {
                stage: "generate-follow-ups",
            })?;
        let response = ensure_success("generate-follow-ups-status", response).await?;
        let decoded: FollowUpsResponse =
            response.json().await.context(crate::error::DecodeSnafu {
                stage: "generate-follow-ups-decode",
            })?;
        Ok(decoded.follow_ups)
    }

    /// Asks the backend to materialize the bot-configured intro messages for
    /// a freshly opened chat. Returns the updated chat metadata when present.
    pub async fn initial_load(
        &self,
        chat_id: &ChatId,
        embed_id: &str,
    ) -> BackendResult<Option<ChatInfo>> {
        let response = self
            .http
            .post(self.url(&format!("/api/initialload/{chat_id}/{embed_id}")))
            .send()
            .await
            .context(RequestSnafu {
                stage: "initial-load",
            })?;
        let response = ensure_success("initial-load-status", response).await?;
        let decoded: InitialLoadResponse =
            response.json().await.context(crate::error::DecodeSnafu {
                stage: "initial-load-decode",
            })?;
        Ok(decoded.chat)
    }

    /// Persists a user message while a human agent has the chat. No
    /// generation is triggered by this call.
    pub async fn post_agent_message(
        &self,
        embed_id: &str,
        session_id: &SessionId,
        request: &AgentChatRequest,
    ) -> BackendResult<()> {
        let response = self
            .http
            .post(self.url(&format!("/api/chat/{embed_id}/{session_id}")))
            .json(request)
            .send()
            .await
            .context(RequestSnafu {
                stage: "post-agent-message",
            })?;
        ensure_success("post-agent-message-status", response).await?;
        Ok(())
    }
}

pub(crate) async fn ensure_success(
    stage: &'static str,
    response: reqwest::Response,
) -> BackendResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    StatusSnafu {
        stage,
        status: status.as_u16(),
        body,
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::error::BackendError;

    fn session() -> SessionId {
        SessionId::from("session-1")
    }

    #[tokio::test]
    async fn fetch_snapshot_decodes_chat_and_messages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/chat/embed-1/session-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "chat": {"id": "chat-1", "hasLoadedInitialMessages": true},
                "messages": [
                    {"id": "m1", "role": "assistant", "content": "Hi there!",
                     "createdAt": "2024-05-01T10:00:00.000+00:00"}
                ],
                "unseenMessagesCount": 1
            })))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let snapshot = client.fetch_snapshot("embed-1", &session()).await.unwrap();

        assert_eq!(snapshot.chat.unwrap().id.as_str(), "chat-1");
        assert_eq!(snapshot.messages.len(), 1);
        assert_eq!(snapshot.unseen_messages_count, 1);
    }

    #[tokio::test]
    async fn clear_history_maps_failure_status_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/api/chat/embed-1/session-1"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let error = client
            .clear_history("embed-1", &session())
            .await
            .unwrap_err();
        assert!(matches!(error, BackendError::Status { status: 500, .. }));
    }

    #[tokio::test]
    async fn acknowledge_seen_posts_client_timestamp() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/seen/m1"))
            .and(body_string_contains("seenAt"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let seen_at = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        client
            .acknowledge_seen(&MessageId::from("m1"), seen_at)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn generate_follow_ups_returns_suggestions() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generatefollowups"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"followUps": ["What about pricing?", "Contact support"]}),
            ))
            .mount(&server)
            .await;

        let client = ApiClient::new(server.uri());
        let follow_ups = client
            .generate_follow_ups(vec![HistoryEntry {
                role: cordial_session::Role::User,
                content: "hi".to_string(),
            }])
            .await
            .unwrap();
        assert_eq!(follow_ups.len(), 2);
    }
}
