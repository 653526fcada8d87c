//! Typed REST client for the chat backend.
//!
//! Thin wrapper over `reqwest` that owns the base URL and a rotating bearer
//! token. Every method maps HTTP 401 to [`NetError::CredentialExpired`] and,
//! for room-scoped endpoints, 403 to [`NetError::PermissionDenied`].

use std::sync::{Arc, RwLock};

use reqwest::StatusCode;
use tracing::debug;

use wardline_shared::protocol::{
    MessagePage, ParticipantRecord, RawMessage, RoomRecord, UnreadCountResponse,
};
use wardline_shared::{RoomId, UserId};

use crate::error::{NetError, Result};

/// Client for the chat REST API.
#[derive(Debug, Clone)]
pub struct ChatApi {
    http: reqwest::Client,
    base_url: String,
    token: Arc<RwLock<String>>,
}

impl ChatApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            token: Arc::new(RwLock::new(token.into())),
        }
    }

    /// Swap the bearer token. Takes effect on the next request.
    pub fn update_credential(&self, token: impl Into<String>) {
        *self.token.write().expect("token lock poisoned") = token.into();
    }

    fn bearer(&self) -> String {
        self.token.read().expect("token lock poisoned").clone()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Check the bearer token against the backend. `Ok(())` means valid.
    pub async fn verify_token(&self) -> Result<()> {
        let resp = self
            .http
            .get(self.url("/api/v1/auth/verify-token"))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        self.ensure_ok(resp, None).await?;
        Ok(())
    }

    /// All rooms the user belongs to.
    pub async fn list_rooms(&self, user: &UserId) -> Result<Vec<RoomRecord>> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/chat/rooms/user/{user}")))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        let resp = self.ensure_ok(resp, None).await?;
        Ok(resp.json().await?)
    }

    pub async fn get_room(&self, room: &RoomId) -> Result<RoomRecord> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/chat/rooms/{room}")))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        let resp = self.ensure_ok(resp, Some(room)).await?;
        Ok(resp.json().await?)
    }

    pub async fn get_participants(&self, room: &RoomId) -> Result<Vec<ParticipantRecord>> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/chat/rooms/{room}/participants")))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        let resp = self.ensure_ok(resp, Some(room)).await?;
        Ok(resp.json().await?)
    }

    /// One page of room history. `sort` is a `field,direction` pair as the
    /// backend's paging layer expects, e.g. `timestamp,asc`.
    pub async fn get_messages(
        &self,
        room: &RoomId,
        user: &UserId,
        page: u32,
        size: u32,
        sort: &str,
    ) -> Result<MessagePage> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/chat/rooms/{room}/messages")))
            .query(&[
                ("page", page.to_string()),
                ("size", size.to_string()),
                ("userId", user.to_string()),
                ("sort", sort.to_owned()),
            ])
            .bearer_auth(self.bearer())
            .send()
            .await?;
        let resp = self.ensure_ok(resp, Some(room)).await?;
        Ok(resp.json().await?)
    }

    /// Fetch a single message, used to backfill attachment URLs the push
    /// payload omits.
    pub async fn get_message(&self, room: &RoomId, message_id: &str) -> Result<RawMessage> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/chat/rooms/{room}/messages/{message_id}")))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        let resp = self.ensure_ok(resp, Some(room)).await?;
        Ok(resp.json().await?)
    }

    pub async fn delete_message(&self, room: &RoomId, message_id: &str) -> Result<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/api/v1/chat/rooms/{room}/messages/{message_id}")))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        self.ensure_ok(resp, Some(room)).await?;
        Ok(())
    }

    /// Mark every message in the room read for `user`.
    pub async fn mark_read(&self, room: &RoomId, user: &UserId) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/chat/rooms/{room}/read")))
            .bearer_auth(self.bearer())
            .json(&serde_json::json!({ "userId": user }))
            .send()
            .await?;
        self.ensure_ok(resp, Some(room)).await?;
        Ok(())
    }

    pub async fn unread_count(&self, room: &RoomId) -> Result<u32> {
        let resp = self
            .http
            .get(self.url(&format!("/api/v1/chat/rooms/{room}/unread-count")))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        let resp = self.ensure_ok(resp, Some(room)).await?;
        let body: UnreadCountResponse = resp.json().await?;
        Ok(body.unread_count)
    }

    /// Upload a file into the room. The backend creates the attachment
    /// message itself and pushes it on the room channel.
    pub async fn upload_attachment(
        &self,
        room: &RoomId,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<()> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_owned());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/chat/rooms/{room}/attachments")))
            .bearer_auth(self.bearer())
            .multipart(form)
            .send()
            .await?;
        self.ensure_ok(resp, Some(room)).await?;
        Ok(())
    }

    /// Create (or return the existing) one-to-one room between two employees.
    pub async fn create_direct_room(
        &self,
        employee1: &UserId,
        employee2: &UserId,
    ) -> Result<RoomRecord> {
        let resp = self
            .http
            .post(self.url("/api/v1/chat/direct"))
            .bearer_auth(self.bearer())
            .json(&serde_json::json!({
                "employee1Id": employee1,
                "employee2Id": employee2,
            }))
            .send()
            .await?;
        let resp = self.ensure_ok(resp, None).await?;
        Ok(resp.json().await?)
    }

    pub async fn create_group_room(
        &self,
        name: &str,
        participant_ids: &[UserId],
    ) -> Result<RoomRecord> {
        let resp = self
            .http
            .post(self.url("/api/v1/chat/group"))
            .bearer_auth(self.bearer())
            .json(&serde_json::json!({
                "name": name,
                "participantIds": participant_ids,
            }))
            .send()
            .await?;
        let resp = self.ensure_ok(resp, None).await?;
        Ok(resp.json().await?)
    }

    /// Invite one employee into an existing group room.
    pub async fn invite(&self, room: &RoomId, employee: &UserId) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/chat/rooms/{room}/invite")))
            .bearer_auth(self.bearer())
            .json(&serde_json::json!({ "employeeId": employee }))
            .send()
            .await?;
        self.ensure_ok(resp, Some(room)).await?;
        Ok(())
    }

    pub async fn exit_room(&self, room: &RoomId) -> Result<()> {
        let resp = self
            .http
            .post(self.url(&format!("/api/v1/chat/rooms/{room}/exit")))
            .bearer_auth(self.bearer())
            .send()
            .await?;
        self.ensure_ok(resp, Some(room)).await?;
        Ok(())
    }

    /// Cheap membership probe: fetch a single message and fold 403 into
    /// `Ok(false)` instead of an error.
    pub async fn probe_access(&self, room: &RoomId, user: &UserId) -> Result<bool> {
        match self.get_messages(room, user, 0, 1, "timestamp,desc").await {
            Ok(_) => Ok(true),
            Err(NetError::PermissionDenied(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn ensure_ok(
        &self,
        resp: reqwest::Response,
        room: Option<&RoomId>,
    ) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let path = resp.url().path().to_owned();
        debug!(status = %status, path = %path, "Request rejected");
        match status {
            StatusCode::UNAUTHORIZED => Err(NetError::CredentialExpired),
            StatusCode::FORBIDDEN => match room {
                Some(room) => Err(NetError::PermissionDenied(room.clone())),
                None => Err(NetError::UnexpectedStatus {
                    status: status.as_u16(),
                    path,
                }),
            },
            _ => Err(NetError::UnexpectedStatus {
                status: status.as_u16(),
                path,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> ChatApi {
        ChatApi::new(server.uri(), "token-1")
    }

    #[tokio::test]
    async fn get_messages_sends_paging_params() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chat/rooms/9/messages"))
            .and(query_param("page", "2"))
            .and(query_param("size", "100"))
            .and(query_param("sort", "timestamp,asc"))
            .and(query_param("userId", "u7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [],
                "totalPages": 3,
            })))
            .mount(&server)
            .await;

        let page = api(&server)
            .get_messages(&RoomId::from("9"), &UserId::from("u7"), 2, 100, "timestamp,asc")
            .await
            .unwrap();
        assert_eq!(page.total_pages, 3);
        assert!(page.content.is_empty());
    }

    #[tokio::test]
    async fn unauthorized_maps_to_credential_expired() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/verify-token"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let err = api(&server).verify_token().await.unwrap_err();
        assert!(matches!(err, NetError::CredentialExpired));
    }

    #[tokio::test]
    async fn forbidden_room_maps_to_permission_denied() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chat/rooms/5/messages"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let err = api(&server)
            .get_messages(&RoomId::from("5"), &UserId::from("u1"), 0, 1, "timestamp,desc")
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::PermissionDenied(room) if room == RoomId::from("5")));
    }

    #[tokio::test]
    async fn probe_access_folds_forbidden_into_false() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/chat/rooms/5/messages"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let allowed = api(&server)
            .probe_access(&RoomId::from("5"), &UserId::from("u1"))
            .await
            .unwrap();
        assert!(!allowed);
    }

    #[tokio::test]
    async fn mark_read_posts_user_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/rooms/3/read"))
            .and(body_json(serde_json::json!({ "userId": "u1" })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        api(&server)
            .mark_read(&RoomId::from("3"), &UserId::from("u1"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn rotated_credential_rides_on_next_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/auth/verify-token"))
            .and(wiremock::matchers::header("authorization", "Bearer token-2"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let api = api(&server);
        api.update_credential("token-2");
        api.verify_token().await.unwrap();
    }

    #[tokio::test]
    async fn create_direct_room_returns_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/direct"))
            .and(body_json(serde_json::json!({
                "employee1Id": "u1",
                "employee2Id": "u2",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "42",
                "displayName": "Dr. Kim",
            })))
            .mount(&server)
            .await;

        let room = api(&server)
            .create_direct_room(&UserId::from("u1"), &UserId::from("u2"))
            .await
            .unwrap();
        assert_eq!(room.id, "42");
    }
}
