// followguard/src/query_api.rs
//
// Query API for admin tooling and the product backend.
//
// Frame format (both directions):
//   [4 bytes little-endian length] [JSON payload]
//
// Requests are tagged by `op`:
//   {"op":"get_user_risk_score","user_id":"alice"}
//   {"op":"ban_user","admin_id":"mod-7","user_id":"alice","reason":"fake followers"}
//   {"op":"get_fraud_dashboard","filter":{"max_risk_score":50}}
//
// Every response is {"ok":true,"data":…} or
// {"ok":false,"error":{"kind":"not_found","message":…}}.
//
// Bind address defaults to 127.0.0.1:50051.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::dashboard::{DashboardFilter, TrendsFilter};
use crate::error::FraudError;
use crate::events::FollowerEvent;
use crate::ingest::IngestOutcome;
use crate::service::FraudService;

const MAX_FRAME: usize = 1_048_576;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum QueryRequest {
    IngestEvent { event: FollowerEvent },
    GetUserRiskScore { user_id: String },
    RecomputeUser { user_id: String },
    GetFraudDashboard { #[serde(default)] filter: DashboardFilter },
    GetFraudTrends { #[serde(default)] filter: TrendsFilter },
    ReviewUser { admin_id: String, user_id: String, #[serde(default)] notes: String },
    BanUser { admin_id: String, user_id: String, reason: String, #[serde(default)] notes: String },
    ClearUser { admin_id: String, user_id: String, #[serde(default)] notes: String },
    GetUserReviews { user_id: String },
    TriggerBatchAnalysis { date_from: Option<DateTime<Utc>>, date_to: Option<DateTime<Utc>> },
    GetBatchJob { job_id: String },
    ListBatchJobs,
    CancelBatchJob { job_id: String },
    GetUserBadgeStatus { user_id: String },
    ActivateBadge { user_id: String },
    GetUserBotNotifications { user_id: String, #[serde(default)] unread_only: bool },
    MarkNotificationAsRead { notification_id: String },
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ErrorBody {
    pub kind:    String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl QueryResponse {
    fn from_result<T: Serialize>(r: std::result::Result<T, FraudError>) -> Self {
        match r.and_then(|v| serde_json::to_value(v).map_err(FraudError::from)) {
            Ok(data) => Self { ok: true, data: Some(data), error: None },
            Err(e)   => Self {
                ok:    false,
                data:  None,
                error: Some(ErrorBody { kind: e.kind().to_string(), message: e.to_string() }),
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct JobAccepted {
    job_id: String,
    status: crate::events::JobStatus,
}

#[derive(Debug, Serialize)]
struct IngestAck {
    inserted: bool,
    event_id: Option<String>,
}

// ── Server ────────────────────────────────────────────────────────────────────

pub struct QueryServer {
    service: Arc<FraudService>,
    addr:    SocketAddr,
}

impl QueryServer {
    pub fn new(service: Arc<FraudService>, addr: SocketAddr) -> Self {
        Self { service, addr }
    }

    pub async fn serve(self: Arc<Self>) -> Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "Query API listening");

        loop {
            let (stream, peer) = listener.accept().await?;
            let srv = Arc::clone(&self);
            tokio::spawn(async move {
                if let Err(e) = srv.handle_connection(stream).await {
                    warn!(peer = %peer, error = %e, "Query API connection error");
                }
            });
        }
    }

    async fn handle_connection(&self, mut stream: TcpStream) -> Result<()> {
        loop {
            let mut len_buf = [0u8; 4];
            match stream.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME { anyhow::bail!("frame too large: {} bytes", len); }

            let mut body = vec![0u8; len];
            stream.read_exact(&mut body).await?;

            let resp = match serde_json::from_slice::<QueryRequest>(&body) {
                Ok(req) => self.handle(req),
                Err(e)  => QueryResponse::from_result::<()>(Err(FraudError::Validation(format!("bad request: {e}")))),
            };
            let resp_bytes = serde_json::to_vec(&resp)?;

            let resp_len = resp_bytes.len() as u32;
            stream.write_all(&resp_len.to_le_bytes()).await?;
            stream.write_all(&resp_bytes).await?;
        }
        Ok(())
    }

    pub fn handle(&self, req: QueryRequest) -> QueryResponse {
        let s = &self.service;
        match req {
            QueryRequest::IngestEvent { event } => QueryResponse::from_result(s.ingest_event(event).map(|o| match o {
                IngestOutcome::Inserted { event_id } => IngestAck { inserted: true, event_id: Some(event_id) },
                IngestOutcome::Duplicate             => IngestAck { inserted: false, event_id: None },
            })),
            QueryRequest::GetUserRiskScore { user_id } => QueryResponse::from_result(s.get_user_risk_score(&user_id)),
            QueryRequest::RecomputeUser { user_id }    => QueryResponse::from_result(s.recompute_user(&user_id)),
            QueryRequest::GetFraudDashboard { filter } => QueryResponse::from_result(s.get_fraud_dashboard(&filter)),
            QueryRequest::GetFraudTrends { filter }    => QueryResponse::from_result(s.get_fraud_trends(&filter)),
            QueryRequest::ReviewUser { admin_id, user_id, notes } =>
                QueryResponse::from_result(s.review_user(&admin_id, &user_id, &notes)),
            QueryRequest::BanUser { admin_id, user_id, reason, notes } =>
                QueryResponse::from_result(s.ban_user(&admin_id, &user_id, &reason, &notes)),
            QueryRequest::ClearUser { admin_id, user_id, notes } =>
                QueryResponse::from_result(s.clear_user(&admin_id, &user_id, &notes)),
            QueryRequest::GetUserReviews { user_id } => QueryResponse::from_result(s.get_user_reviews(&user_id)),
            QueryRequest::TriggerBatchAnalysis { date_from, date_to } =>
                QueryResponse::from_result(s.trigger_batch_analysis(date_from, date_to).map(|h| JobAccepted {
                    job_id: h.job_id,
                    status: h.status,
                })),
            QueryRequest::GetBatchJob { job_id }    => QueryResponse::from_result(s.get_batch_job(&job_id)),
            QueryRequest::ListBatchJobs             => QueryResponse::from_result(s.list_batch_jobs()),
            QueryRequest::CancelBatchJob { job_id } => QueryResponse::from_result(s.cancel_batch_job(&job_id)),
            QueryRequest::GetUserBadgeStatus { user_id } => QueryResponse::from_result(s.get_user_badge_status(&user_id)),
            QueryRequest::ActivateBadge { user_id }      => QueryResponse::from_result(s.activate_badge(&user_id)),
            QueryRequest::GetUserBotNotifications { user_id, unread_only } =>
                QueryResponse::from_result(s.get_user_bot_notifications(&user_id, unread_only)),
            QueryRequest::MarkNotificationAsRead { notification_id } =>
                QueryResponse::from_result(s.mark_notification_as_read(&notification_id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FraudConfig;
    use crate::profiles::ProfileDirectory;
    use crate::service::ServiceOptions;
    use crate::state::MemoryStore;
    use crate::workers::testutil::at;

    fn server() -> QueryServer {
        let service = FraudService::new(
            FraudConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(ProfileDirectory::new()),
            Arc::new(ManualClock::new(at(0))),
            ServiceOptions::default(),
        )
        .unwrap();
        QueryServer::new(service, "127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn requests_parse_by_op_tag() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"op":"get_user_bot_notifications","user_id":"alice"}"#).unwrap();
        assert!(matches!(req, QueryRequest::GetUserBotNotifications { unread_only: false, .. }));
        let req: QueryRequest = serde_json::from_str(r#"{"op":"list_batch_jobs"}"#).unwrap();
        assert!(matches!(req, QueryRequest::ListBatchJobs));
    }

    #[test]
    fn missing_score_maps_to_not_found() {
        let resp = server().handle(QueryRequest::GetUserRiskScore { user_id: "ghost".into() });
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().kind, "not_found");
    }

    #[test]
    fn ban_round_trips_through_handler() {
        let srv = server();
        let resp = srv.handle(QueryRequest::BanUser {
            admin_id: "mod-7".into(),
            user_id:  "alice".into(),
            reason:   "fake followers".into(),
            notes:    String::new(),
        });
        assert!(resp.ok);
        let badge = srv.handle(QueryRequest::GetUserBadgeStatus { user_id: "alice".into() });
        assert_eq!(badge.data.unwrap()["status"], "revoked");
    }

    #[tokio::test]
    async fn serves_length_prefixed_frames() {
        let srv = Arc::new(server());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = srv.clone();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            handler.handle_connection(stream).await.unwrap();
        });

        let mut client = TcpStream::connect(addr).await.unwrap();
        let body = br#"{"op":"list_batch_jobs"}"#;
        client.write_all(&(body.len() as u32).to_le_bytes()).await.unwrap();
        client.write_all(body).await.unwrap();

        let mut len = [0u8; 4];
        client.read_exact(&mut len).await.unwrap();
        let mut resp = vec![0u8; u32::from_le_bytes(len) as usize];
        client.read_exact(&mut resp).await.unwrap();
        let resp: QueryResponse = serde_json::from_slice(&resp).unwrap();
        assert!(resp.ok);
        assert_eq!(resp.data.unwrap(), serde_json::json!([]));
    }
}
