use crate::model::Envelope;
use reqwest::{Client, Method, Request, StatusCode, Url};
use std::{
    fmt,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Client for the single game endpoint. Every call is a parameterized GET
/// carrying the credential and a cache-busting `t` timestamp; the server
/// multiplexes reads and mutations on the `action` query parameter.
#[derive(Clone, Debug)]
pub struct GameClient {
    http: Client,
    base_url: Url,
}

#[derive(Clone, Debug)]
pub struct GameClientBuilder {
    base_url: String,
    timeout: Duration,
}

impl GameClientBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn build(self) -> Result<GameClient, ApiError> {
        let base_url = self.base_url.trim();
        if base_url.is_empty() {
            return Err(ApiError::Config("api base url must not be empty"));
        }
        let parsed = Url::parse(base_url).map_err(|err| ApiError::Url(err.to_string()))?;
        let http = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(ApiError::Http)?;
        Ok(GameClient {
            http,
            base_url: parsed,
        })
    }
}

/// Mutating-call discriminator plus the status read, which rides the same
/// `action` parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Buy,
    UseShield,
    StartAttack,
    AddClicks,
    FinalizeAttack,
    AttackStatus,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::UseShield => "USE_SHIELD",
            Self::StartAttack => "START_ATTACK",
            Self::AddClicks => "ADD_CLICKS",
            Self::FinalizeAttack => "FINALIZE_ATTACK",
            Self::AttackStatus => "ATTACK_STATUS",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActionParams {
    pub item_id: Option<String>,
    pub qty: Option<u32>,
    pub target_team_id: Option<String>,
    pub attacker_team_id: Option<String>,
    pub clicks: Option<u64>,
}

/// One fully-specified call against the endpoint.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub kind: ActionKind,
    pub student_id: String,
    pub credential: String,
    pub params: ActionParams,
}

impl GameClient {
    pub fn builder(base_url: impl Into<String>) -> GameClientBuilder {
        GameClientBuilder::new(base_url)
    }

    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        Self::builder(base_url).build()
    }

    pub async fn fetch_dashboard(&self, id: &str, credential: &str) -> Result<Envelope, ApiError> {
        let req = self.build_dashboard_request(id, credential, now_unix_ms())?;
        self.execute(req).await
    }

    pub async fn submit(&self, action: &ActionRequest) -> Result<Envelope, ApiError> {
        let req = self.build_action_request(action, now_unix_ms())?;
        self.execute(req).await
    }

    async fn execute(&self, req: Request) -> Result<Envelope, ApiError> {
        let resp = self.http.execute(req).await.map_err(ApiError::Http)?;
        let status = resp.status();
        let body = resp.text().await.map_err(ApiError::Http)?;
        parse_envelope(status, &body)
    }

    pub fn build_dashboard_request(
        &self,
        id: &str,
        credential: &str,
        t: i64,
    ) -> Result<Request, ApiError> {
        if id.trim().is_empty() {
            return Err(ApiError::Config("player id must not be empty"));
        }
        let mut url = self.base_url.clone();
        url.query_pairs_mut()
            .append_pair("id", id.trim())
            .append_pair("pw", credential)
            .append_pair("t", &t.to_string());
        self.http
            .request(Method::GET, url)
            .build()
            .map_err(ApiError::Http)
    }

    pub fn build_action_request(
        &self,
        action: &ActionRequest,
        t: i64,
    ) -> Result<Request, ApiError> {
        if action.student_id.trim().is_empty() {
            return Err(ApiError::Config("student id must not be empty"));
        }
        let mut url = self.base_url.clone();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("action", action.kind.as_str())
                .append_pair("student_id", action.student_id.trim())
                .append_pair("pw", &action.credential)
                .append_pair("t", &t.to_string());
            let p = &action.params;
            if let Some(item_id) = p.item_id.as_deref() {
                q.append_pair("item_id", item_id);
            }
            if let Some(qty) = p.qty {
                q.append_pair("qty", &qty.to_string());
            }
            if let Some(target) = p.target_team_id.as_deref() {
                q.append_pair("target_team_id", target);
            }
            if let Some(attacker) = p.attacker_team_id.as_deref() {
                q.append_pair("attacker_team_id", attacker);
            }
            if let Some(clicks) = p.clicks {
                q.append_pair("clicks", &clicks.to_string());
            }
        }
        self.http
            .request(Method::GET, url)
            .build()
            .map_err(ApiError::Http)
    }
}

/// Transport seam for the session engine. The real implementation is
/// `GameClient`; session tests drive the engine with a scripted transport.
#[allow(async_fn_in_trait)]
pub trait GameTransport {
    async fn fetch_dashboard(&self, id: &str, credential: &str) -> Result<Envelope, ApiError>;
    async fn submit(&self, action: &ActionRequest) -> Result<Envelope, ApiError>;
}

impl GameTransport for GameClient {
    async fn fetch_dashboard(&self, id: &str, credential: &str) -> Result<Envelope, ApiError> {
        GameClient::fetch_dashboard(self, id, credential).await
    }

    async fn submit(&self, action: &ActionRequest) -> Result<Envelope, ApiError> {
        GameClient::submit(self, action).await
    }
}

#[derive(Debug)]
pub enum ApiError {
    Config(&'static str),
    Url(String),
    Http(reqwest::Error),
    Json(serde_json::Error),
    Api { status: StatusCode, body: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Url(err) => write!(f, "url error: {err}"),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::Api { status, body } => write!(f, "api error {}: {}", status.as_u16(), body),
        }
    }
}

impl std::error::Error for ApiError {}

pub fn parse_envelope(status: StatusCode, body: &str) -> Result<Envelope, ApiError> {
    if !status.is_success() {
        return Err(ApiError::Api {
            status,
            body: body.to_string(),
        });
    }
    serde_json::from_str(body).map_err(ApiError::Json)
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GameClient {
        GameClient::new("https://sheet.example.test/exec").unwrap()
    }

    fn query_pairs(req: &Request) -> Vec<(String, String)> {
        req.url()
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect()
    }

    #[test]
    fn dashboard_request_carries_id_credential_and_cache_buster() {
        let req = client()
            .build_dashboard_request(" 1001 ", "s3cret", 1700000000000)
            .unwrap();
        assert_eq!(req.method(), Method::GET);
        let pairs = query_pairs(&req);
        assert!(pairs.contains(&("id".into(), "1001".into())));
        assert!(pairs.contains(&("pw".into(), "s3cret".into())));
        assert!(pairs.contains(&("t".into(), "1700000000000".into())));
    }

    #[test]
    fn dashboard_request_rejects_blank_id() {
        let err = client()
            .build_dashboard_request("   ", "pw", 0)
            .unwrap_err();
        assert!(format!("{err}").contains("player id"));
    }

    #[test]
    fn action_request_includes_discriminator_and_params() {
        let req = client()
            .build_action_request(
                &ActionRequest {
                    kind: ActionKind::AddClicks,
                    student_id: "1001".into(),
                    credential: "s3cret".into(),
                    params: ActionParams {
                        attacker_team_id: Some("T1".into()),
                        clicks: Some(45),
                        ..Default::default()
                    },
                },
                42,
            )
            .unwrap();
        let pairs = query_pairs(&req);
        assert!(pairs.contains(&("action".into(), "ADD_CLICKS".into())));
        assert!(pairs.contains(&("student_id".into(), "1001".into())));
        assert!(pairs.contains(&("attacker_team_id".into(), "T1".into())));
        assert!(pairs.contains(&("clicks".into(), "45".into())));
        assert!(pairs.contains(&("t".into(), "42".into())));
        assert!(!pairs.iter().any(|(k, _)| k == "item_id"));
    }

    #[test]
    fn buy_request_carries_item_and_qty() {
        let req = client()
            .build_action_request(
                &ActionRequest {
                    kind: ActionKind::Buy,
                    student_id: "1001".into(),
                    credential: "pw".into(),
                    params: ActionParams {
                        item_id: Some("shield".into()),
                        qty: Some(2),
                        ..Default::default()
                    },
                },
                0,
            )
            .unwrap();
        let pairs = query_pairs(&req);
        assert!(pairs.contains(&("action".into(), "BUY".into())));
        assert!(pairs.contains(&("item_id".into(), "shield".into())));
        assert!(pairs.contains(&("qty".into(), "2".into())));
    }

    #[test]
    fn parse_envelope_maps_http_failure_to_api_error() {
        let err = parse_envelope(StatusCode::BAD_GATEWAY, "upstream").unwrap_err();
        match err {
            ApiError::Api { status, body } => {
                assert_eq!(status, StatusCode::BAD_GATEWAY);
                assert_eq!(body, "upstream");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parse_envelope_keeps_server_rejection_as_value() {
        let env = parse_envelope(
            StatusCode::OK,
            r#"{"success": false, "message": "not enough money"}"#,
        )
        .unwrap();
        assert!(!env.success);
        assert_eq!(env.message.as_deref(), Some("not enough money"));
    }

    #[test]
    fn parse_envelope_rejects_malformed_body() {
        let err = parse_envelope(StatusCode::OK, "<html>redirect</html>").unwrap_err();
        assert!(matches!(err, ApiError::Json(_)));
    }
}
