//! Case service client: the trait the sync engine consumes and its
//! reqwest-backed implementation.

use std::future::Future;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;

use super::error::{error_detail, ApiError};
use super::types::{DecisionRequest, NewCaseRequest};
use crate::models::{Case, CaseStatus};

/// Request/response collaborators of the case service.
///
/// Implementations never touch local state; results flow to the caller only.
pub trait CaseApi: Send + Sync + 'static {
    /// `POST /create-pre-auth`. Returns the server's initial `PENDING` record.
    fn create_case(
        &self,
        request: &NewCaseRequest,
    ) -> impl Future<Output = Result<Case, ApiError>> + Send;

    /// `POST /submit-decision`.
    fn submit_decision(
        &self,
        request: &DecisionRequest,
    ) -> impl Future<Output = Result<Case, ApiError>> + Send;

    /// `GET /get-cases-by-patient/{subject_id}`.
    fn cases_by_subject(
        &self,
        subject_id: &str,
    ) -> impl Future<Output = Result<Vec<Case>, ApiError>> + Send;

    /// `GET /get-cases-by-status/{status}`.
    fn cases_by_status(
        &self,
        status: &CaseStatus,
    ) -> impl Future<Output = Result<Vec<Case>, ApiError>> + Send;
}

/// HTTP client for the case service.
pub struct HttpCaseApi {
    base_url: Url,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl HttpCaseApi {
    /// Create a client rooted at `base_url` (trailing slash ignored).
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, ApiError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let base_url = Url::parse(trimmed)
            .map_err(|e| ApiError::InvalidRequest(format!("Invalid base URL {trimmed:?}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidRequest(format!(
                "Base URL cannot carry paths: {trimmed}"
            )));
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| ApiError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url,
            client,
            timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    /// Build `base/segment/...`, percent-encoding each segment.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidRequest("Base URL cannot carry paths".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ApiError {
        if e.is_connect() {
            ApiError::Connection(self.base_url().to_string())
        } else if e.is_timeout() {
            ApiError::Timeout(self.timeout_secs)
        } else {
            ApiError::HttpClient(e.to_string())
        }
    }

    async fn decode<T: DeserializeOwned>(
        &self,
        response: reqwest::Response,
        fallback: &str,
    ) -> Result<T, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Rejected {
                status: status.as_u16(),
                detail: error_detail(&body, fallback),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::ResponseParsing(e.to_string()))
    }

    async fn get_cases(&self, segments: &[&str], fallback: &str) -> Result<Vec<Case>, ApiError> {
        let url = self.endpoint(segments)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        self.decode(response, fallback).await
    }
}

impl CaseApi for HttpCaseApi {
    async fn create_case(&self, request: &NewCaseRequest) -> Result<Case, ApiError> {
        request.validate()?;
        let url = self.endpoint(&["create-pre-auth"])?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let case: Case = self.decode(response, "Failed to create case").await?;
        tracing::info!(case_id = %case.case_id, status = %case.status, "Case created");
        Ok(case)
    }

    async fn submit_decision(&self, request: &DecisionRequest) -> Result<Case, ApiError> {
        request.validate()?;
        let url = self.endpoint(&["submit-decision"])?;
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;
        let case: Case = self.decode(response, "Failed to submit decision").await?;
        tracing::info!(
            case_id = %case.case_id,
            decision = %request.decision,
            "Decision submitted"
        );
        Ok(case)
    }

    async fn cases_by_subject(&self, subject_id: &str) -> Result<Vec<Case>, ApiError> {
        if subject_id.trim().is_empty() {
            return Err(ApiError::InvalidRequest("subject_id is required".into()));
        }
        self.get_cases(&["get-cases-by-patient", subject_id], "Failed to get patient cases")
            .await
    }

    async fn cases_by_status(&self, status: &CaseStatus) -> Result<Vec<Case>, ApiError> {
        self.get_cases(
            &["get-cases-by-status", status.as_str()],
            "Failed to get cases by status",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Decision;
    use crate::test_support::{case, MockBackend};

    #[test]
    fn constructor_trims_trailing_slash() {
        let api = HttpCaseApi::new("http://127.0.0.1:8000/", 30).unwrap();
        assert_eq!(api.base_url(), "http://127.0.0.1:8000");
        assert_eq!(api.timeout_secs, 30);
    }

    #[test]
    fn constructor_rejects_garbage_url() {
        assert!(matches!(
            HttpCaseApi::new("not a url", 30),
            Err(ApiError::InvalidRequest(_))
        ));
    }

    #[test]
    fn endpoint_encodes_path_segments() {
        let api = HttpCaseApi::new("http://127.0.0.1:8000/api", 30).unwrap();
        let url = api.endpoint(&["get-cases-by-patient", "P 100/a"]).unwrap();
        assert_eq!(
            url.as_str(),
            "http://127.0.0.1:8000/api/get-cases-by-patient/P%20100%2Fa"
        );
    }

    #[tokio::test]
    async fn create_case_returns_pending_record() {
        let backend = MockBackend::start().await;
        let api = HttpCaseApi::new(&backend.http_url(), 5).unwrap();

        let created = api
            .create_case(&NewCaseRequest::new("dr.smith@clinic.test", "P-100", "72148"))
            .await
            .unwrap();
        assert_eq!(created.status, CaseStatus::Pending);
        assert_eq!(created.patient_id, "P-100");
        assert_eq!(backend.case_count(), 1);

        backend.shutdown();
    }

    #[tokio::test]
    async fn rejected_request_surfaces_detail() {
        let backend = MockBackend::start().await;
        let api = HttpCaseApi::new(&backend.http_url(), 5).unwrap();

        let err = api
            .submit_decision(&DecisionRequest::new("missing", Decision::Approved, ""))
            .await
            .unwrap_err();
        match err {
            ApiError::Rejected { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "Case not found");
            }
            other => panic!("expected Rejected, got {other:?}"),
        }

        backend.shutdown();
    }

    #[tokio::test]
    async fn invalid_request_is_not_sent() {
        let backend = MockBackend::start().await;
        let api = HttpCaseApi::new(&backend.http_url(), 5).unwrap();

        let err = api
            .create_case(&NewCaseRequest::new("dr", "", "72148"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidRequest(_)));
        assert_eq!(backend.case_count(), 0);

        backend.shutdown();
    }

    #[tokio::test]
    async fn fetch_by_status_and_subject() {
        let backend = MockBackend::start().await;
        backend.insert(case("c-1", "P-1", CaseStatus::ApprovedReady));
        backend.insert(case("c-2", "P-2", CaseStatus::Denied));
        backend.insert(case("c-3", "P-1", CaseStatus::Pending));
        let api = HttpCaseApi::new(&backend.http_url(), 5).unwrap();

        let ready = api.cases_by_status(&CaseStatus::ApprovedReady).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].case_id, "c-1");

        let mut subject = api.cases_by_subject("P-1").await.unwrap();
        subject.sort_by(|a, b| a.case_id.cmp(&b.case_id));
        let ids: Vec<_> = subject.iter().map(|c| c.case_id.as_str()).collect();
        assert_eq!(ids, vec!["c-1", "c-3"]);

        backend.shutdown();
    }

    #[tokio::test]
    async fn unreachable_service_is_connection_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let api = HttpCaseApi::new(&format!("http://127.0.0.1:{port}"), 5).unwrap();
        let err = api.cases_by_status(&CaseStatus::Approved).await.unwrap_err();
        assert!(err.is_transport(), "expected transport error, got {err:?}");
    }
}
