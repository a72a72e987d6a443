//! # REST Backend
//!
//! Every leaf section maps to one `GET` endpoint under `/api/1`. Queries are
//! always sent with `async_query=true`, so the backend answers with a task id
//! straight away:
//!
//! ```json
//! { "result": { "task_id": 42 }, "message": "" }
//! ```
//!
//! The task is then polled on `/api/1/tasks/{id}` until its status is
//! `completed`, at which point the outcome carries either the dataset or an
//! error message. Polling gives up after the configured task timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use crate::core::section::Section;
use crate::error::FetchError;
use crate::services::{BackendApi, QueryOptions, TaskId, TaskMeta, TaskRunner};

/// The backend's response envelope.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    result: Option<T>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    task_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum TaskStatus {
    Completed,
    Pending,
    NotFound,
}

#[derive(Debug, Deserialize)]
struct TaskState {
    status: TaskStatus,
    outcome: Option<Envelope<Value>>,
}

/// Where a polled task stands.
#[derive(Debug, PartialEq)]
enum TaskPoll {
    Pending,
    Done(Value),
}

/// The path of the endpoint producing `section`, relative to the API root.
/// Aggregates have none.
pub fn endpoint(section: Section) -> Option<&'static str> {
    let path = match section {
        Section::DefiBalances => "blockchains/ETH/defi",
        Section::DefiAirdrops => "blockchains/ETH/airdrops",
        Section::DefiDsrBalances => "blockchains/ETH/modules/makerdao/dsrbalance",
        Section::DefiDsrHistory => "blockchains/ETH/modules/makerdao/dsrhistory",
        Section::DefiMakerdaoVaults => "blockchains/ETH/modules/makerdao/vaults",
        Section::DefiMakerdaoVaultDetails => "blockchains/ETH/modules/makerdao/vaultdetails",
        Section::DefiAaveBalances => "blockchains/ETH/modules/aave/balances",
        Section::DefiAaveHistory => "blockchains/ETH/modules/aave/history",
        Section::DefiCompoundBalances => "blockchains/ETH/modules/compound/balances",
        Section::DefiCompoundHistory => "blockchains/ETH/modules/compound/history",
        Section::DefiYearnVaultsBalances => "blockchains/ETH/modules/yearn/vaults/balances",
        Section::DefiYearnVaultsHistory => "blockchains/ETH/modules/yearn/vaults/history",
        Section::DefiYearnVaultsV2Balances => "blockchains/ETH/modules/yearn/vaultsv2/balances",
        Section::DefiYearnVaultsV2History => "blockchains/ETH/modules/yearn/vaultsv2/history",
        Section::DefiLiquityBalances => "blockchains/ETH/modules/liquity/balances",
        Section::DefiLiquityEvents => "blockchains/ETH/modules/liquity/events/trove",
        Section::DefiUniswapBalances => "blockchains/ETH/modules/uniswap/balances",
        Section::DefiUniswapTrades => "blockchains/ETH/modules/uniswap/history/trades",
        Section::DefiUniswapEvents => "blockchains/ETH/modules/uniswap/history/events",
        Section::DefiOverview
        | Section::DefiLending
        | Section::DefiLendingHistory
        | Section::DefiBorrowing
        | Section::DefiBorrowingHistory => return None,
    };
    Some(path)
}

/// Query string for one submission. Only history endpoints understand the
/// reset flag.
fn query_params(section: Section, options: QueryOptions) -> Vec<(&'static str, &'static str)> {
    let mut params = vec![("async_query", "true")];
    if options.reset && supports_reset(section) {
        params.push(("reset_db_data", "true"));
    }
    params
}

fn supports_reset(section: Section) -> bool {
    matches!(
        section,
        Section::DefiAaveHistory
            | Section::DefiYearnVaultsHistory
            | Section::DefiYearnVaultsV2History
    )
}

fn interpret_submission(status: u16, body: &str) -> Result<TaskId, FetchError> {
    let envelope: Envelope<TaskCreated> = serde_json::from_str(body)?;
    match envelope.result {
        Some(created) if (200..300).contains(&status) => Ok(TaskId(created.task_id)),
        _ => Err(FetchError::Backend { status, message: envelope.message }),
    }
}

fn interpret_task(id: TaskId, status: u16, body: &str) -> Result<TaskPoll, FetchError> {
    let envelope: Envelope<TaskState> = serde_json::from_str(body)?;
    let Some(state) = envelope.result else {
        return Err(FetchError::Backend { status, message: envelope.message });
    };
    match state.status {
        TaskStatus::Pending => Ok(TaskPoll::Pending),
        TaskStatus::NotFound => Err(FetchError::TaskNotFound(id)),
        TaskStatus::Completed => match state.outcome {
            Some(Envelope { result: Some(value), .. }) => Ok(TaskPoll::Done(value)),
            Some(Envelope { result: None, message }) => Err(FetchError::Task(id, message)),
            None => Err(FetchError::Task(id, "completed without an outcome".to_string())),
        },
    }
}

/// # REST Backend
///
/// [`BackendApi`] and [`TaskRunner`] over HTTP. Transient transport errors are
/// retried with exponential backoff before they surface as failures.
pub struct RestBackend {
    inner: ClientWithMiddleware,
    base_url: Url,
    poll_interval: Duration,
    task_timeout: Duration,
}

impl RestBackend {
    /// Creates a client for the backend at `base_url`
    /// (e.g. `http://localhost:4242`).
    ///
    /// # Errors
    /// Fails when `base_url` is not an absolute URL.
    pub fn new(
        base_url: &str,
        poll_interval: Duration,
        task_timeout: Duration,
    ) -> Result<Self, FetchError> {
        let mut root = Url::parse(base_url)?;
        // Endpoints are joined relative to the API root.
        root.set_path(&format!("{}/api/1/", root.path().trim_end_matches('/')));

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner: client,
            base_url: root,
            poll_interval,
            task_timeout,
        })
    }

    /// The API root every endpoint is joined to.
    pub fn api_root(&self) -> &Url {
        &self.base_url
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<(u16, String), FetchError> {
        let url = self.base_url.join(path)?;
        trace!(%url, "GET");
        let response = self.inner.get(url).query(params).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }

    async fn poll_until_done(&self, id: TaskId) -> Result<Value, FetchError> {
        let path = format!("tasks/{}", id.0);
        loop {
            let (status, body) = self.get(&path, &[]).await?;
            match interpret_task(id, status, &body)? {
                TaskPoll::Done(value) => return Ok(value),
                TaskPoll::Pending => tokio::time::sleep(self.poll_interval).await,
            }
        }
    }
}

#[async_trait]
impl BackendApi for RestBackend {
    async fn query(&self, section: Section, options: QueryOptions) -> Result<TaskId, FetchError> {
        let path = endpoint(section)
            .ok_or_else(|| FetchError::Other(format!("{section} has no endpoint")))?;
        let (status, body) = self.get(path, &query_params(section, options)).await?;
        interpret_submission(status, &body)
    }
}

#[async_trait]
impl TaskRunner for RestBackend {
    async fn await_task(&self, id: TaskId, meta: TaskMeta) -> Result<Value, FetchError> {
        debug!(%id, title = %meta.title, "awaiting task");
        tokio::time::timeout(self.task_timeout, self.poll_until_done(id))
            .await
            .map_err(|_| FetchError::Timeout(id, self.task_timeout))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn only_leaves_have_endpoints() {
        for section in Section::ALL {
            assert_eq!(endpoint(section).is_some(), !section.is_aggregate(), "{section}");
        }
    }

    #[test]
    fn reset_flag_only_reaches_resettable_history() {
        let reset = QueryOptions { refresh: true, reset: true };
        assert!(query_params(Section::DefiAaveHistory, reset).contains(&("reset_db_data", "true")));
        assert_eq!(query_params(Section::DefiCompoundHistory, reset), vec![("async_query", "true")]);
        assert_eq!(
            query_params(Section::DefiAaveHistory, QueryOptions::refresh(true)),
            vec![("async_query", "true")]
        );
    }

    #[test]
    fn submission_errors_carry_the_backend_message() {
        assert_eq!(
            interpret_submission(200, r#"{"result":{"task_id":7},"message":""}"#).unwrap(),
            TaskId(7)
        );
        let err = interpret_submission(409, r#"{"result":null,"message":"module not activated"}"#)
            .unwrap_err();
        assert!(matches!(err, FetchError::Backend { status: 409, ref message } if message == "module not activated"));
    }

    #[test]
    fn task_states() {
        let id = TaskId(3);
        let pending = r#"{"result":{"status":"pending","outcome":null},"message":""}"#;
        assert_eq!(interpret_task(id, 200, pending).unwrap(), TaskPoll::Pending);

        let done = r#"{"result":{"status":"completed","outcome":{"result":{"a":1},"message":""}},"message":""}"#;
        assert_eq!(interpret_task(id, 200, done).unwrap(), TaskPoll::Done(json!({"a": 1})));

        let failed = r#"{"result":{"status":"completed","outcome":{"result":null,"message":"boom"}},"message":""}"#;
        assert!(matches!(interpret_task(id, 200, failed), Err(FetchError::Task(TaskId(3), ref m)) if m == "boom"));

        let missing = r#"{"result":{"status":"not-found","outcome":null},"message":"No task with id 3 found"}"#;
        assert!(matches!(interpret_task(id, 404, missing), Err(FetchError::TaskNotFound(TaskId(3)))));
    }

    #[tokio::test]
    async fn query_then_poll_against_a_mock_backend() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/blockchains/ETH/modules/makerdao/dsrbalance"))
            .and(query_param("async_query", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "task_id": 11 },
                "message": ""
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/1/tasks/11"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": {
                    "status": "completed",
                    "outcome": { "result": { "current_dsr": "1.5", "balances": {} }, "message": "" }
                },
                "message": ""
            })))
            .mount(&server)
            .await;

        let backend =
            RestBackend::new(&server.uri(), Duration::from_millis(10), Duration::from_secs(5)).unwrap();
        let id = backend.query(Section::DefiDsrBalances, QueryOptions::default()).await.unwrap();
        assert_eq!(id, TaskId(11));

        let value = backend
            .await_task(id, TaskMeta::for_section(Section::DefiDsrBalances))
            .await
            .unwrap();
        assert_eq!(value["current_dsr"], "1.5");
    }

    #[tokio::test]
    async fn pending_task_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/1/tasks/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "result": { "status": "pending", "outcome": null },
                "message": ""
            })))
            .mount(&server)
            .await;

        let backend =
            RestBackend::new(&server.uri(), Duration::from_millis(10), Duration::from_millis(100))
                .unwrap();
        let err = backend
            .await_task(TaskId(5), TaskMeta::for_section(Section::DefiAirdrops))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(TaskId(5), _)));
    }
}
