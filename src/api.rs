//! The HTTP interface of the web report.
//!
//! - `PUT /get?build=<url>&workflow=react` returns the report events, or `{"status": "PENDING"}`.
//! - `GET /watch?build=<url>&workflow=react` streams the events of a pending report.
//! - `PUT /get_job?name=<job>` and `GET /watch_job?name=<job>` do the same for job descriptions.
//! - `POST /feedback` records a vote on a report.
//! - `POST /chat` answers a question about a report.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse},
    },
    routing::{get, post, put},
};
use futures::{
    StreamExt,
    stream::{self, BoxStream},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::{error, info, instrument};

use crate::{
    agent,
    base::types::{Event, EventKind, Void},
    model::{
        is_build_url,
        report::{Feedback, Report, Vote},
    },
    runtime::Runtime,
    workflow::{RcaJob, Workflow, get_or_submit_job, get_or_submit_rca},
};

/// The server-sent events of a job.
type EventStream = Sse<KeepAliveStream<BoxStream<'static, Result<SseEvent, Infallible>>>>;

// Errors.

/// An error answered with its status code.
#[derive(Debug)]
pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, message.into())
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, message.into())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!("Request failed: {:#}", err);
        Self(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// Requests.

fn default_workflow() -> String {
    "react".to_string()
}

#[derive(Debug, Deserialize)]
pub struct BuildQuery {
    pub build: String,
    #[serde(default = "default_workflow")]
    pub workflow: String,
}

impl BuildQuery {
    /// Check the build URL and the workflow name.
    fn validate(&self) -> ApiResult<Workflow> {
        validate(&self.build, &self.workflow)
    }
}

#[derive(Debug, Deserialize)]
pub struct JobQuery {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub build: String,
    #[serde(default = "default_workflow")]
    pub workflow: String,
    pub vote: Vote,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub build: String,
    #[serde(default = "default_workflow")]
    pub workflow: String,
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub answer: String,
}

fn validate(build: &str, workflow: &str) -> ApiResult<Workflow> {
    if !is_build_url(build) {
        return Err(ApiError::bad_request(format!("`{build}` is not a Zuul build URL")));
    }

    workflow.parse().map_err(|err: anyhow::Error| ApiError::bad_request(err.to_string()))
}

fn pending() -> Json<Value> {
    Json(json!({"status": "PENDING"}))
}

// Router.

/// The application routes.
pub fn router(rt: Runtime) -> Router {
    let static_dir = rt.config.static_dir.clone();

    let router = Router::new()
        .route("/get", put(get_report))
        .route("/watch", get(watch_report))
        .route("/get_job", put(get_job))
        .route("/watch_job", get(watch_job))
        .route("/feedback", post(add_feedback))
        .route("/chat", post(chat))
        .route("/health", get(health))
        .with_state(rt);

    let router = match static_dir {
        Some(dir) => router.fallback_service(ServeDir::new(dir)),
        None => router,
    };

    router.layer(TraceLayer::new_for_http())
}

/// Serve the API on the configured address.
pub async fn serve(rt: Runtime) -> Void {
    let listener = TcpListener::bind(&rt.config.listen).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, router(rt.clone())).with_graceful_shutdown(shutdown_signal()).await?;

    info!("Stopping the workers");
    rt.stop().await;

    Ok(())
}

/// Resolve on Ctrl-C.
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", err);
        std::future::pending::<()>().await;
    }
}

// Handlers.

async fn health() -> &'static str {
    "ok"
}

#[instrument(skip(rt))]
async fn get_report(State(rt): State<Runtime>, Query(query): Query<BuildQuery>) -> ApiResult<Json<Value>> {
    let workflow = query.validate()?;

    match get_or_submit_rca(&rt, workflow, &query.build).await? {
        Some(events) => Ok(Json(serde_json::to_value(events).map_err(anyhow::Error::from)?)),
        None => Ok(pending()),
    }
}

#[instrument(skip(rt))]
async fn watch_report(State(rt): State<Runtime>, Query(query): Query<BuildQuery>) -> ApiResult<EventStream> {
    let workflow = query.validate()?;

    Ok(watch(&rt, &RcaJob::key(workflow, &query.build)).await)
}

#[instrument(skip(rt))]
async fn get_job(State(rt): State<Runtime>, Query(query): Query<JobQuery>) -> ApiResult<Json<Value>> {
    if query.name.trim().is_empty() {
        return Err(ApiError::bad_request("Missing job name"));
    }

    match get_or_submit_job(&rt, &query.name).await? {
        Some(events) => Ok(Json(serde_json::to_value(events).map_err(anyhow::Error::from)?)),
        None => Ok(pending()),
    }
}

#[instrument(skip(rt))]
async fn watch_job(State(rt): State<Runtime>, Query(query): Query<JobQuery>) -> EventStream {
    watch(&rt, &query.name).await
}

#[instrument(skip(rt))]
async fn add_feedback(State(rt): State<Runtime>, Json(request): Json<FeedbackRequest>) -> ApiResult<Json<Value>> {
    let workflow = validate(&request.build, &request.workflow)?;

    let feedback = Feedback {
        vote: request.vote,
        comment: request.comment.filter(|comment| !comment.trim().is_empty()),
    };
    rt.db.add_feedback(workflow.as_str(), &request.build, &feedback).await?;

    Ok(Json(json!({"status": "ok"})))
}

#[instrument(skip(rt, request))]
async fn chat(State(rt): State<Runtime>, Json(request): Json<ChatRequest>) -> ApiResult<Json<ChatResponse>> {
    let workflow = validate(&request.build, &request.workflow)?;

    let events = rt.db.get_report(workflow.as_str(), &request.build).await?.unwrap_or_default();
    let report = events
        .into_iter()
        .rev()
        .find(|event| event.kind() == EventKind::Report)
        .ok_or_else(|| ApiError::not_found("No report for this build"))?;
    let report: Report = serde_json::from_value(report.1).map_err(anyhow::Error::from)?;

    let (answer, usage) = agent::chat::call_agent(&rt.llm, &report, &request.question).await?;
    for usage in usage {
        info!("Chat usage of {}: {} input, {} output tokens", usage.model, usage.input, usage.output);
    }

    Ok(Json(ChatResponse { answer }))
}

/// Stream the events of a pending job, or a redirect once it is done.
async fn watch(rt: &Runtime, key: &str) -> EventStream {
    let stream = match rt.pool.watch(key).await {
        Some(watcher) => watcher.into_stream().map(|event| Ok(sse_event(&event))).boxed(),
        None => stream::once(async { Ok(sse_event(&Event::new(EventKind::Redirect, true))) }).boxed(),
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn sse_event(event: &Event) -> SseEvent {
    SseEvent::default().data(serde_json::to_string(event).unwrap_or_default())
}

// Tests.

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::MockServer;

    use super::*;
    use crate::{
        agent::tests::{ScriptedLlm, Step},
        base::config::ConfigInner,
        service::llm::LlmClient,
        worker::tests::{Dummy, wait_completed},
        workflow::tests::{ANSWER, BUILD, mock_sf, runtime},
    };

    struct TestApi {
        rt: Runtime,
        base: String,
        http: reqwest::Client,
        _git: tempfile::TempDir,
    }

    async fn start(server: &MockServer, llm: LlmClient) -> TestApi {
        let git = tempfile::tempdir().unwrap();
        let rt = runtime(server, git.path(), llm, ConfigInner::default()).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let app = router(rt.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        TestApi {
            rt,
            base,
            http: reqwest::Client::new(),
            _git: git,
        }
    }

    impl TestApi {
        async fn put(&self, path: &str, query: &[(&str, &str)]) -> reqwest::Response {
            self.http.put(format!("{}{}", self.base, path)).query(query).send().await.unwrap()
        }

        async fn get(&self, path: &str, query: &[(&str, &str)]) -> reqwest::Response {
            self.http.get(format!("{}{}", self.base, path)).query(query).send().await.unwrap()
        }

        async fn post(&self, path: &str, body: Value) -> reqwest::Response {
            self.http.post(format!("{}{}", self.base, path)).json(&body).send().await.unwrap()
        }
    }

    #[tokio::test]
    async fn test_health() {
        let server = MockServer::start_async().await;
        let api = start(&server, ScriptedLlm::new(vec![]).client()).await;

        let response = api.get("/health", &[]).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.text().await.unwrap(), "ok");
        api.rt.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_requests() {
        let server = MockServer::start_async().await;
        let api = start(&server, ScriptedLlm::new(vec![]).client()).await;

        let not_a_build = api.put("/get", &[("build", "https://zuul.example.com/t/tenant/buildsets")]).await;
        assert_eq!(not_a_build.status(), StatusCode::BAD_REQUEST);

        let bad_workflow = api.put("/get", &[("build", BUILD), ("workflow", "magic")]).await;
        assert_eq!(bad_workflow.status(), StatusCode::BAD_REQUEST);

        let bad_watch = api.get("/watch", &[("build", "file:///etc/build/x")]).await;
        assert_eq!(bad_watch.status(), StatusCode::BAD_REQUEST);

        let no_name = api.put("/get_job", &[("name", " ")]).await;
        assert_eq!(no_name.status(), StatusCode::BAD_REQUEST);

        api.rt.stop().await;
    }

    #[tokio::test]
    async fn test_submit_then_get_the_report() {
        let server = MockServer::start_async().await;
        mock_sf(&server, "tox").await;
        let api = start(&server, ScriptedLlm::new(vec![Step::Answer(ANSWER.to_string())]).client()).await;
        let query = [("build", BUILD), ("workflow", "predict")];

        let submitted: Value = api.put("/get", &query).await.json().await.unwrap();
        assert_eq!(submitted, json!({"status": "PENDING"}));

        wait_completed(&api.rt.pool, &RcaJob::key(Workflow::Predict, BUILD)).await;

        let watched = api.get("/watch", &query).await.text().await.unwrap();
        assert_eq!(watched.trim(), r#"data: ["redirect",true]"#);

        let events: Vec<Event> = api.put("/get", &query).await.json().await.unwrap();
        assert_eq!(events.first().unwrap(), &Event::new(EventKind::Workflow, "predict"));
        assert_eq!(events.last().unwrap(), &Event::new(EventKind::Status, "completed"));
        assert!(events.iter().any(|e| e.kind() == EventKind::Report));

        api.rt.stop().await;
    }

    #[tokio::test]
    async fn test_watch_a_pending_report() {
        let server = MockServer::start_async().await;
        let api = start(&server, ScriptedLlm::new(vec![]).client()).await;

        // Keep the single worker busy so that the watched job is still pending.
        let mut gate = Dummy::new("gate");
        gate.delay = Duration::from_millis(50);
        api.rt.pool.submit(gate).await;
        let mut job = Dummy::new(&RcaJob::key(Workflow::React, BUILD));
        job.steps = 1;
        api.rt.pool.submit(job).await;

        let body = tokio::time::timeout(Duration::from_secs(10), async { api.get("/watch", &[("build", BUILD)]).await.text().await.unwrap() })
            .await
            .unwrap();
        let data: Vec<&str> = body.lines().filter_map(|line| line.strip_prefix("data: ")).collect();

        assert_eq!(data, vec![r#"["progress","starting..."]"#, r#"["progress","performing step 0..."]"#, r#"["status","completed"]"#]);

        api.rt.stop().await;
    }

    #[tokio::test]
    async fn test_get_job_description() {
        let server = MockServer::start_async().await;
        mock_sf(&server, "tox").await;
        let api = start(&server, ScriptedLlm::new(vec![]).client()).await;

        let submitted: Value = api.put("/get_job", &[("name", "tox")]).await.json().await.unwrap();
        assert_eq!(submitted, json!({"status": "PENDING"}));

        wait_completed(&api.rt.pool, "tox").await;

        let events: Vec<Event> = api.put("/get_job", &[("name", "tox")]).await.json().await.unwrap();
        assert_eq!(events, vec![Event::new(EventKind::Error, "Couldn't find job tox")]);

        api.rt.stop().await;
    }

    #[tokio::test]
    async fn test_feedback() {
        let server = MockServer::start_async().await;
        let api = start(&server, ScriptedLlm::new(vec![]).client()).await;

        let response = api.post("/feedback", json!({"build": BUILD, "vote": "up", "comment": "spot on"})).await;
        assert_eq!(response.status(), StatusCode::OK);

        let invalid = api.post("/feedback", json!({"build": BUILD, "vote": "sideways"})).await;
        assert!(invalid.status().is_client_error());

        let feedback = api.rt.db.list_feedback("react", BUILD).await.unwrap();
        assert_eq!(
            feedback,
            vec![Feedback {
                vote: Vote::Up,
                comment: Some("spot on".to_string()),
            }]
        );

        api.rt.stop().await;
    }

    #[tokio::test]
    async fn test_chat() {
        let server = MockServer::start_async().await;
        let llm = ScriptedLlm::new(vec![Step::Answer(r#"{"answer": "Increase the timeout."}"#.to_string())]);
        let api = start(&server, llm.client()).await;

        let missing = api.post("/chat", json!({"build": BUILD, "question": "Why?"})).await;
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        api.rt
            .db
            .set_report("react", BUILD, &[Event::new(EventKind::Report, json!({"summary": "Timeout.", "possible_root_causes": []}))])
            .await
            .unwrap();

        let answer: Value = api.post("/chat", json!({"build": BUILD, "question": "How to fix it?"})).await.json().await.unwrap();
        assert_eq!(answer, json!({"answer": "Increase the timeout."}));
        assert!(llm.requests.lock().unwrap()[0].user_message().contains("Timeout."));

        api.rt.stop().await;
    }
}
