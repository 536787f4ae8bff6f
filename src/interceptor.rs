//! Request Interceptor
//!
//! Boundary filter for outgoing mutating requests. While offline, same-origin
//! POST/PUT/PATCH/DELETE calls accepted by the host predicate are diverted
//! into the persistent queue instead of going to the network.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use url::Url;

use crate::connectivity::ConnectivityProvider;
use crate::error::Result;
use crate::http::{is_mutating, resolve_url, Headers, HttpResponse};
use crate::queue::PersistentQueue;

const QUEUED_MESSAGE: &str = "Request saved and will sync when online";
const FORM_QUEUED_MESSAGE: &str = "Form saved and will sync when online";

// == Request Origin ==
/// The page surface that produced a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RequestOrigin {
    #[serde(rename = "fetch-api")]
    FetchApi,
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    #[serde(rename = "form-submission")]
    Form {
        #[serde(default, rename = "formId")]
        form_id: Option<String>,
        #[serde(default)]
        fields: BTreeMap<String, String>,
    },
    /// Link or button carrying a method override
    #[serde(rename = "link-method")]
    Link,
}

impl RequestOrigin {
    pub fn kind(&self) -> &'static str {
        match self {
            RequestOrigin::FetchApi => "fetch-api",
            RequestOrigin::XmlHttpRequest => "xmlhttprequest",
            RequestOrigin::Form { .. } => "form-submission",
            RequestOrigin::Link => "link-method",
        }
    }
}

/// An outgoing request as captured on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingRequest {
    pub origin: RequestOrigin,
    pub method: String,
    /// Target URL; an empty form action means the current page
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    /// Let the request go out as usual
    Proceed(OutgoingRequest),
    /// Diverted into the queue. Programmatic calls get a synthetic reply.
    Queued { id: i64, reply: Option<HttpResponse> },
}

/// Detail of the page event fired after a form is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormQueuedEvent {
    pub method: String,
    pub action: String,
    pub data: BTreeMap<String, String>,
}

// == Page Notifier ==
/// Feedback hooks toward the page.
pub trait PageNotifier: Send + Sync {
    /// Transient "saved for later" acknowledgment.
    fn acknowledge(&self, message: &str);

    fn reset_form(&self, _form_id: Option<&str>) {}

    fn form_queued(&self, _event: &FormQueuedEvent) {}

    fn queue_failed(&self, _message: &str) {}
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl PageNotifier for TracingNotifier {
    fn acknowledge(&self, message: &str) {
        info!("{}", message);
    }

    fn form_queued(&self, event: &FormQueuedEvent) {
        debug!("offline-queued: {} {}", event.method, event.action);
    }

    fn queue_failed(&self, message: &str) {
        error!("{}", message);
    }
}

/// Host filter over `(method, url, headers)`; false lets the request through.
pub type QueuePredicate = Arc<dyn Fn(&str, &str, &Headers) -> bool + Send + Sync>;

// == Interceptor ==
#[derive(Clone)]
pub struct Interceptor {
    queue: PersistentQueue,
    connectivity: Arc<dyn ConnectivityProvider>,
    page_origin: Url,
    predicate: QueuePredicate,
    notifier: Arc<dyn PageNotifier>,
    csrf_token: Option<String>,
}

impl Interceptor {
    pub fn new(
        queue: PersistentQueue,
        connectivity: Arc<dyn ConnectivityProvider>,
        page_origin: Url,
        notifier: Arc<dyn PageNotifier>,
    ) -> Self {
        Self {
            queue,
            connectivity,
            page_origin,
            predicate: Arc::new(|_, _, _| true),
            notifier,
            csrf_token: None,
        }
    }

    pub fn with_predicate(mut self, predicate: QueuePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    /// Token attached to queued forms and method links as `X-CSRF-TOKEN`.
    pub fn with_csrf_token(mut self, token: impl Into<String>) -> Self {
        self.csrf_token = Some(token.into());
        self
    }

    /// True only for a mutating verb, while offline, to the page's own
    /// origin, when the host predicate agrees.
    pub fn should_queue(&self, method: &str, url: &str, headers: &Headers) -> bool {
        if !is_mutating(method) {
            return false;
        }
        if self.connectivity.is_online() {
            return false;
        }
        match resolve_url(&self.page_origin, url) {
            Some(target) if target.origin() == self.page_origin.origin() => {}
            _ => return false,
        }
        (self.predicate)(method, url, headers)
    }

    /// Queues the request or hands it back untouched.
    ///
    /// # Returns
    /// * `Ok(Interception::Proceed)` when the request should go out normally
    /// * `Ok(Interception::Queued)` with the queue id once stored
    /// * `Err` when the queue write failed; the page is told via
    ///   [`PageNotifier::queue_failed`]
    pub async fn intercept(&self, request: OutgoingRequest) -> Result<Interception> {
        let target = if request.url.trim().is_empty() {
            self.page_origin.to_string()
        } else {
            request.url.clone()
        };
        if !self.should_queue(&request.method, &target, &request.headers) {
            return Ok(Interception::Proceed(request));
        }

        let method = request.method.to_ascii_uppercase();
        let absolute = resolve_url(&self.page_origin, &target)
            .map(|u| u.to_string())
            .unwrap_or(target);
        debug!("Intercepted {} {} {}", request.origin.kind(), method, absolute);

        let (headers, body) = self.prepare(&request)?;
        let mut metadata = serde_json::json!({
            "type": request.origin.kind(),
            "intercepted": true,
        });
        if let RequestOrigin::Form { form_id, .. } = &request.origin {
            metadata["formId"] = serde_json::json!(form_id);
        }

        let id = match self
            .queue
            .enqueue(&absolute, &method, headers, body, metadata)
            .await
        {
            Ok(id) => id,
            Err(err) => {
                self.notifier
                    .queue_failed(&format!("Failed to save request offline: {}", err));
                return Err(err);
            }
        };

        let reply = match &request.origin {
            RequestOrigin::FetchApi | RequestOrigin::XmlHttpRequest => {
                self.notifier.acknowledge(QUEUED_MESSAGE);
                Some(queued_reply())
            }
            RequestOrigin::Form { form_id, fields } => {
                self.notifier.acknowledge(FORM_QUEUED_MESSAGE);
                self.notifier.reset_form(form_id.as_deref());
                self.notifier.form_queued(&FormQueuedEvent {
                    method,
                    action: absolute,
                    data: fields.clone(),
                });
                None
            }
            RequestOrigin::Link => {
                self.notifier.acknowledge(QUEUED_MESSAGE);
                None
            }
        };
        Ok(Interception::Queued { id, reply })
    }

    /// Headers and body as they will be stored for replay.
    fn prepare(&self, request: &OutgoingRequest) -> Result<(Headers, Option<String>)> {
        match &request.origin {
            RequestOrigin::FetchApi | RequestOrigin::XmlHttpRequest => {
                Ok((request.headers.clone(), request.body.clone()))
            }
            RequestOrigin::Form { fields, .. } => {
                let mut headers = Headers::new();
                headers.insert("Content-Type".into(), "application/json".into());
                headers.insert("Accept".into(), "application/json".into());
                self.add_csrf(&mut headers);
                Ok((headers, Some(serde_json::to_string(fields)?)))
            }
            RequestOrigin::Link => {
                let mut headers = Headers::new();
                headers.insert("Accept".into(), "application/json".into());
                self.add_csrf(&mut headers);
                Ok((headers, None))
            }
        }
    }

    fn add_csrf(&self, headers: &mut Headers) {
        if let Some(token) = &self.csrf_token {
            headers.insert("X-CSRF-TOKEN".into(), token.clone());
        }
    }
}

/// Synthetic answer handed to programmatic callers.
fn queued_reply() -> HttpResponse {
    HttpResponse::new(202, r#"{"queued":true,"offline":true}"#)
        .with_status_text("Accepted (Queued)")
        .with_header("Content-Type", "application/json")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::clock::ManualClock;
    use crate::connectivity::Connectivity;
    use crate::events::EventBus;
    use crate::error::OfflineError;
    use crate::queue::{
        MemoryQueue, NewQueuedRequest, OrderedRecordQueue, QueueCounts, QueueStatus, QueueUpdate,
        QueuedRequest,
    };

    #[derive(Default)]
    struct RecordingNotifier {
        log: Mutex<Vec<String>>,
    }

    impl RecordingNotifier {
        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl PageNotifier for RecordingNotifier {
        fn acknowledge(&self, message: &str) {
            self.log.lock().unwrap().push(format!("ack:{}", message));
        }

        fn reset_form(&self, form_id: Option<&str>) {
            self.log
                .lock()
                .unwrap()
                .push(format!("reset:{}", form_id.unwrap_or("")));
        }

        fn form_queued(&self, event: &FormQueuedEvent) {
            self.log.lock().unwrap().push(format!("event:{}", event.action));
        }

        fn queue_failed(&self, message: &str) {
            self.log.lock().unwrap().push(format!("failed:{}", message));
        }
    }

    /// Store whose every write fails as if the disk were full.
    struct FullQueue;

    #[async_trait::async_trait]
    impl OrderedRecordQueue for FullQueue {
        async fn insert(&self, _request: NewQueuedRequest) -> Result<i64> {
            Err(OfflineError::QuotaExceeded("database or disk is full".into()))
        }

        async fn get(&self, _id: i64) -> Result<Option<QueuedRequest>> {
            Ok(None)
        }

        async fn list(&self, _status: QueueStatus) -> Result<Vec<QueuedRequest>> {
            Ok(Vec::new())
        }

        async fn update(&self, id: i64, _update: QueueUpdate) -> Result<QueuedRequest> {
            Err(OfflineError::QueueEntryNotFound(id))
        }

        async fn remove(&self, _id: i64) -> Result<bool> {
            Ok(false)
        }

        async fn counts(&self) -> Result<QueueCounts> {
            Ok(QueueCounts::default())
        }

        async fn remove_with_status(&self, _status: QueueStatus) -> Result<Vec<i64>> {
            Ok(Vec::new())
        }
    }

    struct Fixture {
        interceptor: Interceptor,
        queue: PersistentQueue,
        connectivity: Connectivity,
        notifier: Arc<RecordingNotifier>,
    }

    fn fixture() -> Fixture {
        let queue = PersistentQueue::new(
            Arc::new(MemoryQueue::new()),
            Arc::new(ManualClock::new(0)),
            EventBus::new(),
        );
        let connectivity = Connectivity::new(false);
        let notifier = Arc::new(RecordingNotifier::default());
        let interceptor = Interceptor::new(
            queue.clone(),
            Arc::new(connectivity.clone()),
            Url::parse("http://localhost:8000/").unwrap(),
            notifier.clone(),
        )
        .with_csrf_token("tok123");
        Fixture {
            interceptor,
            queue,
            connectivity,
            notifier,
        }
    }

    fn fetch_call(method: &str, url: &str) -> OutgoingRequest {
        OutgoingRequest {
            origin: RequestOrigin::FetchApi,
            method: method.to_string(),
            url: url.to_string(),
            headers: Headers::new(),
            body: Some(r#"{"a":1}"#.to_string()),
        }
    }

    #[test]
    fn test_should_queue_rules() {
        let f = fixture();
        let none = Headers::new();
        assert!(f.interceptor.should_queue("POST", "/orders", &none));
        assert!(!f.interceptor.should_queue("GET", "/orders", &none));
        assert!(!f.interceptor.should_queue("POST", "https://other.example/orders", &none));

        f.connectivity.set_online(true);
        assert!(!f.interceptor.should_queue("POST", "/orders", &none));
    }

    #[test]
    fn test_predicate_can_veto() {
        let f = fixture();
        let interceptor = f
            .interceptor
            .with_predicate(Arc::new(|_, url, _| !url.contains("/auth/")));
        assert!(!interceptor.should_queue("POST", "/auth/login", &Headers::new()));
        assert!(interceptor.should_queue("POST", "/orders", &Headers::new()));
    }

    #[tokio::test]
    async fn test_fetch_call_gets_accepted_reply() {
        let f = fixture();
        let outcome = f.interceptor.intercept(fetch_call("post", "/orders")).await.unwrap();

        let Interception::Queued { id, reply } = outcome else {
            panic!("expected the call to be queued");
        };
        let reply = reply.unwrap();
        assert_eq!(reply.status, 202);
        assert_eq!(reply.status_text, "Accepted (Queued)");
        let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(body["queued"], true);

        let record = f.queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.url, "http://localhost:8000/orders");
        assert_eq!(record.method, "POST");
        assert_eq!(record.metadata["type"], "fetch-api");
        assert_eq!(record.metadata["intercepted"], true);
        assert_eq!(f.notifier.entries(), vec![format!("ack:{}", QUEUED_MESSAGE)]);
    }

    #[tokio::test]
    async fn test_online_request_proceeds() {
        let f = fixture();
        f.connectivity.set_online(true);
        let request = fetch_call("POST", "/orders");

        let outcome = f.interceptor.intercept(request.clone()).await.unwrap();
        assert_eq!(outcome, Interception::Proceed(request));
        assert_eq!(f.queue.count_by_status().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_form_submission_is_serialized() {
        let f = fixture();
        let mut fields = BTreeMap::new();
        fields.insert("item".to_string(), "widget".to_string());
        fields.insert("qty".to_string(), "2".to_string());

        let outcome = f
            .interceptor
            .intercept(OutgoingRequest {
                origin: RequestOrigin::Form {
                    form_id: Some("order-form".into()),
                    fields,
                },
                method: "post".into(),
                url: "/orders".into(),
                headers: Headers::new(),
                body: None,
            })
            .await
            .unwrap();

        let Interception::Queued { id, reply } = outcome else {
            panic!("expected the form to be queued");
        };
        assert!(reply.is_none());

        let record = f.queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, QueueStatus::Pending);
        assert_eq!(record.retries, 0);
        assert_eq!(record.headers["Content-Type"], "application/json");
        assert_eq!(record.headers["X-CSRF-TOKEN"], "tok123");
        assert_eq!(record.body.as_deref(), Some(r#"{"item":"widget","qty":"2"}"#));
        assert_eq!(record.metadata["formId"], "order-form");

        assert_eq!(
            f.notifier.entries(),
            vec![
                format!("ack:{}", FORM_QUEUED_MESSAGE),
                "reset:order-form".to_string(),
                "event:http://localhost:8000/orders".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_form_action_targets_page() {
        let f = fixture();
        let outcome = f
            .interceptor
            .intercept(OutgoingRequest {
                origin: RequestOrigin::Form {
                    form_id: None,
                    fields: BTreeMap::new(),
                },
                method: "POST".into(),
                url: String::new(),
                headers: Headers::new(),
                body: None,
            })
            .await
            .unwrap();
        let Interception::Queued { id, .. } = outcome else {
            panic!("expected the form to be queued");
        };
        assert_eq!(
            f.queue.get(id).await.unwrap().unwrap().url,
            "http://localhost:8000/"
        );
    }

    #[tokio::test]
    async fn test_link_method_has_no_body() {
        let f = fixture();
        let outcome = f
            .interceptor
            .intercept(OutgoingRequest {
                origin: RequestOrigin::Link,
                method: "delete".into(),
                url: "/posts/9".into(),
                headers: Headers::new(),
                body: Some("ignored".into()),
            })
            .await
            .unwrap();
        let Interception::Queued { id, .. } = outcome else {
            panic!("expected the link to be queued");
        };

        let record = f.queue.get(id).await.unwrap().unwrap();
        assert_eq!(record.method, "DELETE");
        assert!(record.body.is_none());
        assert_eq!(record.headers["Accept"], "application/json");
        assert_eq!(record.metadata["type"], "link-method");
    }

    #[test]
    fn test_origin_wire_format() {
        let origin: RequestOrigin = serde_json::from_value(serde_json::json!({
            "type": "form-submission",
            "formId": "f1",
            "fields": {"name": "x"}
        }))
        .unwrap();
        assert_eq!(origin.kind(), "form-submission");
    }

    #[tokio::test]
    async fn test_storage_failure_is_reported_and_returned() {
        let queue = PersistentQueue::new(
            Arc::new(FullQueue),
            Arc::new(ManualClock::new(0)),
            EventBus::new(),
        );
        let notifier = Arc::new(RecordingNotifier::default());
        let interceptor = Interceptor::new(
            queue,
            Arc::new(Connectivity::new(false)),
            Url::parse("http://localhost:8000/").unwrap(),
            notifier.clone(),
        );

        let err = interceptor
            .intercept(fetch_call("POST", "/orders"))
            .await
            .unwrap_err();
        assert!(matches!(err, OfflineError::QuotaExceeded(_)));
        assert!(err.is_storage());

        let log = notifier.entries();
        assert_eq!(log.len(), 1);
        assert!(log[0].starts_with("failed:Failed to save request offline"));
    }
}
