use std::{
    collections::{HashMap, HashSet},
    convert::Infallible,
    sync::{Arc, Mutex},
    time::Duration,
};

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderMap, Method as ServerMethod, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Form, Json, Router,
};
use futures_util::{stream, StreamExt};
use httputils::{
    BlockReader, BytesReader, CancellationToken, ClientOptions, CompletionMode, FileContent,
    HttpUtil, HttpUtilError, HttpUtilFactory, LineReader, RetryDelay, RetryTrigger, Url,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};

#[derive(Clone, Default)]
struct AppState {
    request_ids: Arc<Mutex<HashSet<String>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl AppState {
    fn hit(&self, key: &str) -> usize {
        let mut hits = self.hits.lock().expect("hits mutex must not be poisoned");
        let count = hits.entry(key.to_owned()).or_default();
        *count += 1;
        *count
    }
}

type Params = Query<HashMap<String, String>>;

fn number(params: &HashMap<String, String>, key: &str) -> i64 {
    params
        .get(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or_default()
}

async fn token_handler(headers: HeaderMap) -> String {
    headers
        .get("token")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

async fn method_handler(method: ServerMethod) -> String {
    method.to_string()
}

async fn data_handler(method: ServerMethod, Query(params): Params, body: Bytes) -> String {
    let mut sum = number(&params, "P3");
    match serde_json::from_slice::<JsonValue>(&body) {
        Ok(json) => {
            sum += ["P1", "P2"]
                .iter()
                .map(|key| json[*key].as_i64().unwrap_or_default())
                .sum::<i64>();
        }
        Err(_) => sum += number(&params, "P1") + number(&params, "P2"),
    }
    format!("{method}_{sum}")
}

async fn form_data_handler(
    method: ServerMethod,
    Query(params): Params,
    Form(form): Form<HashMap<String, String>>,
) -> String {
    let sum = number(&params, "P3") + number(&form, "P1") + number(&form, "P2");
    format!("{method}_{sum}")
}

async fn get_query_handler(State(state): State<AppState>, Query(params): Params) -> Response {
    if let Some(request_id) = params.get("reqId").filter(|id| !id.trim().is_empty()) {
        let first_time = state
            .request_ids
            .lock()
            .expect("request id mutex must not be poisoned")
            .insert(request_id.clone());
        if first_time {
            return StatusCode::BAD_REQUEST.into_response();
        }
    }
    let id = params.get("id").cloned().unwrap_or_default();
    let name = params.get("name").cloned().unwrap_or_default();
    Json(vec![id, name]).into_response()
}

fn delayed_body(chunks: Vec<String>, content_type: &'static str) -> Response {
    let body = stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        Ok::<_, Infallible>(Bytes::from(chunk))
    });
    ([(header::CONTENT_TYPE, content_type)], Body::from_stream(body)).into_response()
}

fn range(params: &HashMap<String, String>) -> (i64, i64) {
    (number(params, "s"), number(params, "e"))
}

async fn async_stream_handler(Query(params): Params) -> Response {
    let (s, e) = range(&params);
    let mut chunks = vec!["[".to_owned()];
    for i in s..=e {
        chunks.push(if i == s { i.to_string() } else { format!(",{i}") });
    }
    chunks.push("]".to_owned());
    delayed_body(chunks, "application/json")
}

async fn async_stream_object_handler(Query(params): Params) -> Response {
    let (s, e) = range(&params);
    let mut chunks = vec!["[".to_owned()];
    for i in s..=e {
        let separator = if i == s { "" } else { "," };
        chunks.push(format!("{separator}{{\"Value\":{i},\"Name\":\"item,{i}\","));
        chunks.push(format!("\"Tags\":[\"a\",\"b\"],\"Meta\":{{\"Range\":[{s},{e}]}}}}"));
    }
    chunks.push("]".to_owned());
    delayed_body(chunks, "application/json")
}

async fn async_stream_line_handler(Query(params): Params) -> Response {
    let (s, e) = range(&params);
    let chunks = (s..=e)
        .map(|i| format!("{}\n", json!({"S": s, "E": e, "C": i})))
        .collect();
    delayed_body(chunks, "text/event-stream")
}

async fn slow_handler(Query(params): Params) -> &'static str {
    let ms = u64::try_from(number(&params, "ms")).unwrap_or_default();
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "slow"
}

async fn slow_once_handler(State(state): State<AppState>, Query(params): Params) -> &'static str {
    let key = params.get("key").cloned().unwrap_or_default();
    if state.hit(&key) == 1 {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
    "fast"
}

async fn flaky_handler(State(state): State<AppState>, Query(params): Params) -> Response {
    let key = params.get("key").cloned().unwrap_or_default();
    let fail = usize::try_from(number(&params, "fail")).unwrap_or_default();
    if state.hit(&key) <= fail {
        return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
    }
    "recovered".into_response()
}

async fn cookie_handler(headers: HeaderMap) -> Response {
    let received = headers
        .get(header::COOKIE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_owned();
    ([(header::SET_COOKIE, "sid=abc; Path=/")], received).into_response()
}

async fn upload_handler(body: Bytes) -> String {
    let text = String::from_utf8_lossy(&body);
    let has_title = text.contains("name=\"title\"") && text.contains("report");
    let has_file = text.contains("filename=\"a.txt\"") && text.contains("hello file");
    format!("{has_title}_{has_file}")
}

struct TestServer {
    base_url: String,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn options(&self) -> ClientOptions {
        ClientOptions::new()
            .base_address(&self.base_url)
            .expect("test server address must be absolute")
    }

    fn client(&self) -> HttpUtil {
        HttpUtil::new(self.options()).expect("client must build")
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

async fn spawn_server() -> TestServer {
    let app = Router::new()
        .route("/test/check", any(|| async { "ok" }))
        .route("/test/token", get(token_handler))
        .route("/test/method", any(method_handler))
        .route("/test/data", any(data_handler))
        .route("/test/form-data", post(form_data_handler))
        .route("/test/get-query", get(get_query_handler))
        .route("/test/async-stream", any(async_stream_handler))
        .route("/test/async-stream-object", any(async_stream_object_handler))
        .route("/test/async-stream-line", any(async_stream_line_handler))
        .route("/test/slow", any(slow_handler))
        .route("/test/slow-once", any(slow_once_handler))
        .route("/test/flaky", any(flaky_handler))
        .route("/test/cookie", any(cookie_handler))
        .route("/test/large", get(|| async { "x".repeat(1024) }))
        .route("/test/upload", post(upload_handler))
        .with_state(AppState::default());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("test server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        task,
    }
}

fn counting_delay(calls: &Arc<Mutex<Vec<usize>>>) -> RetryDelay {
    let calls = Arc::clone(calls);
    Arc::new(move |attempt: usize| -> i64 {
        calls
            .lock()
            .expect("delay mutex must not be poisoned")
            .push(attempt);
        10
    })
}

#[tokio::test]
async fn check_returns_body_and_diagnostics() {
    let server = spawn_server().await;
    let client = server.client();

    let response = client
        .get("test/check")
        .expect("request")
        .send()
        .await
        .expect("check must succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.is_success_status());
    assert_eq!(response.content_length(), Some(2));
    assert!(response.request_info().contains("/test/check"));
    assert!(response.response_info().starts_with("StatusCode: 200"));
    assert_eq!(response.read_as_string().await.expect("text body"), "ok");
    assert_eq!(client.pending().value(), 0);
}

#[tokio::test]
async fn default_headers_reach_the_server() {
    let server = spawn_server().await;
    let client = HttpUtil::new(server.options().default_headers(|headers| {
        headers.insert("token", "abc".parse().expect("valid header value"));
    }))
    .expect("client must build");

    let token = client
        .get("test/token")
        .expect("request")
        .read_as_string()
        .await
        .expect("token echo");
    assert_eq!(token, "abc");

    let overridden = client
        .get("test/token")
        .expect("request")
        .configure_headers(|headers| {
            headers.insert("token", "xyz".parse().expect("valid header value"));
        })
        .read_as_string()
        .await
        .expect("token echo");
    assert_eq!(overridden, "xyz");
}

#[tokio::test]
async fn every_verb_reaches_the_method_endpoint() {
    let server = spawn_server().await;
    let client = server.client();

    let requests = [
        ("GET", client.get("test/method")),
        ("POST", client.post("test/method")),
        ("PUT", client.put("test/method")),
        ("DELETE", client.delete("test/method")),
        ("PATCH", client.patch("test/method")),
        ("OPTIONS", client.options("test/method")),
    ];
    for (expected, request) in requests {
        let method = request
            .expect("request")
            .read_as_string()
            .await
            .expect("method echo");
        assert_eq!(method, expected);
    }

    let head = client
        .head("test/method")
        .expect("request")
        .send()
        .await
        .expect("head");
    assert!(head.is_success_status());
}

#[tokio::test]
async fn json_body_and_query_values_round_trip() {
    let server = spawn_server().await;
    let client = server.client();

    let post = client
        .post("test/data")
        .and_then(|request| request.add_query("P3", 3))
        .and_then(|request| request.set_json(&json!({"P1": 1, "P2": 2}), None))
        .expect("request")
        .read_as_string()
        .await
        .expect("post");
    assert_eq!(post, "POST_6");

    let get = client
        .get("test/data")
        .and_then(|request| request.add_queries([("P1", 1), ("P2", 2), ("P3", 3)], true))
        .expect("request")
        .read_as_string()
        .await
        .expect("get");
    assert_eq!(get, "GET_6");

    let raw = client
        .get("test/data?")
        .and_then(|request| request.add_query_str("?P1=1&P2=2"))
        .and_then(|request| request.add_query_str("P3=3"))
        .expect("request")
        .read_as_string()
        .await
        .expect("raw query");
    assert_eq!(raw, "GET_6");
}

#[tokio::test]
async fn form_string_map_and_struct_send_identical_bodies() {
    #[derive(Serialize)]
    struct FormBody {
        #[serde(rename = "P1")]
        p1: i32,
        #[serde(rename = "P2")]
        p2: i32,
    }

    let server = spawn_server().await;
    let client = server.client();

    let from_text = client
        .post_form_data("test/form-data?P3=3")
        .and_then(|request| request.set_text("P1=1&P2=2", None))
        .expect("request")
        .read_as_string()
        .await
        .expect("text form");
    let from_map = client
        .post_form_data("test/form-data?P3=3")
        .and_then(|request| request.set_map([("P1", "1"), ("P2", "2")], None))
        .expect("request")
        .read_as_string()
        .await
        .expect("map form");
    let from_struct = client
        .post_form_data("test/form-data?P3=3")
        .and_then(|request| request.set_form(&FormBody { p1: 1, p2: 2 }))
        .expect("request")
        .read_as_string()
        .await
        .expect("struct form");

    assert_eq!(from_text, "POST_6");
    assert_eq!(from_map, from_text);
    assert_eq!(from_struct, from_text);
}

#[tokio::test]
async fn multipart_upload_carries_text_and_file_parts() {
    let server = spawn_server().await;
    let content = FileContent::new()
        .text("title", "report", None)
        .file("upload", "a.txt", b"hello file".to_vec());

    let result = server
        .client()
        .post("test/upload")
        .and_then(|request| request.set_file_content(content))
        .expect("request")
        .read_as_string()
        .await
        .expect("upload");
    assert_eq!(result, "true_true");
}

#[tokio::test]
async fn fail_status_retry_recovers_first_rejection() {
    let server = spawn_server().await;
    let client = server.client();

    let values = client
        .get("test/get-query")
        .and_then(|request| request.add_query("id", 1))
        .and_then(|request| request.add_query("name", 2))
        .and_then(|request| request.add_query("reqId", "retry-once"))
        .expect("request")
        .set_retry(1, None, RetryTrigger::FAIL_STATUS_CODE)
        .read_as::<Vec<String>>()
        .await
        .expect("retried request");
    assert_eq!(values, Some(vec!["1".to_owned(), "2".to_owned()]));
}

#[tokio::test]
async fn unretried_failure_status_is_returned_or_raised() {
    let server = spawn_server().await;
    let client = server.client();

    let request = client
        .get("test/get-query")
        .and_then(|request| request.add_query("id", 1))
        .and_then(|request| request.add_query("name", 2))
        .and_then(|request| request.add_query("reqId", "no-retry"))
        .expect("request");
    let response = request.send().await.expect("status is not an error");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let err = client
        .get("test/get-query")
        .and_then(|request| request.add_query("reqId", "ensure"))
        .expect("request")
        .ensure_success_status(true)
        .send()
        .await
        .expect_err("ensure success must fail");
    assert_eq!(err.status(), Some(StatusCode::BAD_REQUEST));
}

#[tokio::test]
async fn retry_delays_receive_attempt_numbers() {
    let server = spawn_server().await;
    let calls = Arc::new(Mutex::new(Vec::new()));

    let body = server
        .client()
        .get("test/flaky?key=delays&fail=2")
        .expect("request")
        .set_retry(3, Some(counting_delay(&calls)), RetryTrigger::FAIL_STATUS_CODE)
        .read_as_string()
        .await
        .expect("flaky endpoint must recover");
    assert_eq!(body, "recovered");
    assert_eq!(*calls.lock().expect("delay mutex"), vec![1, 2]);
}

#[tokio::test]
async fn pending_count_stays_raised_between_retries() {
    let server = spawn_server().await;
    let client = Arc::new(server.client());
    let observed = Arc::new(Mutex::new(Vec::new()));
    let delay: RetryDelay = {
        let client = Arc::clone(&client);
        let observed = Arc::clone(&observed);
        Arc::new(move |_attempt: usize| -> i64 {
            observed
                .lock()
                .expect("observed mutex must not be poisoned")
                .push(client.pending().value());
            20
        })
    };

    let body = client
        .get("test/flaky?key=pending&fail=2")
        .expect("request")
        .set_retry(3, Some(delay), RetryTrigger::FAIL_STATUS_CODE)
        .read_as_string()
        .await
        .expect("flaky endpoint must recover");

    assert_eq!(body, "recovered");
    assert_eq!(*observed.lock().expect("observed mutex"), vec![1, 1]);
    assert_eq!(client.pending().value(), 0);
}

#[tokio::test]
async fn timeout_error_names_configured_duration() {
    let server = spawn_server().await;
    let err = server
        .client()
        .get("test/slow?ms=2000")
        .and_then(|request| request.set_timeout(Duration::from_millis(200)))
        .expect("request")
        .send()
        .await
        .expect_err("slow endpoint must time out");

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(err.to_string().contains("0.2 seconds"), "{err}");
}

#[tokio::test]
async fn timeout_retry_recovers_slow_first_attempt() {
    let server = spawn_server().await;
    let body = server
        .client()
        .get("test/slow-once?key=timeout-retry")
        .and_then(|request| request.set_timeout(Duration::from_millis(300)))
        .expect("request")
        .set_retry(1, None, RetryTrigger::TIMEOUT)
        .read_as_string()
        .await
        .expect("second attempt must succeed");
    assert_eq!(body, "fast");
}

#[tokio::test]
async fn exception_retry_is_attempted_then_original_error_returned() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("must bind probe");
    let address = listener.local_addr().expect("must have local addr");
    drop(listener);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let client = HttpUtil::new(ClientOptions::new()).expect("client must build");
    let err = client
        .get(&format!("http://{address}/closed"))
        .expect("request")
        .set_retry(2, Some(counting_delay(&calls)), RetryTrigger::EXCEPTION)
        .send()
        .await
        .expect_err("closed port must fail");

    assert!(matches!(err, HttpUtilError::Transport(_)), "{err:?}");
    assert_eq!(*calls.lock().expect("delay mutex"), vec![1, 2]);
}

#[tokio::test]
async fn caller_cancellation_is_not_retried() {
    let server = spawn_server().await;
    let token = CancellationToken::new();
    let request = server
        .client()
        .get("test/slow?ms=2000")
        .expect("request")
        .set_retry(3, None, RetryTrigger::ALL)
        .with_cancellation(token.clone());

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        token.cancel();
    });
    let err = request.send().await.expect_err("cancelled send must fail");
    canceller.await.expect("canceller task");

    assert!(err.is_cancelled(), "{err:?}");
}

#[tokio::test]
async fn cancel_pending_requests_stops_in_flight_sends() {
    let server = spawn_server().await;
    let client = Arc::new(server.client());

    let in_flight = {
        let client = Arc::clone(&client);
        tokio::spawn(async move {
            client
                .get("test/slow?ms=2000")
                .expect("request")
                .send()
                .await
                .map(|response| response.status())
        })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.cancel_pending_requests();

    let result = in_flight.await.expect("request task");
    assert!(matches!(result, Err(HttpUtilError::Cancelled)));

    let after = client
        .get("test/check")
        .expect("request")
        .read_as_string()
        .await
        .expect("later sends are unaffected");
    assert_eq!(after, "ok");
}

#[tokio::test]
async fn json_array_streams_in_source_order() {
    let server = spawn_server().await;
    let client = server.client();

    let numbers: Vec<i64> = client
        .get("test/async-stream?s=1&e=5")
        .expect("request")
        .use_completion_mode(CompletionMode::ResponseHeadersRead)
        .read_as_json_stream::<i64>()
        .await
        .expect("stream")
        .map(|item| item.expect("element"))
        .collect()
        .await;
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

    #[derive(Debug, Deserialize, PartialEq)]
    struct Meta {
        #[serde(rename = "Range")]
        range: Vec<i64>,
    }
    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        #[serde(rename = "Value")]
        value: i64,
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Tags")]
        tags: Vec<String>,
        #[serde(rename = "Meta")]
        meta: Meta,
    }
    let item = |value: i64| Item {
        value,
        name: format!("item,{value}"),
        tags: vec!["a".to_owned(), "b".to_owned()],
        meta: Meta { range: vec![3, 4] },
    };

    for mode in [CompletionMode::ResponseContentRead, CompletionMode::ResponseHeadersRead] {
        let objects: Vec<Item> = client
            .get("test/async-stream-object?s=3&e=4")
            .expect("request")
            .use_completion_mode(mode)
            .read_as_json_stream::<Item>()
            .await
            .expect("stream")
            .map(|item| item.expect("element"))
            .collect()
            .await;
        assert_eq!(objects, vec![item(3), item(4)]);
    }
}

#[tokio::test]
async fn line_and_block_streams_decode_chunks() {
    #[derive(Debug, Deserialize)]
    struct Tick {
        #[serde(rename = "C")]
        c: i64,
    }

    let server = spawn_server().await;
    let client = server.client();

    let ticks: Vec<i64> = client
        .get("test/async-stream-line?s=1&e=4")
        .expect("request")
        .use_completion_mode(CompletionMode::ResponseHeadersRead)
        .read_lines_as::<Tick>()
        .await
        .expect("stream")
        .map(|tick| tick.expect("tick").c)
        .collect()
        .await;
    assert_eq!(ticks, vec![1, 2, 3, 4]);

    let kept = LineReader::new().replacer(|line| line.contains("\"C\":2").then_some(line));
    let raw: Vec<String> = client
        .get("test/async-stream-line?s=1&e=2")
        .expect("request")
        .read_stream_as::<String, _>(kept)
        .await
        .expect("stream")
        .map(|line| line.expect("line"))
        .collect()
        .await;
    assert_eq!(raw.len(), 1);
    let only: JsonValue = serde_json::from_str(&raw[0]).expect("raw line is json");
    assert_eq!(only, json!({"S": 1, "E": 2, "C": 2}));

    let blocks: Vec<String> = client
        .get("test/async-stream?s=1&e=5")
        .expect("request")
        .read_stream_as::<String, _>(BlockReader::new(4).expect("valid block size"))
        .await
        .expect("stream")
        .map(|block| block.expect("block"))
        .collect()
        .await;
    assert_eq!(blocks.concat(), "[1,2,3,4,5]");
    assert!(blocks.iter().all(|block| block.chars().count() <= 4));

    let bytes: Vec<Bytes> = client
        .get("test/large")
        .expect("request")
        .read_bytes_stream(BytesReader::new(256).expect("valid size"))
        .await
        .expect("stream")
        .map(|chunk| chunk.expect("chunk"))
        .collect()
        .await;
    assert_eq!(bytes.len(), 4);
}

#[tokio::test]
async fn cancelling_a_stream_stops_further_elements() {
    let server = spawn_server().await;
    let token = CancellationToken::new();
    let mut numbers = server
        .client()
        .get("test/async-stream?s=1&e=50")
        .expect("request")
        .use_completion_mode(CompletionMode::ResponseHeadersRead)
        .with_cancellation(token.clone())
        .read_as_json_stream::<i64>()
        .await
        .expect("stream");

    let first = numbers.next().await.expect("first element").expect("valid element");
    assert_eq!(first, 1);

    token.cancel();
    assert!(matches!(numbers.next().await, Some(Err(HttpUtilError::Cancelled))));
    assert!(numbers.next().await.is_none());
}

#[tokio::test]
async fn cookies_round_trip_through_the_jar() {
    let server = spawn_server().await;
    let client = server.client();

    let first = client
        .get("test/cookie")
        .expect("request")
        .send()
        .await
        .expect("cookie response");
    assert_eq!(first.cookies()[0].name, "sid");
    assert_eq!(first.read_as_string().await.expect("body"), "");

    let echoed = client
        .get("test/cookie")
        .and_then(|request| request.add_cookie("lang", "en"))
        .expect("request")
        .read_as_string()
        .await
        .expect("cookie echo");
    assert!(echoed.contains("sid=abc"), "{echoed}");
    assert!(echoed.contains("lang=en"), "{echoed}");

    let without = client
        .get("test/cookie")
        .expect("request")
        .use_cookies(false)
        .read_as_string()
        .await
        .expect("cookie echo");
    assert_eq!(without, "");
}

#[tokio::test]
async fn buffered_body_respects_size_limit() {
    let server = spawn_server().await;
    let client = HttpUtil::new(
        server
            .options()
            .max_response_buffer_size(100)
            .expect("valid limit"),
    )
    .expect("client must build");

    let err = client
        .get("test/large")
        .expect("request")
        .send()
        .await
        .expect_err("body over the limit must fail");
    assert!(matches!(err, HttpUtilError::BodyTooLarge { limit: 100 }));
}

#[tokio::test]
async fn bytes_and_base64_reads() {
    let server = spawn_server().await;
    let client = server.client();

    let bytes = client
        .get(&server.url("test/check"))
        .expect("request")
        .read_as_bytes()
        .await
        .expect("bytes");
    assert_eq!(&bytes[..], b"ok");

    let encoded = client
        .get("test/check")
        .expect("request")
        .read_as_base64()
        .await
        .expect("base64");
    assert_eq!(encoded.as_deref(), Some("b2s="));
}

#[tokio::test]
async fn one_builder_can_be_sent_repeatedly() {
    let server = spawn_server().await;
    let request = server
        .client()
        .post("test/data?P3=3")
        .and_then(|request| request.set_json(&json!({"P1": 1, "P2": 2}), None))
        .expect("request");

    for _ in 0..2 {
        let body = request
            .send()
            .await
            .expect("send")
            .read_as_string()
            .await
            .expect("body");
        assert_eq!(body, "POST_6");
    }
}

#[tokio::test]
async fn factory_instances_share_configuration() {
    let server = spawn_server().await;
    let factory = HttpUtilFactory::default();
    let url = Url::parse(&server.base_url).expect("valid url");
    factory
        .configure_host(&url, server.options())
        .expect("profile registered");

    let client = factory.get_for(&url).expect("instance");
    let body = client
        .get("test/check")
        .expect("request")
        .read_as_string()
        .await
        .expect("check");
    assert_eq!(body, "ok");
    assert_eq!(client.pending().value(), 0);

    assert!(factory.dispose_host(&url));
    assert!(client.is_disposed());
    assert!(matches!(client.get("test/check"), Err(HttpUtilError::Disposed(_))));
}
