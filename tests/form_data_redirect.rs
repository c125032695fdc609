//! Multipart and byte bodies replayed across 307/308 redirects.

mod helpers;

use std::io::Write;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::stream;
use regex::Regex;
use url::Url;

use helpers::{acceptor, serve, start_proxy, ConnectReply, TestCa};
use tunnel_fetch::{
    Body, Client, ClientConfig, Error, FormPart, MultipartSpec, PartSource, Request, TrustContext,
};

/// One request as the target saw it.
#[derive(Debug, Clone)]
struct Seen {
    path: String,
    method: Method,
    content_type: Option<String>,
    body: Bytes,
}

type SeenLog = Arc<Mutex<Vec<Seen>>>;

async fn record(
    State(seen): State<SeenLog>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    seen.lock().unwrap().push(Seen {
        path: path.clone(),
        method,
        content_type: headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });
    let status = match path.as_str() {
        "/307" => StatusCode::TEMPORARY_REDIRECT,
        "/308" => StatusCode::PERMANENT_REDIRECT,
        "/303" => StatusCode::SEE_OTHER,
        _ => return (StatusCode::OK, "done").into_response(),
    };
    (status, [(header::LOCATION, "/final")]).into_response()
}

async fn start_target(tls: Option<&TestCa>) -> (u16, SeenLog) {
    let seen = SeenLog::default();
    let app = Router::new().fallback(record).with_state(seen.clone());
    let acceptor = tls.map(|ca| acceptor(&ca.server_cert(), None));
    (serve(app, acceptor).await, seen)
}

fn follow_all() -> Client {
    Client::new(ClientConfig {
        follow_all_redirects: true,
        ..Default::default()
    })
}

fn seen(log: &SeenLog) -> Vec<Seen> {
    log.lock().unwrap().clone()
}

/// Splits a recorded multipart request into its boundary and body text.
fn boundary_of(request: &Seen) -> String {
    let pattern = Regex::new(r"^multipart/form-data; boundary=(-{26}\d{24})$").unwrap();
    let content_type = request.content_type.as_deref().expect("content type");
    let captures = pattern
        .captures(content_type)
        .unwrap_or_else(|| panic!("unexpected content type {content_type}"));
    captures[1].to_string()
}

#[tokio::test]
async fn test_map_form_replayed_on_307_and_308() {
    let mut image = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
    image.write_all(b"\xff\xd8\xffjpeg").unwrap();
    let image_name = image
        .path()
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();

    for status in [307_u16, 308] {
        let (port, log) = start_target(None).await;
        let form = MultipartSpec::map()
            .field("my_field", "my_value")
            .batch("my_buffer", ["first", "second"])
            .field("my_file", PartSource::file(image.path()));

        let exchange = follow_all()
            .execute(Request::post(format!("http://localhost:{port}/{status}")).form(form))
            .await;

        let response = exchange.result.unwrap();
        assert_eq!(response.text(), "done");
        assert_eq!(response.redirects(), 1);
        assert_eq!(
            exchange.trace.summary(),
            vec![
                format!("direct localhost:{port}"),
                format!("response {status}"),
                format!("redirect {status} http://localhost:{port}/final"),
                format!("direct localhost:{port}"),
                "response 200".to_string(),
            ]
        );

        let requests = seen(&log);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].path, "/final");
        assert!(requests.iter().all(|r| r.method == Method::POST));

        let first = boundary_of(&requests[0]);
        let second = boundary_of(&requests[1]);
        assert_ne!(first, second, "each attempt gets a fresh boundary");

        let expected = |b: &str| {
            let mut body = format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"my_field\"\r\n\r\nmy_value\r\n\
                 --{b}\r\nContent-Disposition: form-data; name=\"my_buffer\"\r\n\r\nfirst\r\n\
                 --{b}\r\nContent-Disposition: form-data; name=\"my_buffer\"\r\n\r\nsecond\r\n\
                 --{b}\r\nContent-Disposition: form-data; name=\"my_file\"; filename=\"{image_name}\"\r\n\
                 Content-Type: image/jpeg\r\n\r\n"
            )
            .into_bytes();
            body.extend_from_slice(b"\xff\xd8\xffjpeg");
            body.extend_from_slice(format!("\r\n--{b}--\r\n").as_bytes());
            body
        };
        assert_eq!(requests[0].body.as_ref(), expected(&first).as_slice());
        assert_eq!(requests[1].body.as_ref(), expected(&second).as_slice());
    }
}

#[tokio::test]
async fn test_ordered_form_keeps_part_options_on_308() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(b"classified").unwrap();
    let (port, log) = start_target(None).await;

    let form = MultipartSpec::ordered()
        .part(FormPart::new("field", "value"))
        .part(
            FormPart::new("my_file", PartSource::file(file.path()))
                .filename("topsecret.jpg")
                .content_type("image/custom"),
        );
    let exchange = follow_all()
        .execute(Request::post(format!("http://localhost:{port}/308")).form(form))
        .await;
    assert_eq!(exchange.result.unwrap().status(), StatusCode::OK);

    let requests = seen(&log);
    assert_eq!(requests.len(), 2);
    let boundary = boundary_of(&requests[1]);
    let expected = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"field\"\r\n\r\nvalue\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"my_file\"; filename=\"topsecret.jpg\"\r\n\
         Content-Type: image/custom\r\n\r\nclassified\r\n--{boundary}--\r\n"
    );
    assert_eq!(requests[1].body, Bytes::from(expected));
}

#[tokio::test]
async fn test_see_other_switches_to_get_without_body() {
    let (port, log) = start_target(None).await;
    let form = MultipartSpec::map().field("my_field", "my_value");

    let exchange = follow_all()
        .execute(Request::post(format!("http://localhost:{port}/303")).form(form))
        .await;
    assert_eq!(exchange.result.unwrap().text(), "done");

    let requests = seen(&log);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, Method::GET);
    assert_eq!(requests[1].content_type, None);
    assert!(requests[1].body.is_empty());
}

#[tokio::test]
async fn test_one_shot_part_cannot_follow_307() {
    let (port, log) = start_target(None).await;
    let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"once"))]);
    let form = MultipartSpec::map()
        .field("my_field", "my_value")
        .field("upload", PartSource::one_shot(chunks));

    let exchange = follow_all()
        .execute(Request::post(format!("http://localhost:{port}/307")).form(form))
        .await;

    match exchange.result {
        Err(Error::BodyNotReplayable { status, reason }) => {
            assert_eq!(status, StatusCode::TEMPORARY_REDIRECT);
            assert!(reason.contains("upload"), "{reason}");
        }
        other => panic!("expected BodyNotReplayable, got {other:?}"),
    }
    assert_eq!(seen(&log).len(), 1);
    assert_eq!(
        exchange.trace.summary(),
        vec![format!("direct localhost:{port}"), "response 307".to_string()]
    );
}

#[tokio::test]
async fn test_stream_body_cannot_follow_308() {
    let (port, log) = start_target(None).await;
    let chunks = stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from_static(b"streamed"))]);

    let exchange = follow_all()
        .execute(Request::post(format!("http://localhost:{port}/308")).body(Body::stream(chunks)))
        .await;

    assert!(matches!(
        exchange.result,
        Err(Error::BodyNotReplayable { status, .. }) if status == StatusCode::PERMANENT_REDIRECT
    ));
    let requests = seen(&log);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].body, Bytes::from_static(b"streamed"));
}

#[tokio::test]
async fn test_byte_body_replayed_on_307() {
    let (port, log) = start_target(None).await;

    let exchange = follow_all()
        .execute(
            Request::post(format!("http://localhost:{port}/307"))
                .header("content-type", "text/plain")
                .body("payload"),
        )
        .await;
    assert_eq!(exchange.result.unwrap().status(), StatusCode::OK);

    let requests = seen(&log);
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, Method::POST);
    assert_eq!(requests[1].content_type.as_deref(), Some("text/plain"));
    assert_eq!(requests[1].body, Bytes::from_static(b"payload"));
}

#[tokio::test]
async fn test_post_redirect_not_followed_by_default() {
    let (port, log) = start_target(None).await;
    let form = MultipartSpec::map().field("my_field", "my_value");

    let exchange = Client::new(ClientConfig::default())
        .execute(Request::post(format!("http://localhost:{port}/307")).form(form))
        .await;

    let response = exchange.result.unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(header::LOCATION).unwrap(),
        "/final"
    );
    assert_eq!(seen(&log).len(), 1);
}

#[tokio::test]
async fn test_form_replayed_through_tunnel() {
    let ca = TestCa::new("target CA");
    let (port, log) = start_target(Some(&ca)).await;
    let (proxy_port, proxy_log) = start_proxy(None, ConnectReply::EstablishedWithNoise).await;

    let client = Client::new(ClientConfig {
        proxy: Some(Url::parse(&format!("http://localhost:{proxy_port}")).unwrap()),
        target_trust: TrustContext::new().with_ca_bundle(ca.cert_pem.clone()),
        follow_all_redirects: true,
        ..Default::default()
    });
    let form = MultipartSpec::map().field("my_field", "my_value");
    let exchange = client
        .execute(Request::post(format!("https://localhost:{port}/307")).form(form))
        .await;

    assert_eq!(exchange.result.unwrap().text(), "done");
    assert_eq!(
        exchange.trace.summary(),
        vec![
            format!("connect localhost:{port}"),
            "response 307".to_string(),
            format!("redirect 307 https://localhost:{port}/final"),
            format!("connect localhost:{port}"),
            "response 200".to_string(),
        ]
    );
    assert_eq!(proxy_log.events().len(), 2);

    let requests = seen(&log);
    assert_eq!(requests.len(), 2);
    let boundary = boundary_of(&requests[1]);
    assert!(requests[1]
        .body
        .ends_with(format!("--{boundary}--\r\n").as_bytes()));
}
