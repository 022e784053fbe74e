use std::{
    io::{BufRead, BufReader, Read, Write},
    net::TcpListener,
    num::NonZeroU32,
    sync::Arc,
    thread::{self, JoinHandle},
};

use comms::{GaussianParam, ModelSpec, Variant};
use controller::{
    SessionError, SourceImage,
    configs::ClientConfig,
    remote::{ComputeService, HttpComputeService},
};

/// Accepts a single connection, answers it with `status` and `body` and returns the raw
/// request it received.
fn serve_once(status: &'static str, body: &'static str) -> (ClientConfig, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream);

        let mut head = String::new();
        let mut content_length = 0;
        loop {
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            if let Some((name, value)) = line.split_once(':') {
                if name.eq_ignore_ascii_case("content-length") {
                    content_length = value.trim().parse().unwrap();
                }
            }
            head.push_str(&line);
            if line == "\r\n" || line.is_empty() {
                break;
            }
        }

        let mut payload = vec![0; content_length];
        reader.read_exact(&mut payload).unwrap();

        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        reader.get_mut().write_all(response.as_bytes()).unwrap();

        head + &String::from_utf8_lossy(&payload)
    });

    let config = ClientConfig {
        server_url: format!("http://{addr}"),
        ..ClientConfig::default()
    };
    (config, handle)
}

fn model(count: u32, variant: Variant) -> ModelSpec {
    ModelSpec {
        gaussian_count: NonZeroU32::new(count).unwrap(),
        variant,
    }
}

#[tokio::test]
async fn device_info_reads_the_device() {
    let (config, server) = serve_once("200 OK", r#"{"device":"cuda:0"}"#);
    let service = HttpComputeService::new(&config);

    let info = service.device_info().await.unwrap();
    let request = server.join().unwrap();

    assert_eq!(info.device, "cuda:0");
    assert!(request.starts_with("GET /device-info HTTP/1.1\r\n"));
}

#[tokio::test]
async fn initialize_uploads_a_multipart_form() {
    let (config, server) = serve_once(
        "200 OK",
        r#"{"sourceRendering":"AAAA","predictedRendering":"BBBB","pointsRendering":"CCCC"}"#,
    );
    let service = HttpComputeService::new(&config);
    let image = Arc::new(SourceImage::new("cat.png", b"PNGDATA".to_vec()));

    let response = service
        .initialize(image, model(1000, Variant::Covariance))
        .await
        .unwrap();
    let request = server.join().unwrap();

    assert!(request.starts_with("POST /initialize HTTP/1.1\r\n"));
    assert!(request.contains("multipart/form-data; boundary="));
    assert!(request.contains("filename=\"cat.png\""));
    assert!(request.contains("PNGDATA"));
    assert!(request.contains("name=\"gaussianCount\"\r\n\r\n1000\r\n"));
    assert!(request.contains("name=\"variantId\"\r\n\r\ncovariance\r\n"));
    assert_eq!(response.source_rendering, comms::Rendering::from_encoded("AAAA"));
}

#[tokio::test]
async fn reinitialize_sends_the_model_as_query() {
    let (config, server) = serve_once(
        "200 OK",
        r#"{"predictedRendering":"BBBB","pointsRendering":"CCCC"}"#,
    );
    let service = HttpComputeService::new(&config);

    service
        .reinitialize(model(250, Variant::Variance))
        .await
        .unwrap();
    let request = server.join().unwrap();

    assert!(request.starts_with("POST /reinitialize?gaussianCount=250&variantId=variance HTTP/1.1\r\n"));
}

#[tokio::test]
async fn fetch_params_accepts_snake_case_fields() {
    let (config, server) = serve_once(
        "200 OK",
        r#"{"params":[
            {"index":1,"mean_x":0.5,"mean_y":0.5,"sigma_x":0.1,"sigma_y":0.2,"sigma_xy":0.01,"weight":0.9},
            {"index":0,"mean_x":0.1,"mean_y":0.2,"sigma_x":0.3,"sigma_y":0.4,"sigma_xy":-0.02,"weight":0.5}
        ],"has_covariance":true,"count":2}"#,
    );
    let service = HttpComputeService::new(&config);

    let set = service.fetch_params().await.unwrap();
    let request = server.join().unwrap();

    assert!(request.starts_with("GET /get-params HTTP/1.1\r\n"));
    assert!(set.has_covariance);
    assert_eq!(set.len(), 2);
    assert_eq!(set.params[0].index, 0);
    assert_eq!(set.params[1].sigma_xy, Some(0.01));
}

#[tokio::test]
async fn update_params_posts_the_collection() {
    let (config, server) = serve_once(
        "200 OK",
        r#"{"predictedRendering":"BBBB","pointsRendering":"CCCC","count":1}"#,
    );
    let service = HttpComputeService::new(&config);
    let params = vec![GaussianParam {
        index: 0,
        mean_x: 0.25,
        mean_y: 0.75,
        sigma_x: 0.1,
        sigma_y: 0.2,
        sigma_xy: None,
        weight: 0.5,
    }];

    let response = service.update_params(params).await.unwrap();
    let request = server.join().unwrap();

    assert!(request.starts_with("POST /update-params HTTP/1.1\r\n"));
    let body = &request[request.find("\r\n\r\n").unwrap() + 4..];
    let body: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(body["params"][0]["meanX"], 0.25);
    assert_eq!(body["params"][0]["weight"], 0.5);
    assert!(body["params"][0].get("sigmaXY").is_none());
    assert_eq!(response.count, 1);
}

#[tokio::test]
async fn error_status_is_a_transport_error() {
    let (config, server) = serve_once("500 Internal Server Error", "boom");
    let service = HttpComputeService::new(&config);

    let err = service.stop().await.unwrap_err();
    let request = server.join().unwrap();

    assert!(request.starts_with("POST /stop HTTP/1.1\r\n"));
    assert_eq!(
        err,
        SessionError::Transport {
            operation: "stop",
            detail: "HTTP 500: boom".to_string(),
        }
    );
}

#[tokio::test]
async fn unreadable_body_is_a_transport_error() {
    let (config, server) = serve_once("200 OK", "not json");
    let service = HttpComputeService::new(&config);

    let err = service.device_info().await.unwrap_err();
    server.join().unwrap();

    assert!(matches!(err, SessionError::Transport { operation: "device info", .. }));
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let addr = TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let config = ClientConfig {
        server_url: format!("http://{addr}"),
        ..ClientConfig::default()
    };
    let service = HttpComputeService::new(&config);

    let err = service.fetch_params().await.unwrap_err();
    assert!(matches!(err, SessionError::Transport { .. }));
}
