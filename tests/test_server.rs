// End-to-end tests over a real socket

use service_router::server::serve;
use service_router::{AppContext, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;

const SERVICES: &str = r#"
groups:
  - name: site
    services:
      - id: hello
        uri: ["/hello/{name}"]
        generators:
          - type: static
            params:
              - { name: element, value: greeting }
              - { name: content, value: "Hello {name}" }
      - id: echo
        method: POST
        uri: ["/echo"]
        generators:
          - type: params
"#;

async fn start() -> String {
    let app = AppContext::new(ServerConfig::default()).unwrap();
    app.load_services_from_str(SERVICES).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(Arc::new(app), listener));
    format!("http://{}", addr)
}

#[tokio::test]
async fn test_get_and_revalidate() {
    let base = start().await;
    let client = reqwest::Client::new();

    let response = client.get(format!("{}/hello/world", base)).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let etag = response
        .headers()
        .get("etag")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let body = response.text().await.unwrap();
    assert!(body.contains("<greeting>Hello world</greeting>"), "{}", body);

    let revalidated = client
        .get(format!("{}/hello/world", base))
        .header("if-none-match", etag.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(revalidated.status(), 304);
}

#[tokio::test]
async fn test_routing_errors_over_the_wire() {
    let base = start().await;
    let client = reqwest::Client::new();

    let missing = client.get(format!("{}/missing", base)).send().await.unwrap();
    assert_eq!(missing.status(), 404);
    assert_eq!(missing.text().await.unwrap(), "404 Not Found");

    let wrong = client.get(format!("{}/echo", base)).send().await.unwrap();
    assert_eq!(wrong.status(), 405);
    assert_eq!(wrong.headers().get("allow").unwrap(), "POST");
}

#[tokio::test]
async fn test_form_post() {
    let base = start().await;
    let response = reqwest::Client::new()
        .post(format!("{}/echo", base))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("greeting=hi%21")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");
    let body = response.text().await.unwrap();
    assert!(body.contains("<param name=\"greeting\">hi!</param>"), "{}", body);
}

#[tokio::test]
async fn test_control_over_the_wire() {
    let base = start().await;
    let response = reqwest::get(format!("{}/hello/x?_reset_etag", base))
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    let body = response.text().await.unwrap();
    assert!(body.contains("\"success\":true"), "{}", body);
}
