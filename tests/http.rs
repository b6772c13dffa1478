use std::time::Duration;

use occurrences::identity::{Identity, IdentityProvider, RotatorIdentity};
use occurrences::request::{HttpTransport, SearchRequest, Transport};
use occurrences::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Serves one canned response per connection, in order, and hands back the
/// lowercased request heads it received.
async fn serve(responses: Vec<String>) -> (String, JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let mut heads = Vec::new();
        for response in responses {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut head = Vec::new();
            let mut chunk = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&chunk[..n]);
            }
            heads.push(String::from_utf8_lossy(&head).to_lowercase());
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
        heads
    });
    (format!("http://{addr}"), handle)
}

fn http(status: &str, headers: &[&str], body: &str) -> String {
    let mut res = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for header in headers {
        res.push_str(header);
        res.push_str("\r\n");
    }
    res.push_str("\r\n");
    res.push_str(body);
    res
}

fn rotator(base: &str) -> RotatorIdentity {
    RotatorIdentity::new(
        format!("{base}/rotate"),
        Some("secret".into()),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn rotator_hands_out_the_proxy() {
    let json = r#"{"proxy": "10.1.2.3:3128", "country": "NL"}"#;
    let ok = http("200 OK", &["Content-Type: application/json"], json);
    let (base, server) = serve(vec![ok]).await;

    let identity = rotator(&base).acquire().await.unwrap();

    assert_eq!(identity.proxy.as_deref(), Some("10.1.2.3:3128"));
    let heads = server.await.unwrap();
    assert!(heads[0].starts_with("get /rotate?apikey=secret "), "{}", heads[0]);
}

#[tokio::test]
async fn rotator_with_malformed_payload_is_unavailable() {
    let (base, server) = serve(vec![http("200 OK", &[], "<html>oops</html>")]).await;

    let res = rotator(&base).acquire().await;

    assert!(matches!(res, Err(Error::IdentityUnavailable(_))), "{res:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn rotator_error_status_is_unavailable() {
    let json = r#"{"proxy": "10.1.2.3:3128"}"#;
    let (base, server) = serve(vec![http("503 Service Unavailable", &[], json)]).await;

    let res = rotator(&base).acquire().await;

    match res {
        Err(Error::IdentityUnavailable(msg)) => assert!(msg.contains("503"), "{msg}"),
        other => panic!("expected IdentityUnavailable, got {other:?}"),
    }
    server.await.unwrap();
}

#[tokio::test]
async fn rotator_blank_proxy_is_unavailable() {
    let (base, server) = serve(vec![http("200 OK", &[], r#"{"proxy": "  "}"#)]).await;

    let res = rotator(&base).acquire().await;

    assert!(matches!(res, Err(Error::IdentityUnavailable(_))), "{res:?}");
    server.await.unwrap();
}

#[tokio::test]
async fn transport_sends_query_and_keeps_session_cookies() {
    let body = r#"<div id="gs_ab_md">About 12 results</div>"#;
    let (base, server) = serve(vec![
        http("200 OK", &["Set-Cookie: GSP=LM=1; Path=/"], body),
        http("200 OK", &["Set-Cookie: GSP=; Max-Age=0; Path=/"], body),
        http("429 Too Many Requests", &[], "slow down"),
    ]).await;
    let transport = HttpTransport::new(Duration::from_secs(5), None);
    let identity = Identity::direct();
    let request = SearchRequest::new(format!("{base}/scholar"), "neural network", 2001, 2001);

    let first = transport.send(&request, &identity).await.unwrap();
    let second = transport.send(&request, &identity).await.unwrap();
    let third = transport.send(&request, &identity).await.unwrap();

    assert_eq!((first.status, first.body.as_str()), (200, body));
    assert_eq!(second.status, 200);
    assert_eq!((third.status, third.body.as_str()), (429, "slow down"));

    let heads = server.await.unwrap();
    let request_line = heads[0].lines().next().unwrap();
    assert!(request_line.starts_with("get /scholar?"), "{request_line}");
    for param in ["q=neural+network", "as_ylo=2001", "as_yhi=2001", "as_sdt=1%2c5", "hl=en"] {
        assert!(request_line.contains(param), "{param} missing from {request_line}");
    }
    assert!(heads[0].contains("user-agent: mozilla/5.0"));
    assert!(!heads[0].contains("cookie:"));
    assert!(heads[1].contains("cookie: gsp=lm=1"), "{}", heads[1]);
    // Deleted by the second answer.
    assert!(!heads[2].contains("cookie:"), "{}", heads[2]);
}

#[tokio::test]
async fn transport_identities_do_not_share_cookies() {
    let (base, server) = serve(vec![
        http("200 OK", &["Set-Cookie: NID=9; Path=/"], "a"),
        http("200 OK", &[], "b"),
    ]).await;
    let transport = HttpTransport::new(Duration::from_secs(5), None);
    let request = SearchRequest::new(format!("{base}/scholar"), "AI", 2020, 2020);

    transport.send(&request, &Identity::direct()).await.unwrap();
    transport.send(&request, &Identity::direct()).await.unwrap();

    let heads = server.await.unwrap();
    assert!(!heads[1].contains("cookie:"), "{}", heads[1]);
}
