//! Real sockets: one request over HTTP/1.1, then a graceful shutdown.

use std::time::Duration;

use plinth::{App, Request, Router, Server};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

async fn hello(req: Request) -> String {
    format!("hello {}", req.param("name").unwrap_or_default())
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn connect(port: u16) -> TcpStream {
    for _ in 0..100 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server did not start on port {port}");
}

#[tokio::test]
async fn serves_over_tcp_and_shuts_down_on_signal() {
    let port = free_port();
    let app = App::from(Router::new().get("/hello/{name}", hello));
    let (stop, stopped) = oneshot::channel::<()>();

    let server = Server::bind(&format!("127.0.0.1:{port}"))
        .unwrap()
        .shutdown_timeout(Duration::from_secs(2));
    let running = tokio::spawn(server.serve_with_shutdown(app, async {
        let _ = stopped.await;
    }));

    let mut stream = connect(port).await;
    stream
        .write_all(b"GET /api/v1/hello/ada HTTP/1.1\r\nhost: localhost\r\nconnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).await.unwrap();
    let response = String::from_utf8_lossy(&raw).to_ascii_lowercase();

    assert!(response.starts_with("http/1.1 200 ok"), "{response}");
    assert!(response.contains("x-request-id: "));
    assert!(response.ends_with("hello ada"));

    stop.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), running).await.unwrap().unwrap();
    assert!(result.is_ok());
}
