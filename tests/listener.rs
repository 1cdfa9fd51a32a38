use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_h1ws::listener::{BanList, HttpListener, HttpServer};
use async_h1ws::server::ServerOptions;
use async_h1ws::websocket::{self, CloseCode, Message, Options};
use async_h1ws::Error;
use async_std::net::TcpStream;
use async_std::task;
use futures_lite::io::{AsyncReadExt, AsyncWriteExt};
use pretty_assertions::assert_eq;

async fn get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nConnection: close\r\n\r\n",
        path,
        addr.port()
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

/// Answer every request with the prefix it matched and its path. WebSocket
/// requests get an echo session.
fn serve(listener: Arc<HttpListener>, name: &'static str) {
    task::spawn(async move {
        while let Ok(mut ctx) = listener.get_context().await {
            if ctx.request().is_websocket_request() {
                let options = Options {
                    compression: true,
                    protocols: vec!["chat".into()],
                    ..Options::default()
                };
                let ws = match ctx.accept_websocket(options).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                task::spawn(async move {
                    while let Some(message) = ws.recv().await {
                        if let Message::Text(text) = message {
                            ws.send_text(text).await.ok();
                        }
                    }
                });
                continue;
            }
            let body = format!("{} {}", name, ctx.request().url().path());
            ctx.response_mut().set_body(body);
            ctx.finish();
        }
    });
}

async fn started(server: &HttpServer, prefix: &str) -> async_h1ws::Result<Arc<HttpListener>> {
    let listener = Arc::new(server.listener());
    listener.add_prefix(prefix).await?;
    listener.start().await?;
    Ok(listener)
}

#[async_std::test]
async fn routes_by_longest_prefix() -> async_h1ws::Result<()> {
    let server = HttpServer::new(ServerOptions::default());
    let app = started(&server, "http://127.0.0.1:0/app/").await?;
    let admin = started(&server, "http://127.0.0.1:0/app/admin/").await?;
    serve(app.clone(), "app");
    serve(admin.clone(), "admin");

    let addrs = app.local_addrs().await;
    assert_eq!(addrs.len(), 1);
    assert_eq!(admin.local_addrs().await, addrs);
    let addr = addrs[0];
    assert_ne!(addr.port(), 0);

    let response = get(addr, "/app/page").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    assert!(response.ends_with("app /app/page"));

    let response = get(addr, "/app/admin").await;
    assert!(response.ends_with("admin /app/admin"), "{}", response);

    let response = get(addr, "/app/admin/users").await;
    assert!(response.ends_with("admin /app/admin/users"), "{}", response);

    let response = get(addr, "/elsewhere").await;
    assert!(response.starts_with("HTTP/1.1 404 Not Found\r\n"), "{}", response);
    Ok(())
}

#[async_std::test]
async fn banned_clients_are_forbidden() -> async_h1ws::Result<()> {
    let server = HttpServer::with_filter(ServerOptions::default(), Arc::new(BanList::new()));
    let listener = started(&server, "http://127.0.0.1:0/").await?;
    serve(listener.clone(), "root");
    let addr = listener.local_addrs().await[0];

    let localhost: IpAddr = "127.0.0.1".parse().unwrap();
    assert!(server.filter().try_ban(localhost));
    let response = get(addr, "/").await;
    assert!(response.starts_with("HTTP/1.1 403 Forbidden\r\n"), "{}", response);

    assert!(server.filter().try_unban(localhost));
    let response = get(addr, "/").await;
    assert!(response.starts_with("HTTP/1.1 200 OK\r\n"), "{}", response);
    Ok(())
}

#[async_std::test]
async fn conflicting_prefixes() -> async_h1ws::Result<()> {
    let server = HttpServer::new(ServerOptions::default());
    let first = started(&server, "http://127.0.0.1:0/same/").await?;

    let second = server.listener();
    second.add_prefix("http://127.0.0.1:0/other/").await?;
    second.add_prefix("http://127.0.0.1:0/same/").await?;
    assert!(matches!(
        second.start().await,
        Err(Error::PrefixConflict(_))
    ));
    assert!(!second.is_listening().await);

    // The failed start registered nothing, so /other/ is unrouted.
    serve(first.clone(), "first");
    let addr = first.local_addrs().await[0];
    assert!(get(addr, "/other/").await.starts_with("HTTP/1.1 404"));
    assert!(get(addr, "/same/").await.ends_with("first /same/"));

    // The same listener adding a prefix twice is fine.
    first.add_prefix("http://127.0.0.1:0/same/").await?;
    Ok(())
}

#[async_std::test]
async fn prefixes_change_while_running() -> async_h1ws::Result<()> {
    let server = HttpServer::new(ServerOptions::default());
    let listener = started(&server, "http://127.0.0.1:0/a/").await?;
    serve(listener.clone(), "l");
    let addr = listener.local_addrs().await[0];

    listener.add_prefix("http://127.0.0.1:0/b/").await?;
    assert!(get(addr, "/b/").await.ends_with("l /b/"));

    assert!(listener.remove_prefix("http://127.0.0.1:0/b/").await?);
    assert!(!listener.remove_prefix("http://127.0.0.1:0/b/").await?);
    assert!(get(addr, "/b/").await.starts_with("HTTP/1.1 404"));
    assert_eq!(listener.prefixes().await.len(), 1);
    Ok(())
}

#[async_std::test]
async fn stopping_releases_the_endpoint() -> async_h1ws::Result<()> {
    let server = HttpServer::new(ServerOptions::default());
    let listener = started(&server, "http://127.0.0.1:0/").await?;
    let addr = listener.local_addrs().await[0];

    listener.stop().await;
    assert!(!listener.is_listening().await);
    assert!(listener.local_addrs().await.is_empty());
    assert!(TcpStream::connect(addr).await.is_err());

    // Stopped listeners can start again.
    listener.start().await?;
    assert!(listener.is_listening().await);
    Ok(())
}

#[async_std::test]
async fn closing_refuses_queued_requests() -> async_h1ws::Result<()> {
    let server = HttpServer::new(ServerOptions::default());
    let keep = started(&server, "http://127.0.0.1:0/keep/").await?;
    let idle = started(&server, "http://127.0.0.1:0/idle/").await?;
    let addr = keep.local_addrs().await[0];

    let pending = task::spawn(get(addr, "/idle/request"));
    task::sleep(Duration::from_millis(200)).await;
    idle.close().await;

    let response = pending.await;
    assert!(
        response.starts_with("HTTP/1.1 503 Service Unavailable\r\n"),
        "{}",
        response
    );
    assert!(idle.start().await.is_err());
    Ok(())
}

#[async_std::test]
async fn websocket_through_the_listener() -> async_h1ws::Result<()> {
    let server = HttpServer::new(ServerOptions::default());
    let listener = started(&server, "http://127.0.0.1:0/ws/").await?;
    serve(listener.clone(), "ws");
    let addr = listener.local_addrs().await[0];

    let options = Options {
        compression: true,
        protocols: vec!["chat".into()],
        ..Options::default()
    };
    let url = format!("ws://127.0.0.1:{}/ws/", addr.port());
    let ws = websocket::connect(&url, options).await?;
    assert_eq!(ws.protocol(), Some("chat"));
    assert!(ws.is_compressed());

    let text = "hello ".repeat(1000);
    ws.send_text(text.clone()).await?;
    assert_eq!(ws.recv().await, Some(Message::Text(text)));
    ws.send_text("again").await?;
    assert_eq!(ws.recv().await, Some(Message::Text("again".into())));

    let status = ws.close(CloseCode::Normal, "done").await?;
    assert!(status.was_clean);
    Ok(())
}

#[async_std::test]
async fn websocket_handshake_refused() {
    let server = HttpServer::new(ServerOptions::default());
    let listener = started(&server, "http://127.0.0.1:0/ws/").await.unwrap();
    serve(listener.clone(), "ws");
    let addr = listener.local_addrs().await[0];

    let url = format!("ws://127.0.0.1:{}/missing/", addr.port());
    let err = websocket::connect(&url, Options::default()).await.unwrap_err();
    assert!(matches!(err, Error::Handshake(_)), "{:?}", err);
}
