use async_h1ws::listener::HttpServer;
use async_h1ws::server::ServerOptions;
use async_h1ws::websocket::{Message, Options};
use async_std::task;

fn main() -> async_h1ws::Result<()> {
    task::block_on(async {
        let server = HttpServer::new(ServerOptions::default());
        let listener = server.listener();
        listener.add_prefix("http://127.0.0.1:8080/").await?;
        listener.start().await?;
        println!("listening on {:?}", listener.local_addrs().await);

        loop {
            let mut ctx = listener.get_context().await?;
            if !ctx.request().is_websocket_request() {
                ctx.response_mut()
                    .set_body("connect with a websocket client to get an echo");
                continue;
            }

            let options = Options {
                compression: true,
                ..Options::default()
            };
            let ws = match ctx.accept_websocket(options).await {
                Ok(ws) => ws,
                Err(err) => {
                    println!("handshake failed: {}", err);
                    continue;
                }
            };
            task::spawn(async move {
                while let Some(message) = ws.recv().await {
                    let sent = match message {
                        Message::Text(text) => ws.send_text(text).await,
                        Message::Binary(data) => ws.send_binary(data).await,
                        Message::Ping(_) => Ok(()),
                    };
                    if sent.is_err() {
                        break;
                    }
                }
                println!("session ended: {:?}", ws.closed().await);
            });
        }
    })
}
