use async_h1ws::websocket::{self, CloseCode, Message, Options};
use async_std::task;

fn main() -> async_h1ws::Result<()> {
    task::block_on(async {
        let ws = websocket::connect("ws://127.0.0.1:8080/", Options::default()).await?;
        ws.send_text("hello chashu").await?;
        if let Some(Message::Text(text)) = ws.recv().await {
            println!("echoed: {}", text);
        }
        let status = ws.close(CloseCode::Normal, "done").await?;
        println!("closed: {:?}", status);
        Ok(())
    })
}
