
use std::time::Duration;

use async_h1ws::websocket::{
    close_payload, parse_close, read_from, CloseCode, Frame, Message, Opcode, Options,
    ReadRules, Role, State, WebSocket,
};
use async_h1ws::Error;
use async_std::future::timeout;
use futures_lite::io::AsyncWriteExt;
use pretty_assertions::assert_eq;

use test_utils::TestIO;

const WAIT: Duration = Duration::from_secs(5);

fn pair(options: Options) -> (WebSocket, WebSocket) {
    let (client, server) = TestIO::new();
    (
        WebSocket::from_stream(client, Role::Client, options.clone()),
        WebSocket::from_stream(server, Role::Server, options),
    )
}

/// A server session and the raw client end of its stream.
fn raw_client(options: Options) -> (TestIO, WebSocket) {
    let (client, server) = TestIO::new();
    (client, WebSocket::from_stream(server, Role::Server, options))
}

fn masked(opcode: Opcode, fin: bool, payload: &[u8]) -> Vec<u8> {
    let mut frame = Frame::new(opcode, payload);
    frame.fin = fin;
    frame.mask = Some([0x37, 0xfa, 0x21, 0x3d]);
    frame.to_bytes()
}

async fn next_frame(raw: &mut TestIO) -> Frame {
    let rules = ReadRules {
        role: Role::Client,
        compression: false,
        max_payload: 1 << 20,
    };
    timeout(WAIT, read_from(raw, rules)).await.unwrap().unwrap()
}

#[async_std::test]
async fn messages_both_ways() -> async_h1ws::Result<()> {
    let (client, server) = pair(Options::default());
    assert_eq!(client.state(), State::Open);

    client.send_text("hello").await?;
    assert_eq!(server.recv().await, Some(Message::Text("hello".into())));

    server.send_binary(vec![1, 2, 3]).await?;
    assert_eq!(client.recv().await, Some(Message::Binary(vec![1, 2, 3])));

    let long = "x".repeat(5000);
    client.send_text(long.clone()).await?;
    assert_eq!(server.recv().await, Some(Message::Text(long)));

    client.send_binary(Vec::new()).await?;
    assert_eq!(server.recv().await, Some(Message::Binary(Vec::new())));
    Ok(())
}

#[async_std::test]
async fn close_handshake() -> async_h1ws::Result<()> {
    let (client, server) = pair(Options::default());

    let status = timeout(WAIT, client.close(CloseCode::Normal, "bye"))
        .await
        .unwrap()?;
    assert_eq!(status.code, CloseCode::Normal);
    assert!(status.was_clean);
    assert_eq!(client.state(), State::Closed);

    let status = timeout(WAIT, server.closed()).await.unwrap();
    assert_eq!(status.code, CloseCode::Normal);
    assert_eq!(status.reason, "bye");
    assert!(status.was_clean);
    assert_eq!(server.recv().await, None);

    // A second close is a no-op, sending is not.
    client.begin_close(CloseCode::Normal, "")?;
    assert!(matches!(
        client.send_text("late").await,
        Err(Error::InvalidState(_))
    ));
    Ok(())
}

#[async_std::test]
async fn close_arguments_are_checked() {
    let (client, server) = pair(Options::default());
    assert!(client.begin_close(CloseCode::Abnormal, "").is_err());
    assert!(client.begin_close(CloseCode::ServerError, "").is_err());
    assert!(server.begin_close(CloseCode::MandatoryExtension, "").is_err());
    assert!(client
        .begin_close(CloseCode::Normal, &"r".repeat(200))
        .is_err());
    assert_eq!(client.state(), State::Open);
}

#[async_std::test]
async fn ping_pong() -> async_h1ws::Result<()> {
    let server_options = Options {
        emit_on_ping: true,
        ..Options::default()
    };
    let (client_io, server_io) = TestIO::new();
    let client = WebSocket::from_stream(client_io, Role::Client, Options::default());
    let server = WebSocket::from_stream(server_io, Role::Server, server_options);

    assert!(client.ping(b"hi".to_vec()).await?);
    assert_eq!(server.recv().await, Some(Message::Ping(b"hi".to_vec())));

    assert!(matches!(
        client.ping(vec![0; 126]).await,
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

#[async_std::test]
async fn pings_time_out_without_pong() -> async_h1ws::Result<()> {
    let options = Options {
        ping_timeout: Duration::from_millis(50),
        ..Options::default()
    };
    let (_raw, server) = raw_client(options);
    assert!(!server.ping(Vec::new()).await?);
    Ok(())
}

#[async_std::test]
async fn dropping_the_handle_goes_away() {
    let (client, server) = pair(Options::default());
    drop(client);
    let status = timeout(WAIT, server.closed()).await.unwrap();
    assert_eq!(status.code, CloseCode::Away);
}

#[async_std::test]
async fn reassembles_fragments() {
    let (mut raw, server) = raw_client(Options::default());
    raw.write_all(&masked(Opcode::Text, false, b"Hel")).await.unwrap();
    raw.write_all(&masked(Opcode::Ping, true, b"mid")).await.unwrap();
    raw.write_all(&masked(Opcode::Continuation, true, b"lo")).await.unwrap();

    // The ping is answered between the fragments.
    let pong = next_frame(&mut raw).await;
    assert_eq!(pong.opcode, Opcode::Pong);
    assert_eq!(pong.payload, b"mid");
    assert_eq!(pong.mask, None);

    assert_eq!(server.recv().await, Some(Message::Text("Hello".into())));
}

#[async_std::test]
async fn server_rejects_unmasked_frames() {
    let (mut raw, server) = raw_client(Options::default());
    raw.write_all(&Frame::new(Opcode::Text, "hi").to_bytes())
        .await
        .unwrap();

    let close = next_frame(&mut raw).await;
    assert_eq!(close.opcode, Opcode::Close);
    assert_eq!(parse_close(&close.payload).unwrap().0, CloseCode::ProtocolError);

    let status = timeout(WAIT, server.closed()).await.unwrap();
    assert_eq!(status.code, CloseCode::ProtocolError);
    assert!(!status.was_clean);
}

#[async_std::test]
async fn invalid_utf8_fails_the_session() {
    let (mut raw, server) = raw_client(Options::default());
    raw.write_all(&masked(Opcode::Text, true, &[0xff, 0xfe]))
        .await
        .unwrap();

    let close = next_frame(&mut raw).await;
    assert_eq!(parse_close(&close.payload).unwrap().0, CloseCode::InvalidData);
    let status = timeout(WAIT, server.closed()).await.unwrap();
    assert_eq!(status.code, CloseCode::InvalidData);
}

#[async_std::test]
async fn continuation_without_start_is_a_protocol_error() {
    let (mut raw, server) = raw_client(Options::default());
    raw.write_all(&masked(Opcode::Continuation, true, b"x"))
        .await
        .unwrap();
    let close = next_frame(&mut raw).await;
    assert_eq!(parse_close(&close.payload).unwrap().0, CloseCode::ProtocolError);
    assert_eq!(timeout(WAIT, server.closed()).await.unwrap().code, CloseCode::ProtocolError);
}

#[async_std::test]
async fn oversized_messages() {
    let options = Options {
        max_message_size: 8,
        ..Options::default()
    };
    let (mut raw, server) = raw_client(options);
    raw.write_all(&masked(Opcode::Binary, false, b"12345"))
        .await
        .unwrap();
    raw.write_all(&masked(Opcode::Continuation, true, b"67890"))
        .await
        .unwrap();
    let close = next_frame(&mut raw).await;
    assert_eq!(parse_close(&close.payload).unwrap().0, CloseCode::TooBig);
    assert_eq!(timeout(WAIT, server.closed()).await.unwrap().code, CloseCode::TooBig);
}

#[async_std::test]
async fn peer_initiated_close_is_echoed() {
    let (mut raw, server) = raw_client(Options::default());
    raw.write_all(&masked(
        Opcode::Close,
        true,
        &close_payload(CloseCode::Other(4000), "done"),
    ))
    .await
    .unwrap();

    let echo = next_frame(&mut raw).await;
    assert_eq!(echo.opcode, Opcode::Close);
    assert_eq!(parse_close(&echo.payload).unwrap().0, CloseCode::Other(4000));

    let status = timeout(WAIT, server.closed()).await.unwrap();
    assert_eq!(status.code, CloseCode::Other(4000));
    assert_eq!(status.reason, "done");
    assert!(status.was_clean);
}

#[async_std::test]
async fn vanished_peer_is_abnormal() {
    let (mut raw, server) = raw_client(Options::default());
    raw.close();
    let status = timeout(WAIT, server.closed()).await.unwrap();
    assert_eq!(status.code, CloseCode::Abnormal);
    assert!(!status.was_clean);
}

#[async_std::test]
async fn unanswered_close_times_out() {
    let options = Options {
        close_timeout: Duration::from_millis(50),
        ..Options::default()
    };
    let (mut raw, server) = raw_client(options);
    let status = timeout(WAIT, server.close(CloseCode::Normal, "bye"))
        .await
        .unwrap()
        .unwrap();
    assert!(!status.was_clean);
    assert_eq!(next_frame(&mut raw).await.opcode, Opcode::Close);
}

#[async_std::test]
async fn closing_twice_sends_one_close_frame() -> async_h1ws::Result<()> {
    let (mut raw, server) = raw_client(Options::default());
    server.begin_close(CloseCode::Normal, "first")?;
    assert_eq!(server.state(), State::Closing);
    server.begin_close(CloseCode::Away, "second")?;
    assert_eq!(server.state(), State::Closing);

    let close = next_frame(&mut raw).await;
    assert_eq!(close.opcode, Opcode::Close);
    assert_eq!(
        parse_close(&close.payload)?,
        (CloseCode::Normal, "first".to_string())
    );

    raw.write_all(&masked(
        Opcode::Close,
        true,
        &close_payload(CloseCode::Normal, ""),
    ))
    .await?;
    let status = timeout(WAIT, server.closed()).await.unwrap();
    assert_eq!(status.code, CloseCode::Normal);
    assert!(status.was_clean);

    // The stream ends right after the single close frame.
    let rules = ReadRules {
        role: Role::Client,
        compression: false,
        max_payload: 1 << 20,
    };
    assert!(timeout(WAIT, read_from(&mut raw, rules)).await.unwrap().is_err());
    Ok(())
}

#[async_std::test]
async fn reserved_codes_never_reach_the_wire() -> async_h1ws::Result<()> {
    let (mut raw, server) = raw_client(Options::default());
    for code in [
        CloseCode::NoStatus,
        CloseCode::Abnormal,
        CloseCode::TlsHandshakeFailure,
    ] {
        assert!(matches!(
            server.begin_close(code, ""),
            Err(Error::InvalidArgument(_))
        ));
    }
    assert_eq!(server.state(), State::Open);

    server.send_text("still open").await?;
    let frame = next_frame(&mut raw).await;
    assert_eq!(frame.opcode, Opcode::Text);
    assert_eq!(frame.payload, b"still open");
    Ok(())
}
