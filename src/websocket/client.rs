//! Client side of the opening handshake.

use async_std::net::TcpStream;
use futures_lite::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use http_types::{StatusCode, Url};
use log::debug;

use crate::websocket::handshake::{client_request, generate_key, validate_response};
use crate::websocket::{Options, Role, WebSocket};
use crate::{client, Error, Result};

/// Redirects followed before giving up.
const MAX_REDIRECTS: usize = 10;

enum Outcome {
    Open(WebSocket),
    Redirect(Url),
}

/// Connect to a `ws://` URL and run the handshake.
///
/// `wss://` needs a TLS stream; wrap one yourself and use [`connect_stream`].
pub async fn connect(url: &str, options: Options) -> Result<WebSocket> {
    let mut url = parse_url(url)?;
    let mut seen = Vec::new();
    loop {
        if url.scheme() == "wss" {
            return Err(Error::InvalidArgument(
                "wss requires a TLS stream, use websocket::connect_stream".into(),
            ));
        }
        let host = url
            .host_str()
            .ok_or_else(|| Error::InvalidArgument(format!("{} has no host", url)))?;
        let port = url.port_or_known_default().unwrap_or(80);
        let stream = TcpStream::connect((host, port)).await?;
        debug!("connected to {}:{}", host, port);

        match run(stream, &url, &options).await? {
            Outcome::Open(ws) => return Ok(ws),
            Outcome::Redirect(next) => {
                seen.push(url);
                if seen.len() > MAX_REDIRECTS || seen.contains(&next) {
                    return Err(Error::Handshake(format!(
                        "redirect loop at {}",
                        next
                    )));
                }
                debug!("handshake redirected to {}", next);
                url = next;
            }
        }
    }
}

/// Run the client handshake over an already connected stream.
///
/// Redirects are reported as errors since the stream cannot follow them.
pub async fn connect_stream<IO>(io: IO, url: &str, options: Options) -> Result<WebSocket>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    let url = parse_url(url)?;
    let options = Options {
        enable_redirection: false,
        ..options
    };
    match run(io, &url, &options).await? {
        Outcome::Open(ws) => Ok(ws),
        Outcome::Redirect(next) => Err(Error::Handshake(format!("redirected to {}", next))),
    }
}

async fn run<IO>(mut io: IO, url: &Url, options: &Options) -> Result<Outcome>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    let key = generate_key();
    let request = client_request(url, &key, options)?;
    io.write_all(&request).await?;
    io.flush().await?;

    let mut buffered = BufReader::new(io.clone());
    let res = client::decode(&mut buffered).await?;

    if options.enable_redirection && is_redirect(res.status()) {
        if let Some(location) = res.header("Location").map(|values| values.as_str()) {
            let next = url
                .join(location)
                .map_err(|_| Error::Handshake(format!("invalid redirect to {}", location)))?;
            // Best effort: the connection is abandoned either way.
            io.close().await.ok();
            return Ok(Outcome::Redirect(to_ws_url(next)?));
        }
    }

    let negotiated = validate_response(&res, &key, options)?;
    let reader = async_dup::Arc::new(async_dup::Mutex::new(buffered));
    Ok(Outcome::Open(WebSocket::start(
        io,
        reader,
        Role::Client,
        negotiated,
        options.clone(),
    )))
}

fn is_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MovedPermanently
            | StatusCode::Found
            | StatusCode::SeeOther
            | StatusCode::TemporaryRedirect
            | StatusCode::PermanentRedirect
    )
}

fn parse_url(url: &str) -> Result<Url> {
    let url = Url::parse(url).map_err(|err| Error::InvalidArgument(format!("{}: {}", url, err)))?;
    to_ws_url(url)
}

/// Accept `ws`, `wss` and their `http` spellings.
fn to_ws_url(mut url: Url) -> Result<Url> {
    let scheme = match url.scheme() {
        "ws" | "http" => "ws",
        "wss" | "https" => "wss",
        other => {
            return Err(Error::InvalidArgument(format!(
                "unsupported scheme {}",
                other
            )))
        }
    };
    if url.scheme() != scheme {
        // Both are special schemes, so the switch cannot fail.
        url.set_scheme(scheme).ok();
    }
    Ok(url)
}
