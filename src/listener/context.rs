use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use async_channel::{Receiver, Sender};
use async_std::net::TcpStream;
use futures_lite::io::{self, AsyncRead, AsyncWrite, AsyncWriteExt};
use log::{debug, trace};

use crate::listener::ListenerPrefix;
use crate::server::{Completion, EncodeOptions, Encoder, Upgrade};
use crate::websocket::{self, Options, Role, WebSocket};
use crate::headers;
use crate::{Error, Request, Response, Result};

/// One request, the response being built for it and a bag of values.
///
/// The response is written when the context is finished or dropped. Until
/// then the connection waits, so hold on to a context only as long as it
/// takes to answer it.
pub struct HttpContext<IO = TcpStream> {
    request: Request,
    response: Response,
    items: HashMap<String, Box<dyn Any + Send + Sync>>,
    prefix: Option<ListenerPrefix>,
    upgrade: Option<Upgrade<IO>>,
    completion: Option<Sender<Completion>>,
}

impl<IO> HttpContext<IO> {
    pub(crate) fn new(
        request: Request,
        prefix: Option<ListenerPrefix>,
        upgrade: Option<Upgrade<IO>>,
    ) -> (Self, Receiver<Completion>) {
        let (sender, receiver) = async_channel::bounded(1);
        let ctx = Self {
            request,
            response: Response::default(),
            items: HashMap::new(),
            prefix,
            upgrade,
            completion: Some(sender),
        };
        (ctx, receiver)
    }

    /// Forget the connection; dropping the context no longer answers it.
    pub(crate) fn disarm(&mut self) {
        self.completion = None;
        self.upgrade = None;
    }

    /// The request being answered.
    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Mutable access to the request, to read its body.
    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The response that will be written.
    pub fn response(&self) -> &Response {
        &self.response
    }

    /// Mutable access to the response.
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    /// Replace the response outright.
    pub fn set_response(&mut self, response: Response) {
        self.response = response;
    }

    /// The prefix the request was routed by.
    pub fn prefix(&self) -> Option<&ListenerPrefix> {
        self.prefix.as_ref()
    }

    /// Store a value under `key`, returning whatever was there.
    pub fn insert_item<T>(&mut self, key: impl Into<String>, value: T) -> Option<Box<dyn Any + Send + Sync>>
    where
        T: Any + Send + Sync,
    {
        self.items.insert(key.into(), Box::new(value))
    }

    /// The value under `key`, if it has type `T`.
    pub fn item<T: Any>(&self, key: &str) -> Option<&T> {
        self.items.get(key).and_then(|value| value.downcast_ref())
    }

    /// Remove the value under `key`.
    pub fn remove_item(&mut self, key: &str) -> Option<Box<dyn Any + Send + Sync>> {
        self.items.remove(key)
    }

    /// Write the response and release the connection.
    pub fn finish(self) {}
}

impl<IO> HttpContext<IO>
where
    IO: AsyncRead + AsyncWrite + Clone + Send + Sync + Unpin + 'static,
{
    /// Answer a WebSocket handshake and take over the connection.
    ///
    /// Headers already set on the response are sent with the `101`. If the
    /// request is not an acceptable handshake, a `400` is written instead.
    pub async fn accept_websocket(mut self, options: Options) -> Result<WebSocket> {
        let upgrade = self
            .upgrade
            .take()
            .ok_or_else(|| Error::invalid_state("connection cannot be upgraded"))?;

        let (mut res, negotiated) = match websocket::negotiate(&self.request, &options) {
            Ok(accepted) => accepted,
            Err(err) => {
                debug!("refusing websocket handshake: {}", err);
                self.response = Response::error(err.status(), &err.to_string());
                return Err(err);
            }
        };
        let extra = std::mem::replace(self.response.headers_mut(), headers::empty());
        headers::merge(res.headers_mut(), extra);

        let Upgrade {
            mut io,
            reader,
            server_header,
        } = upgrade;
        let completion = self.completion.take();

        let mut encoder = Encoder::new(
            res,
            EncodeOptions {
                head_request: false,
                keep_alive: true,
                server_header,
            },
        );
        let written = match io::copy(&mut encoder, &mut io).await {
            Ok(_) => io.flush().await,
            Err(err) => Err(err),
        };
        let outcome = match written {
            Ok(()) => Completion::Upgraded,
            Err(_) => Completion::Abandoned,
        };
        if let Some(completion) = completion {
            completion.try_send(outcome).ok();
        }
        written?;

        trace!("connection upgraded to websocket");
        Ok(WebSocket::start(io, reader, Role::Server, negotiated, options))
    }
}

impl<IO> Drop for HttpContext<IO> {
    fn drop(&mut self) {
        if let Some(completion) = self.completion.take() {
            let response = std::mem::take(&mut self.response);
            completion.try_send(Completion::Respond(response)).ok();
        }
    }
}

impl<IO> fmt::Debug for HttpContext<IO> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpContext")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("items", &self.items.keys().collect::<Vec<_>>())
            .field("prefix", &self.prefix)
            .field("upgradable", &self.upgrade.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_types::{StatusCode, Url};

    fn context() -> (HttpContext, Receiver<Completion>) {
        let url = Url::parse("http://localhost/").unwrap();
        HttpContext::new(Request::new("GET", url), None, None)
    }

    #[test]
    fn dropping_sends_the_response() {
        let (mut ctx, completion) = context();
        ctx.response_mut().set_status(StatusCode::Accepted);
        drop(ctx);
        match completion.try_recv() {
            Ok(Completion::Respond(res)) => assert_eq!(res.status(), StatusCode::Accepted),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn disarmed_contexts_send_nothing() {
        let (mut ctx, completion) = context();
        ctx.disarm();
        ctx.finish();
        assert!(completion.try_recv().is_err());
    }

    #[test]
    fn items_by_type() {
        let (mut ctx, _completion) = context();
        ctx.insert_item("user", 42u32);
        assert_eq!(ctx.item::<u32>("user"), Some(&42));
        assert_eq!(ctx.item::<String>("user"), None);
        assert!(ctx.remove_item("user").is_some());
        assert!(ctx.item::<u32>("user").is_none());
    }

    #[async_std::test]
    async fn upgrade_requires_a_connection() {
        let (ctx, _completion) = context();
        let err = ctx.accept_websocket(Options::default()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }
}
