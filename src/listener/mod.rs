//! Bind endpoints, route requests by prefix and queue them for the
//! application.
//!
//! An [`HttpServer`] owns one endpoint per bound address. Every
//! [`HttpListener`] it hands out registers prefixes on those endpoints and
//! receives the matching requests as [`HttpContext`]s.
//!
//! # Example
//!
//! ```no_run
//! use async_h1ws::listener::HttpServer;
//! use async_h1ws::server::ServerOptions;
//! use async_h1ws::websocket::Options;
//!
//! # fn main() -> async_h1ws::Result<()> {
//! async_std::task::block_on(async {
//!     let server = HttpServer::new(ServerOptions::default());
//!     let listener = server.listener();
//!     listener.add_prefix("http://+:8080/echo/").await?;
//!     listener.start().await?;
//!
//!     loop {
//!         let ctx = listener.get_context().await?;
//!         if ctx.request().is_websocket_request() {
//!             let ws = ctx.accept_websocket(Options::default()).await?;
//!             async_std::task::spawn(async move {
//!                 while let Some(message) = ws.recv().await {
//!                     println!("{:?}", message);
//!                 }
//!             });
//!         }
//!     }
//! })
//! # }
//! ```

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use async_std::sync::Mutex;
use http_types::StatusCode;
use log::{debug, info};

use crate::server::ServerOptions;
use crate::{Error, Response, Result};

mod context;
mod endpoint;
mod filter;
mod prefix;
mod router;

pub use context::HttpContext;
pub use filter::{AllowAll, BanList, ClientFilter, Rejected};
pub use prefix::{HostKind, ListenerPrefix};

use endpoint::EndpointListener;

/// A listener's identity in the prefix routers, and where its requests go.
#[derive(Debug, Clone)]
pub(crate) struct Owner {
    id: usize,
    pub(crate) queue: Sender<HttpContext>,
}

impl PartialEq for Owner {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

#[derive(Debug)]
struct ServerInner {
    options: Arc<ServerOptions>,
    filter: Arc<dyn ClientFilter>,
    endpoints: Mutex<HashMap<SocketAddr, EndpointListener>>,
    next_owner: AtomicUsize,
}

/// The registry of bound endpoints shared by a set of listeners.
///
/// Independent servers never share endpoints, so several can coexist in one
/// process as long as they bind different ports.
#[derive(Debug, Clone)]
pub struct HttpServer {
    inner: Arc<ServerInner>,
}

impl HttpServer {
    /// A server that serves every client.
    pub fn new(options: ServerOptions) -> Self {
        Self::with_filter(options, Arc::new(AllowAll))
    }

    /// A server that asks `filter` about every request's client address.
    pub fn with_filter(options: ServerOptions, filter: Arc<dyn ClientFilter>) -> Self {
        Self {
            inner: Arc::new(ServerInner {
                options: Arc::new(options),
                filter,
                endpoints: Mutex::new(HashMap::new()),
                next_owner: AtomicUsize::new(0),
            }),
        }
    }

    /// The client filter, for banning and unbanning addresses.
    pub fn filter(&self) -> &dyn ClientFilter {
        &*self.inner.filter
    }

    /// A new listener with no prefixes.
    pub fn listener(&self) -> HttpListener {
        let (queue, contexts) = async_channel::unbounded();
        let id = self.inner.next_owner.fetch_add(1, Ordering::Relaxed);
        HttpListener {
            server: self.clone(),
            owner: Owner { id, queue },
            contexts,
            state: Mutex::new(ListenerState::default()),
        }
    }

    /// Register `prefix` for `owner`, binding its endpoint if needed.
    async fn register(&self, prefix: &ListenerPrefix, owner: &Owner) -> Result<SocketAddr> {
        let addr = endpoint_addr(prefix);
        let mut endpoints = self.inner.endpoints.lock().await;
        if !endpoints.contains_key(&addr) {
            let endpoint = EndpointListener::bind(
                addr,
                prefix.is_secure(),
                self.inner.options.clone(),
                self.inner.filter.clone(),
            )
            .await?;
            endpoints.insert(addr, endpoint);
        }
        let endpoint = endpoints
            .get(&addr)
            .ok_or_else(|| Error::invalid_state("endpoint vanished"))?;
        let registered = endpoint.register(prefix, owner.clone());
        let local_addr = endpoint.local_addr();
        if registered.is_err() && endpoint.is_empty() {
            if let Some(endpoint) = endpoints.remove(&addr) {
                endpoint.close().await;
            }
        }
        registered.map(|_| local_addr)
    }

    /// Drop `prefix` for `owner`, tearing its endpoint down once empty.
    async fn unregister(&self, prefix: &ListenerPrefix, owner: &Owner) -> bool {
        let addr = endpoint_addr(prefix);
        let mut endpoints = self.inner.endpoints.lock().await;
        let (removed, empty) = match endpoints.get(&addr) {
            Some(endpoint) => (endpoint.unregister(prefix, owner), endpoint.is_empty()),
            None => return false,
        };
        if empty {
            if let Some(endpoint) = endpoints.remove(&addr) {
                endpoint.close().await;
            }
        }
        removed
    }

    async fn local_addr(&self, prefix: &ListenerPrefix) -> Option<SocketAddr> {
        let endpoints = self.inner.endpoints.lock().await;
        endpoints.get(&endpoint_addr(prefix)).map(EndpointListener::local_addr)
    }
}

/// The socket address a prefix binds.
///
/// Wildcards and host names bind every interface; requests are then told
/// apart by their `Host` header.
fn endpoint_addr(prefix: &ListenerPrefix) -> SocketAddr {
    let host = prefix.host();
    let ip = match host {
        "*" | "+" => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        "localhost" => IpAddr::V4(Ipv4Addr::LOCALHOST),
        _ => {
            let literal = host.trim_start_matches('[').trim_end_matches(']');
            literal
                .parse()
                .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
        }
    };
    SocketAddr::new(ip, prefix.port())
}

#[derive(Debug, Default)]
struct ListenerState {
    prefixes: Vec<ListenerPrefix>,
    listening: bool,
    closed: bool,
}

/// Receives the requests routed to its prefixes.
#[derive(Debug)]
pub struct HttpListener {
    server: HttpServer,
    owner: Owner,
    contexts: Receiver<HttpContext>,
    state: Mutex<ListenerState>,
}

impl HttpListener {
    /// Add a prefix, registering it right away if the listener is running.
    pub async fn add_prefix(&self, uri: &str) -> Result<()> {
        let prefix = ListenerPrefix::parse(uri)?;
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::invalid_state("listener is closed"));
        }
        if state.prefixes.contains(&prefix) {
            return Ok(());
        }
        if state.listening {
            self.server.register(&prefix, &self.owner).await?;
        }
        state.prefixes.push(prefix);
        Ok(())
    }

    /// Remove a prefix. Returns whether it was present.
    pub async fn remove_prefix(&self, uri: &str) -> Result<bool> {
        let prefix = ListenerPrefix::parse(uri)?;
        let mut state = self.state.lock().await;
        let before = state.prefixes.len();
        state.prefixes.retain(|p| p != &prefix);
        let removed = state.prefixes.len() != before;
        if removed && state.listening {
            self.server.unregister(&prefix, &self.owner).await;
        }
        Ok(removed)
    }

    /// The prefixes added so far.
    pub async fn prefixes(&self) -> Vec<ListenerPrefix> {
        self.state.lock().await.prefixes.clone()
    }

    /// Register every prefix and start receiving requests.
    ///
    /// Either all prefixes are registered or none are.
    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(Error::invalid_state("listener is closed"));
        }
        if state.listening {
            return Ok(());
        }
        for (i, prefix) in state.prefixes.iter().enumerate() {
            if let Err(err) = self.server.register(prefix, &self.owner).await {
                for registered in &state.prefixes[..i] {
                    self.server.unregister(registered, &self.owner).await;
                }
                return Err(err);
            }
        }
        state.listening = true;
        info!("listener started with {} prefixes", state.prefixes.len());
        Ok(())
    }

    /// Unregister every prefix. Queued contexts stay available.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        self.stop_locked(&mut state).await;
    }

    async fn stop_locked(&self, state: &mut ListenerState) {
        if !state.listening {
            return;
        }
        for prefix in &state.prefixes {
            self.server.unregister(prefix, &self.owner).await;
        }
        state.listening = false;
        debug!("listener stopped");
    }

    /// Stop and refuse every request still queued.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        self.owner.queue.close();
        while let Ok(mut ctx) = self.contexts.try_recv() {
            ctx.set_response(Response::error(
                StatusCode::ServiceUnavailable,
                "Service Unavailable",
            ));
        }
        self.stop_locked(&mut state).await;
        debug!("listener closed");
    }

    /// Whether prefixes are registered.
    pub async fn is_listening(&self) -> bool {
        self.state.lock().await.listening
    }

    /// Wait for the next request.
    pub async fn get_context(&self) -> Result<HttpContext> {
        self.contexts
            .recv()
            .await
            .map_err(|_| Error::invalid_state("listener is closed"))
    }

    /// The addresses bound for this listener's prefixes, with real ports.
    pub async fn local_addrs(&self) -> Vec<SocketAddr> {
        let state = self.state.lock().await;
        let mut addrs = Vec::new();
        if !state.listening {
            return addrs;
        }
        for prefix in &state.prefixes {
            if let Some(addr) = self.server.local_addr(prefix).await {
                if !addrs.contains(&addr) {
                    addrs.push(addr);
                }
            }
        }
        addrs
    }
}
