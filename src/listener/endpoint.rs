//! One bound socket address, its accept loop and its prefix table.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_channel::{Receiver, Sender};
use async_std::net::{TcpListener, TcpStream};
use async_std::task::{self, JoinHandle};
use futures_lite::future::{self, Boxed};
use http_types::StatusCode;
use log::{debug, error, trace, warn};

use crate::listener::router::PrefixRouter;
use crate::listener::{ClientFilter, HttpContext, ListenerPrefix, Owner};
use crate::server::{enqueue, Completion, Connection, Dispatch, Peer, ServerOptions, Upgrade};
use crate::{Error, Request, Response, Result};

type Connections = async_dup::Arc<async_dup::Mutex<HashMap<usize, TcpStream>>>;

/// Accepts connections on one address and routes their requests.
#[derive(Debug)]
pub(crate) struct EndpointListener {
    local_addr: SocketAddr,
    secure: bool,
    router: Arc<PrefixRouter<Owner>>,
    connections: Connections,
    stop: Sender<()>,
    task: Option<JoinHandle<()>>,
}

impl EndpointListener {
    /// Bind `addr` and start accepting.
    pub(crate) async fn bind(
        addr: SocketAddr,
        secure: bool,
        opts: Arc<ServerOptions>,
        filter: Arc<dyn ClientFilter>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        debug!("listening on {}", local_addr);

        let router = Arc::new(PrefixRouter::new());
        let connections: Connections = async_dup::Arc::new(async_dup::Mutex::new(HashMap::new()));
        let (stop, stopped) = async_channel::bounded(1);

        let dispatch = Arc::new(RouteDispatch {
            router: router.clone(),
            filter,
        });
        let task = task::spawn(accept_loop(
            listener,
            stopped,
            secure,
            opts,
            dispatch,
            connections.clone(),
        ));

        Ok(Self {
            local_addr,
            secure,
            router,
            connections,
            stop,
            task: Some(task),
        })
    }

    /// The address actually bound, with the real port for `:0`.
    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn register(&self, prefix: &ListenerPrefix, owner: Owner) -> Result<()> {
        if prefix.is_secure() != self.secure {
            return Err(Error::PrefixConflict(format!(
                "{} mixes http and https on {}",
                prefix, self.local_addr
            )));
        }
        self.router.register(prefix, owner)
    }

    pub(crate) fn unregister(&self, prefix: &ListenerPrefix, owner: &Owner) -> bool {
        self.router.unregister(prefix, owner)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.router.is_empty()
    }

    /// Stop accepting and shut every connection still reading requests.
    pub(crate) async fn close(mut self) {
        self.stop.close();
        if let Some(task) = self.task.take() {
            task.await;
        }
        let connections = std::mem::take(&mut *self.connections.lock());
        for (_, stream) in connections {
            stream.shutdown(Shutdown::Both).ok();
        }
        debug!("stopped listening on {}", self.local_addr);
    }
}

async fn accept_loop(
    listener: TcpListener,
    stopped: Receiver<()>,
    secure: bool,
    opts: Arc<ServerOptions>,
    dispatch: Arc<RouteDispatch>,
    connections: Connections,
) {
    let ids = AtomicUsize::new(0);
    loop {
        let accepted = future::or(async { Some(listener.accept().await) }, async {
            stopped.recv().await.ok();
            None
        })
        .await;

        let (stream, remote_addr) = match accepted {
            None => break,
            Some(Ok(accepted)) => accepted,
            Some(Err(err)) => {
                error!("accept failed on {:?}: {}", listener.local_addr().ok(), err);
                continue;
            }
        };
        trace!("accepted connection from {}", remote_addr);

        let id = ids.fetch_add(1, Ordering::Relaxed);
        connections.lock().insert(id, stream.clone());

        let peer = Peer {
            local_addr: stream.local_addr().ok(),
            remote_addr: Some(remote_addr),
            secure,
        };
        let opts = opts.clone();
        let dispatch = dispatch.clone();
        let connections = connections.clone();
        task::spawn(async move {
            let connection = Connection::new(stream, opts, peer);
            match connection.run(&*dispatch).await {
                Ok(status) => debug!("connection from {} ended: {:?}", remote_addr, status),
                Err(err) => debug!("connection from {} failed: {}", remote_addr, err),
            }
            connections.lock().remove(&id);
        });
    }
}

/// Filters clients and hands requests to the listener owning the best prefix.
#[derive(Debug)]
struct RouteDispatch {
    router: Arc<PrefixRouter<Owner>>,
    filter: Arc<dyn ClientFilter>,
}

impl Dispatch<TcpStream> for RouteDispatch {
    fn dispatch(&self, request: Request, upgrade: Upgrade<TcpStream>) -> Boxed<Completion> {
        if let Some(remote) = request.remote_addr() {
            if let Err(rejected) = self.filter.check_client(remote.ip()) {
                warn!("{}", rejected);
                let res = Response::error(StatusCode::Forbidden, "Forbidden");
                return Box::pin(future::ready(Completion::Respond(res)));
            }
        }

        let host = request
            .header("Host")
            .map(|values| values.as_str().to_string())
            .or_else(|| request.url().host_str().map(str::to_string))
            .unwrap_or_default();
        match self.router.resolve(&host, request.url().path()) {
            None => {
                debug!("no prefix matches {}{}", host, request.url().path());
                let mut res = Response::new(StatusCode::NotFound);
                res.set_body("Not Found");
                Box::pin(future::ready(Completion::Respond(res)))
            }
            Some((owner, prefix)) => {
                let (ctx, completion) = HttpContext::new(request, Some(prefix), Some(upgrade));
                Box::pin(async move { enqueue(&owner.queue, ctx, completion).await })
            }
        }
    }
}
