//! Transport listener and per-connection loop
//!
//! Every accepted connection runs in its own task: read one packet,
//! dispatch it, write the answer, repeat. A decode failure closes the
//! connection since the stream position is lost.

use crate::auth::PeerCertificate;
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::protocol::PacketCodec;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// A bound socket the server accepts connections on.
pub enum Listener {
    Tls {
        listener: TcpListener,
        acceptor: TlsAcceptor,
    },
    Plain(TcpListener),
}

impl Listener {
    /// Bind a TLS listener.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) when the address cannot be bound.
    pub async fn tls(addr: &str, acceptor: TlsAcceptor) -> Result<Self> {
        Ok(Self::Tls {
            listener: TcpListener::bind(addr).await?,
            acceptor,
        })
    }

    /// Bind a plaintext listener. Development only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) when the address cannot be bound.
    pub async fn plain(addr: &str) -> Result<Self> {
        Ok(Self::Plain(TcpListener::bind(addr).await?))
    }

    /// # Errors
    ///
    /// Returns [`Error::Io`](crate::Error::Io) if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        let listener = match self {
            Self::Tls { listener, .. } | Self::Plain(listener) => listener,
        };
        Ok(listener.local_addr()?)
    }

    const fn scheme(&self) -> &'static str {
        match self {
            Self::Tls { .. } => "tls",
            Self::Plain(_) => "plain",
        }
    }
}

pub struct Server {
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    grace: Duration,
}

impl Server {
    #[must_use]
    pub fn new(dispatcher: Dispatcher, grace: Duration) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            grace,
        }
    }

    /// Cancelling this token stops the server.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Accept connections until the shutdown token is cancelled, then
    /// wait up to the grace period for open connections to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if a listener's address cannot be read.
    pub async fn run(self, listeners: Vec<Listener>) -> Result<()> {
        for listener in listeners {
            info!(
                addr = %listener.local_addr()?,
                scheme = listener.scheme(),
                domain = self.dispatcher.domain(),
                "listening"
            );
            self.tracker.spawn(accept_loop(
                listener,
                self.dispatcher.clone(),
                self.shutdown.clone(),
                self.tracker.clone(),
            ));
        }

        self.shutdown.cancelled().await;
        self.tracker.close();
        info!(open = self.tracker.len(), "shutting down");

        if tokio::time::timeout(self.grace, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                open = self.tracker.len(),
                "grace period elapsed with connections still open"
            );
        }
        Ok(())
    }
}

async fn accept_loop(
    listener: Listener,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    let (tcp, acceptor) = match listener {
        Listener::Tls { listener, acceptor } => (listener, Some(acceptor)),
        Listener::Plain(listener) => (listener, None),
    };

    loop {
        let accepted = tokio::select! {
            () = shutdown.cancelled() => break,
            accepted = tcp.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                warn!(error = %e, "accept failed");
                continue;
            }
        };
        debug!(%peer, "connection accepted");

        let dispatcher = dispatcher.clone();
        let shutdown = shutdown.clone();
        match acceptor.clone() {
            Some(acceptor) => {
                tracker.spawn(async move {
                    let handshake = tokio::select! {
                        () = shutdown.cancelled() => return,
                        handshake = acceptor.accept(stream) => handshake,
                    };
                    match handshake {
                        Ok(tls) => {
                            let certificate = PeerCertificate::from_connection(tls.get_ref().1);
                            if certificate.is_some() {
                                debug!(%peer, "client certificate presented");
                            }
                            handle_connection(tls, peer, certificate, &dispatcher, &shutdown).await;
                        }
                        Err(e) => debug!(%peer, error = %e, "TLS handshake failed"),
                    }
                });
            }
            None => {
                tracker.spawn(async move {
                    handle_connection(stream, peer, None, &dispatcher, &shutdown).await;
                });
            }
        }
    }
}

/// Serve one connection until EOF, a decode or write error, or shutdown.
///
/// `certificate` is the verified client certificate of a TLS peer. A request that is already being dispatched runs to completion before
/// shutdown is observed.
pub async fn handle_connection<S>(
    stream: S,
    peer: SocketAddr,
    certificate: Option<PeerCertificate>,
    dispatcher: &Dispatcher,
    shutdown: &CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, PacketCodec::new());

    loop {
        let next = tokio::select! {
            () = shutdown.cancelled() => break,
            next = framed.next() => next,
        };

        let packet = match next {
            Some(Ok(packet)) => packet,
            Some(Err(e)) => {
                warn!(%peer, error = %e, "closing connection after bad input");
                break;
            }
            None => break,
        };

        debug!(%peer, packet_type = %packet.kind, "packet received");
        let response = dispatcher.dispatch_from(packet, certificate.as_ref()).await;

        if let Err(e) = framed.send(response).await {
            warn!(%peer, error = %e, "failed to write response");
            break;
        }
    }

    debug!(%peer, "connection closed");
}
