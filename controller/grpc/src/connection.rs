//! Accepted delivery connections.
//!
//! Every connection is given a randomized maximum age. When it elapses, or
//! when the process begins shutting down, the connection's reads and writes
//! fail so that it is closed without waiting for open streams to finish.

use crate::tls::ServerCredentials;
use futures::prelude::*;
use rand::Rng;
use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time,
};
use tonic::transport::server::{Connected, TcpConnectInfo};

/// Added to every connection's maximum age.
pub const MAX_AGE_GRACE: Duration = Duration::from_secs(2 * 60);

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// A plaintext or TLS server connection.
pub enum ServerIo {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::server::TlsStream<TcpStream>>),
}

/// Fails reads and writes once a deadline passes or a close signal fires.
pub struct Expiring<IO> {
    io: IO,
    deadline: Pin<Box<time::Sleep>>,
    closed: Pin<Box<dyn Future<Output = ()> + Send>>,
    state: State,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    Open,
    Expired,
    Closed,
}

/// Chooses a connection's maximum age uniformly from 10, 11, or 12 hours,
/// plus a grace period.
pub fn max_age() -> Duration {
    let hours = rand::thread_rng().gen_range(10..=12);
    Duration::from_secs(hours * 60 * 60) + MAX_AGE_GRACE
}

/// Accepts connections until shutdown, handing each one to `tx` once its
/// handshake completes.
///
/// TLS material is loaded for every connection. A connection whose material
/// or handshake fails is dropped.
pub async fn accept(
    listener: TcpListener,
    credentials: Option<ServerCredentials>,
    tx: mpsc::Sender<Expiring<ServerIo>>,
    drain: drain::Watch,
) {
    tokio::pin! {
        let shutdown = drain.clone().signaled();
    }
    loop {
        let (tcp, client_addr) = tokio::select! {
            res = listener.accept() => match res {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!(%error, "Failed to accept connection");
                    continue;
                }
            },
            _ = &mut shutdown => return,
        };
        if let Err(error) = tcp.set_nodelay(true) {
            tracing::debug!(%error, client.addr = %client_addr, "Failed to set TCP_NODELAY");
        }

        let credentials = credentials.clone();
        let tx = tx.clone();
        let drain = drain.clone();
        tokio::spawn(async move {
            let io = match credentials {
                None => ServerIo::Plain(tcp),
                Some(credentials) => match handshake(tcp, &credentials).await {
                    Ok(tls) => ServerIo::Tls(Box::new(tls)),
                    Err(error) => {
                        tracing::info!(%error, client.addr = %client_addr, "TLS handshake failed");
                        return;
                    }
                },
            };
            let closed = drain.signaled().map(|_release| ());
            let io = Expiring::new(io, max_age(), closed);
            // The receiver is only dropped when the server stops.
            let _ = tx.send(io).await;
        });
    }
}

async fn handshake(
    tcp: TcpStream,
    credentials: &ServerCredentials,
) -> io::Result<tokio_rustls::server::TlsStream<TcpStream>> {
    let config = credentials
        .load()
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidData, error))?;
    let acceptor = tokio_rustls::TlsAcceptor::from(config);
    time::timeout(HANDSHAKE_TIMEOUT, acceptor.accept(tcp))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"))?
}

// === impl ServerIo ===

impl ServerIo {
    fn tcp(&self) -> &TcpStream {
        match self {
            Self::Plain(tcp) => tcp,
            Self::Tls(tls) => tls.get_ref().0,
        }
    }
}

impl Connected for ServerIo {
    type ConnectInfo = TcpConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        let tcp = self.tcp();
        TcpConnectInfo {
            local_addr: tcp.local_addr().ok(),
            remote_addr: tcp.peer_addr().ok(),
        }
    }
}

impl AsyncRead for ServerIo {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(io) => Pin::new(io).poll_read(cx, buf),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ServerIo {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(io) => Pin::new(io).poll_write(cx, buf),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(io) => Pin::new(io).poll_flush(cx),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(io) => Pin::new(io).poll_shutdown(cx),
            Self::Tls(io) => Pin::new(io.as_mut()).poll_shutdown(cx),
        }
    }
}

// === impl Expiring ===

impl<IO> Expiring<IO> {
    pub fn new(
        io: IO,
        max_age: Duration,
        closed: impl Future<Output = ()> + Send + 'static,
    ) -> Self {
        Self {
            io,
            deadline: Box::pin(time::sleep(max_age)),
            closed: Box::pin(closed),
            state: State::Open,
        }
    }

    fn poll_open(&mut self, cx: &mut Context<'_>) -> io::Result<()> {
        if self.state == State::Open {
            if self.deadline.as_mut().poll(cx).is_ready() {
                self.state = State::Expired;
            } else if self.closed.as_mut().poll(cx).is_ready() {
                self.state = State::Closed;
            }
        }
        match self.state {
            State::Open => Ok(()),
            State::Expired => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "connection exceeded its maximum age",
            )),
            State::Closed => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "server is shutting down",
            )),
        }
    }
}

impl<IO: Connected> Connected for Expiring<IO> {
    type ConnectInfo = IO::ConnectInfo;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.io.connect_info()
    }
}

impl<IO: AsyncRead + Unpin> AsyncRead for Expiring<IO> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_open(cx)?;
        Pin::new(&mut this.io).poll_read(cx, buf)
    }
}

impl<IO: AsyncWrite + Unpin> AsyncWrite for Expiring<IO> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        this.poll_open(cx)?;
        Pin::new(&mut this.io).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.poll_open(cx)?;
        Pin::new(&mut this.io).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().io).poll_shutdown(cx)
    }
}
