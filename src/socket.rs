//! Raw TCP accept/dial primitives.
//!
//! Grounded on
//! `examples/sug0-bafomet/src/bft/communication/socket/async_std_tcp/mod.rs`,
//! re-expressed over `tokio::net` — the teacher's own default feature
//! set (`socket_tokio_tcp`) already names this backend; its source just
//! wasn't part of the retrieval pack.

use std::io;
use std::net::SocketAddr;

use tokio::net::{TcpListener, TcpStream};

pub struct Listener {
    inner: TcpListener,
}

pub type Socket = TcpStream;

pub async fn bind(addr: SocketAddr) -> io::Result<Listener> {
    let inner = TcpListener::bind(addr).await?;
    Ok(Listener { inner })
}

pub async fn connect(addr: SocketAddr) -> io::Result<Socket> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

impl Listener {
    pub async fn accept(&self) -> io::Result<(Socket, SocketAddr)> {
        let (inner, addr) = self.inner.accept().await?;
        inner.set_nodelay(true)?;
        Ok((inner, addr))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}
