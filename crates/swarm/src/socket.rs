//! Injected socket factory: production code dials peers and accepts
//! incoming connections through this trait so tests can drive a whole
//! swarm in-process, over channels, without touching a real network stack.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A duplex byte stream standing in for a peer connection: a real TCP
/// socket in production, an in-memory duplex pipe in tests.
pub trait PeerStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> PeerStream for T {}

#[async_trait]
pub trait SocketFactory: Send + Sync {
    async fn connect(&self, addr: SocketAddr) -> std::io::Result<Box<dyn PeerStream>>;

    /// Bind a listener and accept the next inbound connection. Scheduler
    /// loops call this repeatedly; a real listener is bound once and
    /// reused across calls via interior state in the implementation.
    async fn accept(&self) -> std::io::Result<(Box<dyn PeerStream>, SocketAddr)>;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

pub struct TcpSocketFactory {
    listener: tokio::net::TcpListener,
}

impl TcpSocketFactory {
    pub async fn bind(addr: SocketAddr) -> std::io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        Ok(Self { listener })
    }
}

#[async_trait]
impl SocketFactory for TcpSocketFactory {
    async fn connect(&self, addr: SocketAddr) -> std::io::Result<Box<dyn PeerStream>> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    async fn accept(&self) -> std::io::Result<(Box<dyn PeerStream>, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((Box::new(stream), addr))
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

/// In-memory socket factory for tests: `connect` is wired up by the test
/// harness to hand back one end of a [`tokio::io::duplex`] pipe, with the
/// other end available to feed/inspect directly.
pub mod fake {
    use super::*;
    use std::collections::VecDeque;
    use tokio::io::DuplexStream;
    use tokio::sync::Mutex;

    pub struct FakeSocketFactory {
        local: SocketAddr,
        /// Pre-seeded connections to hand back, in order, for each
        /// `connect()`/`accept()` call.
        outgoing: Mutex<VecDeque<std::io::Result<DuplexStream>>>,
        incoming: Mutex<VecDeque<(DuplexStream, SocketAddr)>>,
    }

    impl FakeSocketFactory {
        pub fn new(local: SocketAddr) -> Self {
            Self {
                local,
                outgoing: Mutex::new(VecDeque::new()),
                incoming: Mutex::new(VecDeque::new()),
            }
        }

        pub async fn push_outgoing(&self, stream: DuplexStream) {
            self.outgoing.lock().await.push_back(Ok(stream));
        }

        pub async fn push_incoming(&self, stream: DuplexStream, from: SocketAddr) {
            self.incoming.lock().await.push_back((stream, from));
        }
    }

    #[async_trait]
    impl SocketFactory for FakeSocketFactory {
        async fn connect(&self, _addr: SocketAddr) -> std::io::Result<Box<dyn PeerStream>> {
            let mut q = self.outgoing.lock().await;
            match q.pop_front() {
                Some(Ok(s)) => Ok(Box::new(s)),
                Some(Err(e)) => Err(e),
                None => Err(std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "no fake connection queued")),
            }
        }

        async fn accept(&self) -> std::io::Result<(Box<dyn PeerStream>, SocketAddr)> {
            loop {
                if let Some((s, addr)) = self.incoming.lock().await.pop_front() {
                    return Ok((Box::new(s), addr));
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        }

        fn local_addr(&self) -> std::io::Result<SocketAddr> {
            Ok(self.local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeSocketFactory;
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn fake_factory_delivers_queued_outgoing_connection() {
        let factory = FakeSocketFactory::new("127.0.0.1:1".parse().unwrap());
        let (a, mut b) = tokio::io::duplex(64);
        factory.push_outgoing(a).await;

        let mut stream = factory.connect("127.0.0.1:2".parse().unwrap()).await.unwrap();
        b.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn connect_with_nothing_queued_is_an_error() {
        let factory = FakeSocketFactory::new("127.0.0.1:1".parse().unwrap());
        assert!(factory.connect("127.0.0.1:2".parse().unwrap()).await.is_err());
    }
}
