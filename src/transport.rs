//! Transport connection: TCP or unix domain socket.

use crate::config::CtrlAddress;
use crate::error::{Result, TorCtrlError};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
#[cfg(unix)]
use tokio::net::UnixStream;
use tracing::debug;

/// A connected control transport.
pub enum CtrlStream {
    /// A TCP connection to a ControlPort.
    Tcp(TcpStream),
    /// A connection to a ControlSocket.
    #[cfg(unix)]
    Unix(UnixStream),
}

/// Establish a transport to the control listener, bounded by `timeout`.
pub async fn connect(address: &CtrlAddress, timeout: Duration) -> Result<CtrlStream> {
    debug!("connecting to control listener at {address}");

    let connect = async {
        match address {
            CtrlAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                Ok(CtrlStream::Tcp(stream))
            }
            #[cfg(unix)]
            CtrlAddress::Unix(path) => {
                let stream = UnixStream::connect(path).await?;
                Ok(CtrlStream::Unix(stream))
            }
            #[cfg(not(unix))]
            CtrlAddress::Unix(_) => Err(TorCtrlError::ConfigurationError(
                "unix socket addresses are not supported on this platform".to_string(),
            )),
        }
    };

    match tokio::time::timeout(timeout, connect).await {
        Ok(result) => result,
        Err(_) => Err(TorCtrlError::ConnectionFailed(format!(
            "timed out connecting to {address} after {timeout:?}"
        ))),
    }
}

impl AsyncRead for CtrlStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            CtrlStream::Tcp(s) => Pin::new(s).poll_read(cx, buf),
            #[cfg(unix)]
            CtrlStream::Unix(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for CtrlStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.get_mut() {
            CtrlStream::Tcp(s) => Pin::new(s).poll_write(cx, buf),
            #[cfg(unix)]
            CtrlStream::Unix(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            CtrlStream::Tcp(s) => Pin::new(s).poll_flush(cx),
            #[cfg(unix)]
            CtrlStream::Unix(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.get_mut() {
            CtrlStream::Tcp(s) => Pin::new(s).poll_shutdown(cx),
            #[cfg(unix)]
            CtrlStream::Unix(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn tcp_connect_and_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            sock.read_exact(&mut buf).await.unwrap();
            sock.write_all(&buf).await.unwrap();
        });

        let mut stream = connect(&CtrlAddress::Tcp(addr), Duration::from_secs(5))
            .await
            .unwrap();
        stream.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        stream.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[tokio::test]
    async fn connect_refused_is_connection_error() {
        // Bind then drop to get a port nothing listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&CtrlAddress::Tcp(addr), Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
