use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use auto_impl::auto_impl;

use crate::error::{Error, Result};

/// Byte stream a connection can run over besides TCP and Unix sockets
pub trait Socket: Read + Write + Send {
    fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()>;

    /// Whether the transport already protects the password (e.g. a local pipe)
    fn is_secure(&self) -> bool {
        false
    }
}

pub enum Stream {
    Tcp(TcpStream),
    #[cfg(feature = "sync-tls")]
    Tls(Box<native_tls::TlsStream<TcpStream>>),
    Unix(UnixStream),
    Custom(Box<dyn Socket>),
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Tcp(_) => "Tcp",
            #[cfg(feature = "sync-tls")]
            Self::Tls(_) => "Tls",
            Self::Unix(_) => "Unix",
            Self::Custom(_) => "Custom",
        };
        f.debug_tuple("Stream").field(&name).finish()
    }
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(stream)
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(stream)
    }

    pub fn custom(socket: impl Socket + 'static) -> Self {
        Self::Custom(Box::new(socket))
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> std::io::Result<()> {
        match self {
            Self::Tcp(s) => s.set_read_timeout(timeout),
            #[cfg(feature = "sync-tls")]
            Self::Tls(s) => s.get_ref().set_read_timeout(timeout),
            Self::Unix(s) => s.set_read_timeout(timeout),
            Self::Custom(s) => s.set_read_timeout(timeout),
        }
    }

    /// Unix sockets and TLS count as secure for plugins that send the password in clear
    pub fn is_secure(&self) -> bool {
        match self {
            Self::Tcp(_) => false,
            #[cfg(feature = "sync-tls")]
            Self::Tls(_) => true,
            Self::Unix(_) => true,
            Self::Custom(s) => s.is_secure(),
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(s) => s.read(buf),
            #[cfg(feature = "sync-tls")]
            Self::Tls(s) => s.read(buf),
            Self::Unix(s) => s.read(buf),
            Self::Custom(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            Self::Tcp(s) => s.write(buf),
            #[cfg(feature = "sync-tls")]
            Self::Tls(s) => s.write(buf),
            Self::Unix(s) => s.write(buf),
            Self::Custom(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            Self::Tcp(s) => s.flush(),
            #[cfg(feature = "sync-tls")]
            Self::Tls(s) => s.flush(),
            Self::Unix(s) => s.flush(),
            Self::Custom(s) => s.flush(),
        }
    }
}

/// Turns a plain stream into a secured one, once, between the SSL request and authentication
#[auto_impl(&, Box)]
pub trait TlsUpgrader {
    fn upgrade(&self, stream: Stream, host: &str) -> Result<Stream>;
}

/// Upgrader used when TLS is requested without `sync-tls`
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTls;

impl TlsUpgrader for NoTls {
    fn upgrade(&self, _stream: Stream, _host: &str) -> Result<Stream> {
        Err(Error::BadConfigError(
            "TLS requested but no TLS implementation is available (enable the `sync-tls` feature)"
                .to_string(),
        ))
    }
}

#[cfg(feature = "sync-tls")]
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeTls;

#[cfg(feature = "sync-tls")]
impl TlsUpgrader for NativeTls {
    fn upgrade(&self, stream: Stream, host: &str) -> Result<Stream> {
        let tcp = match stream {
            Stream::Tcp(tcp) => tcp,
            Stream::Tls(_) => {
                return Err(Error::BadUsageError("Already using TLS".to_string()));
            }
            Stream::Unix(_) | Stream::Custom(_) => {
                return Err(Error::BadConfigError(
                    "TLS is only supported over TCP".to_string(),
                ));
            }
        };
        let connector = native_tls::TlsConnector::new()
            .map_err(|e| Error::BadConfigError(format!("TLS connector: {e}")))?;
        let tls = connector
            .connect(host, tcp)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Stream::Tls(Box::new(tls)))
    }
}

/// Default upgrader for the enabled features
pub fn default_tls_upgrader() -> Box<dyn TlsUpgrader> {
    #[cfg(feature = "sync-tls")]
    {
        Box::new(NativeTls)
    }
    #[cfg(not(feature = "sync-tls"))]
    {
        Box::new(NoTls)
    }
}
