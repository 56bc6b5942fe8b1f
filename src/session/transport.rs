//! Duplex transport seam
//!
//! The session only needs "a place to write text frames" and "a stream of text
//! frames". [`Connector`] hands both out; [`TcpConnector`] is the stock
//! implementation with one JSON frame per line.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info};

use super::error::TransportError;

/// Port used when neither an explicit port nor the web UI port is known
pub const FALLBACK_HTTP_PORT: u16 = 8080;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Both halves of one open connection
pub struct Duplex {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Duplex {
    pub fn new<Si, St>(sink: Si, stream: St) -> Self
    where
        Si: Sink<String, Error = TransportError> + Send + 'static,
        St: Stream<Item = Result<String, TransportError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Duplex, TransportError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Where the control server's web UI lives; the session port sits right above it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    pub host: String,
    pub http_port: Option<u16>,
}

impl Origin {
    pub fn new(host: impl Into<String>, http_port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            http_port,
        }
    }

    /// Fills in whatever the caller left out
    pub fn resolve(&self, host: Option<&str>, port: Option<u16>) -> Endpoint {
        let port = port.unwrap_or_else(|| {
            self.http_port
                .unwrap_or(FALLBACK_HTTP_PORT)
                .saturating_add(1)
        });
        Endpoint {
            host: host.unwrap_or(&self.host).to_string(),
            port,
        }
    }
}

/// Newline-delimited JSON over TCP
#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub connect_timeout: Duration,
    pub max_frame_len: usize,
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            max_frame_len: 1 << 20,
        }
    }
}

fn from_codec(e: LinesCodecError) -> TransportError {
    match e {
        LinesCodecError::Io(io) => TransportError::Io(io),
        other => TransportError::Framing(other.to_string()),
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Duplex, TransportError> {
        debug!("opening tcp connection to {}", endpoint);
        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let stream = tokio::time::timeout(self.connect_timeout, connect)
            .await
            .map_err(|_| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: format!("timed out after {:?}", self.connect_timeout),
            })?
            .map_err(|e| TransportError::Connect {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;
        info!("tcp connection to {} established", endpoint);

        let framed = Framed::new(stream, LinesCodec::new_with_max_length(self.max_frame_len));
        let (sink, stream) = framed.split::<String>();
        Ok(Duplex::new(
            sink.sink_map_err(from_codec),
            stream.map(|frame| frame.map_err(from_codec)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_defaults_to_http_port_plus_one() {
        let origin = Origin::new("studio.local", Some(8000));
        assert_eq!(
            origin.resolve(None, None),
            Endpoint { host: "studio.local".into(), port: 8001 }
        );
    }

    #[test]
    fn unknown_http_port_falls_back_to_8080() {
        let origin = Origin::new("studio.local", None);
        assert_eq!(origin.resolve(None, None).port, 8081);
    }

    #[test]
    fn explicit_values_win() {
        let origin = Origin::new("studio.local", Some(8000));
        let endpoint = origin.resolve(Some("10.0.0.7"), Some(9999));
        assert_eq!(endpoint.to_string(), "10.0.0.7:9999");
    }
}
