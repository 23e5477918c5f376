/// Comms transport
///
/// The client talks to its peer through a `Connection`: a pair of text
/// channels. `WsConnector` backs it with a WebSocket; tests plug in their own
/// connector. The inbound channel closing means the connection dropped.

use crate::comms::types::CommsError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMsg};
use url::Url;

/// An open connection to the comms peer
#[derive(Debug)]
pub struct Connection {
    /// Text frames to the peer
    pub outbound: UnboundedSender<String>,
    /// Text frames from the peer
    pub inbound: UnboundedReceiver<String>,
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> Result<Connection, CommsError>;
}

/// Derive the comms endpoint from an admin base url
///
/// `http` becomes `ws` and `https` becomes `wss`; the path gets a trailing
/// `/` and then `comms`.
pub fn comms_url(base: &str) -> Result<Url, CommsError> {
    let mut url = Url::parse(base).map_err(|source| CommsError::InvalidUrl {
        url: base.to_string(),
        source,
    })?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(CommsError::UnsupportedScheme(other.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| CommsError::UnsupportedScheme(url.scheme().to_string()))?;

    let mut path = url.path().to_string();
    if !path.ends_with('/') {
        path.push('/');
    }
    path.push_str("comms");
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// WebSocket connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }

    /// Connector for the comms endpoint under `base`
    pub fn for_admin_url(base: &str) -> Result<Self, CommsError> {
        Ok(Self::new(comms_url(base)?))
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> Result<Connection, CommsError> {
        let (stream, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| CommsError::Transport(e.to_string()))?;
        let (mut write, mut read) = stream.split();

        let (tx_out, mut rx_out) = unbounded_channel::<String>();
        let (tx_in, rx_in) = unbounded_channel::<String>();

        // outbound pump; ends when the client drops its sender
        tokio::spawn(async move {
            while let Some(frame) = rx_out.recv().await {
                if write.send(WsMsg::Text(frame.into())).await.is_err() {
                    return;
                }
            }
            let _ = write.send(WsMsg::Close(None)).await;
        });

        // inbound pump; dropping tx_in signals the disconnect
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(WsMsg::Text(text)) => {
                        if tx_in.send(text.as_str().to_string()).is_err() {
                            break;
                        }
                    }
                    Ok(WsMsg::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        });

        Ok(Connection {
            outbound: tx_out,
            inbound: rx_in,
        })
    }
}
