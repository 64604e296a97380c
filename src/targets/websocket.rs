//! A target that pushes each notification over a short-lived WebSocket.
//!
//! Every send opens `ws://<host>/`, writes the rendered message as a single
//! text frame and closes the connection.

use crate::core::{Message, NotifyFeature, NotifyTarget, TargetDescription};
use crate::formatting::{PlainTextFormatter, TextFormatter};
use anyhow::Context;
use tokio_tungstenite::tungstenite::{self, protocol::frame::coding::CloseCode, protocol::CloseFrame};
use tracing::{debug, instrument};

pub struct WebSocketTarget {
    host: String,
    description: TargetDescription,
}

impl WebSocketTarget {
    pub fn new(host: String, description: TargetDescription) -> Self {
        Self { host, description }
    }

    pub fn default_features() -> NotifyFeature {
        NotifyFeature::MESSAGE | NotifyFeature::TITLE
    }

    pub fn url(&self) -> String {
        format!("ws://{}/", self.host)
    }
}

impl NotifyTarget for WebSocketTarget {
    fn description(&self) -> TargetDescription {
        self.description.clone()
    }

    #[instrument(skip(self, message), fields(host = %self.host))]
    fn send_message(&self, message: &Message) -> anyhow::Result<()> {
        let url = self.url();
        let (mut socket, _response) =
            tungstenite::connect(url.as_str()).with_context(|| format!("connecting to {url}"))?;
        debug!("WebSocket connection opened");

        let text = PlainTextFormatter.format_message(message);
        socket
            .send(tungstenite::Message::Text(text.into()))
            .context("sending notification frame")?;

        socket
            .close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "".into(),
            }))
            .context("closing connection")?;
        // Drain until the peer acknowledges the close.
        loop {
            match socket.read() {
                Ok(_) => continue,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => break,
                Err(tungstenite::Error::Protocol(_)) | Err(tungstenite::Error::Io(_)) => break,
                Err(e) => return Err(e).context("closing connection"),
            }
        }
        debug!("WebSocket connection closed");
        Ok(())
    }
}
