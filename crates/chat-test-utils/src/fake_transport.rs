use std::time::Duration;

use async_trait::async_trait;
use chat_core::session::{FrameSink, FrameSource, TransportError, WireEvent};
use tokio::sync::mpsc;

/// A `FrameSource`/`FrameSink` pair wired to each other through channels, so
/// tests can drive a session's read loop and observe its write loop without
/// a real socket.
pub fn fake_transport_pair() -> (FakeSource, FakeSink, mpsc::Sender<WireEvent>, mpsc::Receiver<String>)
{
    let (inbound_tx, inbound_rx) = mpsc::channel(64);
    let (outbound_tx, outbound_rx) = mpsc::channel(64);
    (
        FakeSource { rx: inbound_rx },
        FakeSink { tx: outbound_tx },
        inbound_tx,
        outbound_rx,
    )
}

pub struct FakeSource {
    rx: mpsc::Receiver<WireEvent>,
}

#[async_trait]
impl FrameSource for FakeSource {
    async fn recv(&mut self, _deadline: Duration) -> Result<Option<WireEvent>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

pub struct FakeSink {
    tx: mpsc::Sender<String>,
}

#[async_trait]
impl FrameSink for FakeSink {
    async fn send_text(&mut self, text: String, _deadline: Duration) -> Result<(), TransportError> {
        self.tx
            .send(text)
            .await
            .map_err(|_| TransportError("fake sink closed".to_owned()))
    }

    async fn send_ping(&mut self, _deadline: Duration) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send_close(&mut self, _deadline: Duration) -> Result<(), TransportError> {
        Ok(())
    }
}
