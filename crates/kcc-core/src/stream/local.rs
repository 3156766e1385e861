//! In-process transport built on bounded tokio channels.
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{
    error::StreamError,
    stream::{BoxSink, BoxSource, StreamSink, StreamSource},
};

/// Sending half backed by an [`mpsc::Sender`].
pub struct LocalSink<T>(mpsc::Sender<T>);

/// Receiving half backed by an [`mpsc::Receiver`].
pub struct LocalSource<T>(mpsc::Receiver<T>);

#[async_trait]
impl<T: Send + 'static> StreamSink<T> for LocalSink<T> {
    async fn send(&mut self, item: T) -> Result<(), StreamError> {
        self.0.send(item).await.map_err(|_| StreamError::Closed)
    }
}

#[async_trait]
impl<T: Send + 'static> StreamSource<T> for LocalSource<T> {
    async fn recv(&mut self) -> Result<Option<T>, StreamError> {
        Ok(self.0.recv().await)
    }
}

/// One end of an in-process duplex link: sends `S`, receives `R`.
pub struct LocalEnd<S, R> {
    pub tx: mpsc::Sender<S>,
    pub rx: mpsc::Receiver<R>,
}

impl<S: Send + 'static, R: Send + 'static> LocalEnd<S, R> {
    /// Box both halves for handing to the broker.
    pub fn into_stream(self) -> (BoxSink<S>, BoxSource<R>) {
        (Box::new(LocalSink(self.tx)), Box::new(LocalSource(self.rx)))
    }
}

/// Create a connected pair of ends. Dropping either end's `tx` finishes the other end's stream.
pub fn duplex<A, B>(capacity: usize) -> (LocalEnd<A, B>, LocalEnd<B, A>) {
    let (a_tx, a_rx) = mpsc::channel(capacity.max(1));
    let (b_tx, b_rx) = mpsc::channel(capacity.max(1));
    (
        LocalEnd { tx: a_tx, rx: b_rx },
        LocalEnd { tx: b_tx, rx: a_rx },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ends_are_cross_wired() {
        let (near, mut far) = duplex::<u32, String>(4);
        let (mut sink, mut source) = near.into_stream();

        sink.send(7).await.unwrap();
        assert_eq!(far.rx.recv().await, Some(7));

        far.tx.send("ok".into()).await.unwrap();
        assert_eq!(source.recv().await.unwrap(), Some("ok".to_string()));
    }

    #[tokio::test]
    async fn dropping_peer_finishes_stream() {
        let (near, far) = duplex::<u32, u32>(1);
        let (mut sink, mut source) = near.into_stream();
        drop(far);

        assert_eq!(source.recv().await.unwrap(), None);
        match sink.send(1).await {
            Err(StreamError::Closed) => {}
            other => panic!("expected StreamError::Closed, got {other:?}"),
        }
    }
}
