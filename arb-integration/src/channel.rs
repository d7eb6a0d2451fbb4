use derive_more::{Constructor, Display};
use std::fmt::Debug;
use tracing::warn;

/// Marker for errors that can never be recovered from - used by [`Tx::Error`] so that a send
/// failure on a permanently-closed channel can be distinguished from a transient one.
pub trait Unrecoverable {
    fn is_unrecoverable(&self) -> bool;
}

/// Abstraction over "send an item to a downstream consumer", implemented by [`UnboundedTx`].
///
/// Generalising over this trait (rather than baking in `tokio::sync::mpsc::UnboundedSender`
/// everywhere) is what lets the connection pool and monitor fan events upward without an
/// in-process emitter/listener-list - every event surface in this engine is one of these
/// channels, attached once at construction and dropped, never individually deregistered.
pub trait Tx
where
    Self: Debug + Clone + Send,
{
    type Item;
    type Error: Unrecoverable + Debug;

    fn send<Item: Into<Self::Item>>(&self, item: Item) -> Result<(), Self::Error>;
}

/// Convenience type that holds the [`UnboundedTx`] and [`UnboundedRx`] halves of a channel.
#[derive(Debug)]
pub struct Channel<T> {
    pub tx: UnboundedTx<T>,
    pub rx: UnboundedRx<T>,
}

impl<T> Channel<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc_unbounded();
        Self { tx, rx }
    }
}

impl<T> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct UnboundedTx<T> {
    tx: tokio::sync::mpsc::UnboundedSender<T>,
}

impl<T> UnboundedTx<T> {
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<T>) -> Self {
        Self { tx }
    }
}

impl<T> Tx for UnboundedTx<T>
where
    T: Debug + Clone + Send,
{
    type Item = T;
    type Error = tokio::sync::mpsc::error::SendError<T>;

    fn send<Item: Into<Self::Item>>(&self, item: Item) -> Result<(), Self::Error> {
        self.tx.send(item.into())
    }
}

impl<T> Unrecoverable for tokio::sync::mpsc::error::SendError<T> {
    fn is_unrecoverable(&self) -> bool {
        true
    }
}

#[derive(Debug, Constructor)]
pub struct UnboundedRx<T> {
    rx: tokio::sync::mpsc::UnboundedReceiver<T>,
}

impl<T> UnboundedRx<T> {
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    pub fn into_stream(self) -> tokio_stream::wrappers::UnboundedReceiverStream<T> {
        tokio_stream::wrappers::UnboundedReceiverStream::new(self.rx)
    }
}

/// A [`Tx`] wrapper that silently disables itself the first time its receiver is dropped, rather
/// than returning an error on every subsequent send. Used for best-effort fan-out (eg/ pool ->
/// monitor event forwarding) where a dropped receiver should not be treated as a hard failure.
#[derive(Debug, Clone, Display)]
pub enum ChannelTxDroppable<ChannelTx> {
    Active(ChannelTx),
    Disabled,
}

impl<ChannelTx> ChannelTxDroppable<ChannelTx> {
    pub fn new(tx: ChannelTx) -> Self {
        Self::Active(tx)
    }

    pub fn disable(&mut self) {
        *self = Self::Disabled;
    }
}

impl<ChannelTx> ChannelTxDroppable<ChannelTx>
where
    ChannelTx: Tx,
{
    pub fn send(&mut self, item: ChannelTx::Item) {
        let Self::Active(tx) = &self else {
            return;
        };

        if tx.send(item).is_err() {
            let name = std::any::type_name::<ChannelTx::Item>();
            warn!(
                name,
                "ChannelTxDroppable receiver dropped - items will no longer be sent"
            );
            *self = Self::Disabled;
        }
    }
}

pub fn mpsc_unbounded<T>() -> (UnboundedTx<T>, UnboundedRx<T>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    (UnboundedTx::new(tx), UnboundedRx::new(rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unbounded_tx_rx_roundtrip() {
        let (tx, mut rx) = mpsc_unbounded::<u32>();
        tx.send(42u32).unwrap();
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn test_channel_tx_droppable_disables_on_dropped_receiver() {
        let (tx, rx) = mpsc_unbounded::<u32>();
        drop(rx);

        let mut droppable = ChannelTxDroppable::new(tx);
        droppable.send(1);
        assert!(matches!(droppable, ChannelTxDroppable::Disabled));
    }
}
