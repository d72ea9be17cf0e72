//! `MessageStream` implementations for tonic and `futures` streams.

use async_trait::async_trait;
use futures::{Stream, StreamExt};

use crate::application::ports::MessageStream;
use crate::error::Mt5Error;

/// Adapts any `futures::Stream` of results into a [`MessageStream`].
#[derive(Debug)]
pub struct StreamAdapter<St> {
    inner: St,
}

impl<St> StreamAdapter<St> {
    /// Wrap a stream.
    pub const fn new(inner: St) -> Self {
        Self { inner }
    }

    /// Unwrap the stream.
    pub fn into_inner(self) -> St {
        self.inner
    }
}

#[async_trait]
impl<T, E, St> MessageStream<T> for StreamAdapter<St>
where
    T: Send,
    E: Into<Mt5Error> + Send,
    St: Stream<Item = Result<T, E>> + Send + Unpin,
{
    async fn next_message(&mut self) -> Result<Option<T>, Mt5Error> {
        match self.inner.next().await {
            Some(Ok(message)) => Ok(Some(message)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl<T: Send + 'static> MessageStream<T> for tonic::Streaming<T> {
    async fn next_message(&mut self) -> Result<Option<T>, Mt5Error> {
        self.message().await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use futures::stream;
    use tonic::Status;

    use super::*;

    #[tokio::test]
    async fn yields_messages_then_error_then_end() {
        let mut adapter = StreamAdapter::new(stream::iter(vec![
            Ok(1),
            Err(Status::unavailable("connection reset")),
        ]));

        assert_eq!(adapter.next_message().await.unwrap(), Some(1));
        assert!(matches!(
            adapter.next_message().await,
            Err(Mt5Error::Unavailable(_))
        ));
        assert_eq!(adapter.next_message().await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_stream_is_clean_end() {
        let mut adapter = StreamAdapter::new(stream::empty::<Result<u8, Mt5Error>>());
        assert_eq!(adapter.next_message().await.unwrap(), None);
        adapter.close().await;
    }
}
