/// AsyncIterator is the pull-based iterator shared by the read pipeline.
///
/// try_next returns `Ok(None)` once the stream is exhausted.  An error is
/// terminal; the iterator must not be polled again afterwards.
#[async_trait]
pub trait AsyncIterator {
    type Item;
    type Error;

    async fn try_next(&mut self) -> Result<Option<Self::Item>, Self::Error>;
}
