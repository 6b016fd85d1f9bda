//! Adapts a provider event stream into the plain text-delta sequence the
//! turn orchestrator consumes.

use futures_util::StreamExt;
use lx_domain::error::{Error, Result};
use lx_domain::stream::{BoxStream, StreamEvent};

/// Reduce a [`StreamEvent`] stream to non-empty text deltas.
///
/// The returned stream ends after `Done`, or after yielding exactly one
/// `Err` for an in-band error event or a transport failure. Concatenating
/// the `Ok` items reconstructs the response text.
pub fn text_deltas(
    provider: &str,
    mut events: BoxStream<'static, Result<StreamEvent>>,
) -> BoxStream<'static, Result<String>> {
    let provider = provider.to_owned();
    Box::pin(async_stream::stream! {
        while let Some(event) = events.next().await {
            match event {
                Ok(StreamEvent::Token { text }) => {
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                }
                Ok(StreamEvent::Done { .. }) => break,
                Ok(StreamEvent::Error { message }) => {
                    yield Err(Error::Provider { provider: provider.clone(), message });
                    break;
                }
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    })
}
