#![forbid(unsafe_code)]

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::hosts::SourceHandle;

/// Signal end of stream on the source, abortably.
///
/// The host may have to wait for pending appends before the marker lands;
/// cancelling the token (new segments appeared) abandons the attempt.
pub(crate) fn spawn_end_of_stream(
    source: Arc<dyn SourceHandle>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            () = cancel.cancelled() => debug!("end-of-stream attempt aborted"),
            result = source.mark_end_of_stream() => match result {
                Ok(()) => debug!("end of stream signalled"),
                Err(error) => warn!(%error, "failed to signal end of stream"),
            },
        }
    })
}
