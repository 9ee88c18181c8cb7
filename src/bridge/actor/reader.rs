//! Reader task for inbound host messages.
//!
//! The Reader Task:
//! - Runs in a spawned tokio task
//! - Reads raw messages from the transport's source half
//! - Routes them through the ResponseRouter
//! - On EOF or read error, terminates the bridge and fails all pending requests
//! - Stops quietly when cancelled (the bridge is already tearing down)

use std::sync::Arc;

use log::debug;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::ResponseRouter;
use crate::bridge::transport::MessageSource;

/// Handle to a running Reader Task. Cancels the task when dropped.
pub(crate) struct ReaderTaskHandle {
    _join_handle: JoinHandle<()>,
    cancel_token: CancellationToken,
}

impl ReaderTaskHandle {
    pub(crate) fn cancel(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for ReaderTaskHandle {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Spawn a reader task that routes messages from `source`.
pub(crate) fn spawn_reader_task<S: MessageSource>(
    source: S,
    router: Arc<ResponseRouter>,
) -> ReaderTaskHandle {
    let cancel_token = CancellationToken::new();
    let token_clone = cancel_token.clone();

    let join_handle = tokio::spawn(reader_loop(source, router, token_clone));

    ReaderTaskHandle {
        _join_handle: join_handle,
        cancel_token,
    }
}

async fn reader_loop<S: MessageSource>(
    mut source: S,
    router: Arc<ResponseRouter>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;

            _ = cancel_token.cancelled() => {
                debug!(
                    target: "workbridge::bridge::reader",
                    "Reader task cancelled, shutting down"
                );
                break;
            }

            result = source.recv() => {
                match result {
                    Ok(Some(message)) => {
                        router.route(message);
                    }
                    Ok(None) => {
                        router.fail_transport("host closed the channel");
                        break;
                    }
                    Err(e) => {
                        router.fail_transport(&format!("read error: {}", e));
                        break;
                    }
                }
            }
        }
    }
}
