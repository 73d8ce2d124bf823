// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-connection request/response loop (SPEC_FULL.md §4.6): read one
//! frame, dispatch it on the worker pool, write one frame, repeat until
//! the peer closes or framing breaks.

use echo_vault_dispatch::Dispatcher;
use echo_vault_lock::{HolderId, LockService};
use echo_vault_proto::{Request, Response, Status};
use echo_vault_wire::{read_frame, write_frame, FrameError, DEFAULT_MAX_FRAME_BYTES};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Serves one connection to completion.
///
/// `workers` bounds how many dispatches run concurrently server-wide (the
/// worker pool); within a single connection requests are already
/// serialized by this loop reading one frame at a time. `locks` is
/// force-released for `holder` once the loop exits, covering a dispatch
/// task that panicked before ever constructing a guard — the one case a
/// guard's own `Drop` can't reach.
pub async fn serve<S>(
    mut stream: S,
    dispatcher: Arc<Dispatcher>,
    workers: Arc<Semaphore>,
    holder: HolderId,
    locks: LockService,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let body = match read_frame(&mut stream, DEFAULT_MAX_FRAME_BYTES).await {
            Ok(body) => body,
            Err(FrameError::Closed) => {
                debug!(holder, "connection closed");
                break;
            }
            Err(err) => {
                warn!(holder, %err, "frame read failed; closing connection");
                break;
            }
        };

        let request = match Request::decode(&body) {
            Ok(request) => request,
            Err(err) => {
                warn!(holder, %err, "malformed request body; closing connection");
                break;
            }
        };

        let response = dispatch_one(&dispatcher, &workers, request, holder).await;

        let Ok(encoded) = response.encode() else {
            warn!(holder, "failed to encode response; closing connection");
            break;
        };
        if let Err(err) = write_frame(&mut stream, &encoded).await {
            warn!(holder, %err, "frame write failed; closing connection");
            break;
        }
    }
    locks.force_release(holder).await;
}

/// Runs one request through the dispatcher under a worker-pool permit,
/// isolating a panicking dispatch from the rest of the server.
async fn dispatch_one(
    dispatcher: &Arc<Dispatcher>,
    workers: &Arc<Semaphore>,
    request: Request,
    holder: HolderId,
) -> Response {
    let Ok(permit) = workers.clone().acquire_owned().await else {
        return Response::error(Status::InternalServerError);
    };
    let dispatcher = Arc::clone(dispatcher);
    let handle = tokio::spawn(async move {
        let _permit = permit;
        dispatcher.dispatch(&request, holder).await
    });
    match handle.await {
        Ok(response) => response,
        Err(err) => {
            warn!(holder, %err, "dispatch task panicked");
            Response::error(Status::InternalServerError)
        }
    }
}
