use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn, Instrument};

use super::handler::{ErrorDetail, HandlerContext, MessageHandler, MessageHandlerResult};
use crate::error::HandlerFailure;
use crate::message::QueuedMessage;

/// Wrap one handler invocation with tracing, timing, timeout enforcement,
/// and error capture.
///
/// All outcomes flow through the returned result — a failed or timed-out
/// handler becomes `MessageHandlerResult::Error` with the transaction
/// scheduled for rollback; nothing is re-thrown. Result errors get their
/// missing `client_message` filled from the configured default and their
/// missing `id_command_query` from the current message id.
pub async fn invoke_handler(
    handler: Option<Arc<dyn MessageHandler>>,
    msg: &QueuedMessage,
    ctx: &HandlerContext,
    timeout_ms: Option<u64>,
    default_client_message: &str,
) -> MessageHandlerResult {
    let span = tracing::info_span!(
        "handle_message",
        message_type = %msg.message_type,
        message_id = %msg.id,
        queue = %msg.queue_name,
        trace_id = %ctx.trace.trace_id,
    );

    async {
        debug!(message_type = %msg.message_type, "method in");
        let started = std::time::Instant::now();

        let outcome = match handler {
            Some(handler) => match timeout_ms {
                Some(ms) => {
                    match tokio::time::timeout(
                        Duration::from_millis(ms),
                        handler.handle(msg, ctx),
                    )
                    .await
                    {
                        Ok(result) => result,
                        Err(_elapsed) => Err(HandlerFailure::Failed(format!(
                            "processing timed out after {ms}ms"
                        ))),
                    }
                }
                None => handler.handle(msg, ctx).await,
            },
            None => Err(HandlerFailure::NoHandler(msg.message_type.clone())),
        };

        let result = match outcome {
            Ok(result) => finalize(result, msg, ctx, default_client_message),
            Err(failure) => {
                warn!(error = %failure, "handler invocation failed");
                ctx.tx.schedule_rollback(Some(failure.to_string()));
                MessageHandlerResult::Error(ErrorDetail {
                    client_message: Some(default_client_message.to_string()),
                    detail: failure.to_string(),
                    id_command_query: Some(msg.id),
                    rollback: true,
                })
            }
        };

        debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            result = result.label(),
            "method out"
        );
        result
    }
    .instrument(span)
    .await
}

/// Fill the blanks on a handler-produced error and schedule the rollback it
/// demands.
fn finalize(
    result: MessageHandlerResult,
    msg: &QueuedMessage,
    ctx: &HandlerContext,
    default_client_message: &str,
) -> MessageHandlerResult {
    let MessageHandlerResult::Error(mut detail) = result else {
        return result;
    };
    if detail.client_message.is_none() {
        detail.client_message = Some(default_client_message.to_string());
    }
    if detail.id_command_query.is_none() {
        detail.id_command_query = Some(msg.id);
    }
    if detail.rollback {
        ctx.tx.schedule_rollback(Some(detail.detail.clone()));
    }
    MessageHandlerResult::Error(detail)
}
