use crate::error::is_cancellation;
use crate::status::Status;
use crate::task::output::OutputRedirect;
use crate::task::types::{Task, TaskContext};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, warn};

/// Runs one task and returns the status it ended with.
///
/// Everything the task does wrong is turned into a status here: cancellation
/// signals become `Cancel`, errors and panics become `Error`. Nothing escapes.
pub async fn execute_single_task(task: &Arc<dyn Task>, ctx: TaskContext) -> Status {
    let name = task.name();
    let redirect = OutputRedirect::begin(&name, task.output_capture());
    let ctx = ctx.with_output(redirect.output());

    ctx.publish_status(Status::ok(format!("Task: {}", name)));
    debug!(task = %name, scope = %ctx.scope().path(), "Executing task");

    let outcome = AssertUnwindSafe(task.execute(&ctx)).catch_unwind().await;
    match outcome {
        Ok(Ok(Some(status))) => ctx.publish_status(status),
        Ok(Ok(None)) => {}
        Ok(Err(err)) if is_cancellation(&err) => {
            debug!(task = %name, "Task cancelled");
            ctx.publish_status(Status::cancel(format!("Cancelled: {}", name)).with_cause(err));
        }
        Ok(Err(err)) => {
            warn!(task = %name, "Task failed: {:#}", err);
            ctx.publish_status(
                Status::error(format!("Fatal failure while executing {}", name)).with_cause(err),
            );
        }
        Err(panic) => {
            let message = panic_message(&*panic);
            warn!(task = %name, "Task panicked: {}", message);
            ctx.publish_status(Status::error(format!("Task {} panicked: {}", name, message)));
        }
    }

    drop(redirect);
    ctx.published_status()
        .unwrap_or_else(|| Status::ok(format!("Task: {}", name)))
}

/// Text of a panic payload raised with a string message.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
