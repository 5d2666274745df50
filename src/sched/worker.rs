// src/sched/worker.rs

//! Collect-phase execution on the blocking pool.

use std::any::Any;
use std::sync::Arc;
use std::time::Instant;

use anyhow::anyhow;
use tracing::{debug, trace};

use crate::graph::PassNode;
use crate::pass::PassError;
use crate::sched::run::RunCore;

/// Drive one submitted node through its collect phase.
///
/// Order of operations:
/// 1. cancellation checkpoint;
/// 2. release on-submit successors (start-to-start edges only wait for this
///    collect to begin, not to finish);
/// 3. run `collect` with panics contained;
/// 4. hand the payload to the serialized apply queue.
pub(crate) fn run_collect(run: Arc<RunCore>, node: Arc<PassNode>) {
    let id = node.id();

    if run.token().check().is_err() {
        trace!(
            target = %run.target(),
            run_id = run.id().0,
            pass = %id,
            "collect skipped, run canceled"
        );
        return;
    }

    for &succ in node.on_submit() {
        run.release(succ, id);
    }

    let started = Instant::now();
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        node.pass().collect(run.token())
    }));

    match result {
        Ok(Ok(payload)) => {
            debug!(
                target = %run.target(),
                run_id = run.id().0,
                pass = %id,
                elapsed = ?started.elapsed(),
                "collect finished"
            );
            run.enqueue_apply(node, payload);
        }
        Ok(Err(PassError::Canceled)) => {
            debug!(
                target = %run.target(),
                run_id = run.id().0,
                pass = %id,
                "collect observed cancellation"
            );
        }
        Ok(Err(PassError::Failed(err))) => {
            run.cancel_failed(id, "collect", err);
        }
        Err(panic) => {
            let msg = panic_message(panic);
            run.cancel_failed(id, "collect", anyhow!("collect panicked: {msg}"));
        }
    }
}

/// Best-effort extraction of a panic payload's message.
pub(crate) fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
