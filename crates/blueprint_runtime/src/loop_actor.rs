// Loop Actor - Message-driven iteration of a loop node's body
//
// A loop node only initializes its context and posts `Next` to the mailbox.
// After the node returns, the scheduler drives the mailbox: every `Next` runs
// the body chain to completion, then `BodyDone` and the following `Next` are
// posted. Cancellation is observed between messages.

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use blueprint_types::Value;

use crate::engine::{Engine, RunState};
use crate::error::{BlueprintError, ErrorCode, Result};

/// Execution output fired after the last iteration
pub const COMPLETED_PIN: &str = "completed";
/// Execution output driving the body
pub const BODY_PIN: &str = "loop";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMessage {
    /// Run the next iteration, or finish
    Next,
    /// The body chain of the current iteration drained
    BodyDone,
}

/// Loop sub-context handed to a body-driving node
#[derive(Debug)]
pub struct LoopContext {
    variable: String,
    start: i64,
    max: i64,
    done: i64,
    items: Option<Vec<Value>>,
    tx: mpsc::UnboundedSender<LoopMessage>,
    rx: mpsc::UnboundedReceiver<LoopMessage>,
}

impl LoopContext {
    pub(crate) fn new(variable: &str, max_iterations: i64, start_index: i64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            variable: variable.to_string(),
            start: start_index,
            max: max_iterations.max(0),
            done: 0,
            items: None,
            tx,
            rx,
        }
    }

    /// Reset the counters and post the first `Next`
    pub fn initialize_loop(&mut self, start_index: i64, max_iterations: i64) -> Result<()> {
        self.start = start_index;
        self.max = max_iterations.max(0);
        self.done = 0;
        self.send(LoopMessage::Next)
    }

    /// Iterate over a list; each iteration also publishes `element`
    pub fn with_items(&mut self, items: Vec<Value>) -> &mut Self {
        self.max = items.len() as i64;
        self.items = Some(items);
        self
    }

    pub fn send(&self, message: LoopMessage) -> Result<()> {
        self.tx.send(message).map_err(|_| {
            BlueprintError::execution(ErrorCode::NodeExecutionFailed, "loop mailbox is closed")
        })
    }

    pub fn variable(&self) -> &str {
        &self.variable
    }

    pub fn iterations_done(&self) -> i64 {
        self.done
    }

    pub fn max_iterations(&self) -> i64 {
        self.max
    }
}

/// One-shot signal; firing it twice is a usage fault
#[derive(Debug)]
pub struct OneShotSignal<T> {
    tx: Option<oneshot::Sender<T>>,
}

impl<T> OneShotSignal<T> {
    pub fn pair() -> (Self, oneshot::Receiver<T>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn fire(&mut self, value: T) -> Result<()> {
        match self.tx.take() {
            Some(tx) => {
                // Receiver may already be gone; the signal still counts as fired
                let _ = tx.send(value);
                Ok(())
            }
            None => Err(BlueprintError::execution(
                ErrorCode::DoubleSignal,
                "signal fired more than once",
            )),
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.is_none()
    }
}

/// Published on the execution-done signal when a loop retires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: i64,
    pub cancelled: bool,
}

/// Drive a loop's mailbox until it retires.
///
/// Returns the execution output to continue with: `completed` after the last
/// iteration, `None` when cancelled or when the body failed.
pub(crate) fn drive_loop<'s>(
    engine: &'s Engine,
    state: &'s mut RunState,
    node_id: &'s str,
    mut lp: LoopContext,
) -> BoxFuture<'s, Result<Option<String>>> {
    Box::pin(async move {
        let (mut done_signal, done_rx) = OneShotSignal::<LoopOutcome>::pair();
        state.active_loops += 1;
        let result = run_mailbox(engine, state, node_id, &mut lp, &mut done_signal).await;
        state.active_loops -= 1;

        if !done_signal.is_fired() {
            done_signal.fire(LoopOutcome {
                iterations: lp.done,
                cancelled: true,
            })?;
        }
        if let Ok(outcome) = done_rx.await {
            debug!(
                node_id = %node_id,
                iterations = outcome.iterations,
                cancelled = outcome.cancelled,
                "Loop retired"
            );
            state.debug(
                node_id,
                "loop retired",
                serde_json::json!({ "iterations": outcome.iterations, "cancelled": outcome.cancelled }),
            );
        }
        result
    })
}

async fn run_mailbox(
    engine: &Engine,
    state: &mut RunState,
    node_id: &str,
    lp: &mut LoopContext,
    done_signal: &mut OneShotSignal<LoopOutcome>,
) -> Result<Option<String>> {
    let token = state.sandbox.monitor().token();

    loop {
        let message = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            message = lp.rx.recv() => message,
        };

        match message {
            None => {
                debug!(node_id = %node_id, done = lp.done, "Loop cancelled");
                done_signal.fire(LoopOutcome {
                    iterations: lp.done,
                    cancelled: true,
                })?;
                return Ok(None);
            }
            Some(LoopMessage::BodyDone) => lp.done += 1,
            Some(LoopMessage::Next) => {
                if lp.done >= lp.max {
                    done_signal.fire(LoopOutcome {
                        iterations: lp.done,
                        cancelled: false,
                    })?;
                    return Ok(Some(COMPLETED_PIN.to_string()));
                }

                let index = lp.start + lp.done;
                state.write_output(node_id, "index", Value::Int(index));
                if let Some(item) = lp.items.as_ref().and_then(|items| items.get(lp.done as usize)) {
                    state.write_output(node_id, "element", item.clone());
                }
                state.generation += 1;
                state.debug(
                    node_id,
                    "loop iteration",
                    serde_json::json!({ "variable": lp.variable, "index": index }),
                );

                let (mut body_signal, body_done) = OneShotSignal::<()>::pair();
                state.record_flow(node_id, BODY_PIN);
                let seeds = engine.successors(state, node_id, BODY_PIN);
                let body = engine.run_frame(state, seeds).await;
                body_signal.fire(())?;
                body_done.await.map_err(|_| {
                    BlueprintError::execution(ErrorCode::NodeExecutionFailed, "loop body signal dropped")
                })?;

                if let Err(err) = body {
                    // Already recorded as the run failure; the loop's chain ends here
                    debug!(node_id = %node_id, code = %err.code, "Loop body failed");
                    done_signal.fire(LoopOutcome {
                        iterations: lp.done,
                        cancelled: false,
                    })?;
                    return Ok(None);
                }

                lp.send(LoopMessage::BodyDone)?;
                lp.send(LoopMessage::Next)?;
            }
        }
    }
}
