//! Scripted [`Runnable`] implementations for tests and demos.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::errors::RunError;
use crate::runnable::{RunContext, Runnable};

/// One scripted reply.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return this value.
    Ok(Value),
    /// Fail with this message.
    Err(String),
    /// Sleep, then behave like the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Plain-text success.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Ok(Value::String(s.into()))
    }

    /// Failure with `message`.
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Err(message.into())
    }

    /// Wrap `self` so it resolves after `ms` milliseconds.
    #[must_use]
    pub fn after_ms(self, ms: u64) -> Self {
        Self::Delay(Duration::from_millis(ms), Box::new(self))
    }
}

/// Runnable that answers from a script and records every call.
///
/// Replies are consumed in order. Once the script is exhausted the last
/// reply repeats if the mock was built with [`MockRunnable::always`];
/// otherwise the call fails with `no more scripted replies`.
pub struct MockRunnable {
    replies: Mutex<VecDeque<MockReply>>,
    repeat: Option<MockReply>,
    calls: Mutex<Vec<(Value, RunContext)>>,
    call_count: AtomicUsize,
}

impl MockRunnable {
    /// Script a fixed sequence of replies.
    pub fn new(replies: impl IntoIterator<Item = MockReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            repeat: None,
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    /// Answer every call with `reply`.
    pub fn always(reply: MockReply) -> Self {
        Self {
            repeat: Some(reply),
            ..Self::new([])
        }
    }

    /// Answer every call with the given JSON value.
    pub fn returning(value: Value) -> Self {
        Self::always(MockReply::Ok(value))
    }

    /// Fail every call with `message`.
    pub fn failing(message: impl Into<String>) -> Self {
        Self::always(MockReply::fail(message))
    }

    /// Number of `run` invocations so far.
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    /// Inputs received, in call order.
    pub fn inputs(&self) -> Vec<Value> {
        self.calls.lock().iter().map(|(v, _)| v.clone()).collect()
    }

    /// Input and context of the most recent call.
    pub fn last_call(&self) -> Option<(Value, RunContext)> {
        self.calls.lock().last().cloned()
    }

    fn next_reply(&self) -> Option<MockReply> {
        self.replies
            .lock()
            .pop_front()
            .or_else(|| self.repeat.clone())
    }
}

#[async_trait]
impl Runnable for MockRunnable {
    async fn run(&self, input: Value, ctx: &RunContext) -> Result<Value, RunError> {
        let _ = self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push((input, ctx.clone()));

        let mut reply = self
            .next_reply()
            .ok_or_else(|| RunError::new("no more scripted replies"))?;
        loop {
            match reply {
                MockReply::Ok(value) => return Ok(value),
                MockReply::Err(message) => return Err(RunError::new(message)),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    reply = *inner;
                }
            }
        }
    }
}

/// Runnable backed by a synchronous closure over the input.
pub struct FnRunnable<F> {
    f: F,
}

impl<F> FnRunnable<F>
where
    F: Fn(Value) -> Result<Value, RunError> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Runnable for FnRunnable<F>
where
    F: Fn(Value) -> Result<Value, RunError> + Send + Sync,
{
    async fn run(&self, input: Value, _ctx: &RunContext) -> Result<Value, RunError> {
        (self.f)(input)
    }
}
