//! Deadline-bounded JavaScript evaluator.
//!
//! Every call builds a fresh QuickJS runtime, so no state survives between invocations or
//! tenants. The runtime has no module loader and no `Date` intrinsic, which leaves scripts
//! without file system, network or clock access. An interrupt handler aborts evaluation once
//! the wall-clock deadline passes.

use crate::{CodecError, Result};
use rquickjs::context::intrinsic::{Eval, Json, MapSet, RegExp, RegExpCompiler, TypedArrays};
use rquickjs::{CatchResultExt, CaughtError, Context, Ctx, Function, Runtime, Value as JsValue};
use serde_json::Value;
use std::time::{Duration, Instant};
use tracing::debug;

type Intrinsics = (Eval, Json, RegExpCompiler, RegExp, MapSet, TypedArrays);

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Wall-clock budget for evaluating the script and running the entry function.
    pub deadline: Duration,
    pub memory_limit: usize,
    pub max_stack_size: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(10),
            memory_limit: 16 * 1024 * 1024,
            max_stack_size: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Evaluates `script`, then calls the global function `entry` with the JSON arguments.
    ///
    /// `normalize` converts the returned JS value into the caller's shape while the context is
    /// still alive.
    pub fn call<T, F>(&self, script: &str, entry: &str, args: [Value; 3], normalize: F) -> Result<T>
    where
        F: for<'js> FnOnce(&Ctx<'js>, JsValue<'js>) -> Result<T>,
    {
        let runtime = Runtime::new().map_err(|e| CodecError::Script(e.to_string()))?;
        runtime.set_memory_limit(self.config.memory_limit);
        runtime.set_max_stack_size(self.config.max_stack_size);

        let deadline = Instant::now() + self.config.deadline;
        runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));

        let context = Context::custom::<Intrinsics>(&runtime)
            .map_err(|e| CodecError::Script(e.to_string()))?;

        let [first, second, third] = args;
        let first = serde_json::to_string(&first)?;
        let second = serde_json::to_string(&second)?;
        let third = serde_json::to_string(&third)?;

        let result = context.with(|ctx| {
            ctx.eval::<(), _>(script)
                .catch(&ctx)
                .map_err(|e| script_failure(e, deadline))?;

            let function: Function = ctx
                .globals()
                .get::<_, JsValue>(entry)
                .catch(&ctx)
                .map_err(|e| script_failure(e, deadline))?
                .into_function()
                .ok_or_else(|| CodecError::MissingFunction(entry.to_string()))?;

            let parse = |json: String| {
                ctx.json_parse(json)
                    .catch(&ctx)
                    .map_err(|e| script_failure(e, deadline))
            };
            let args = (parse(first)?, parse(second)?, parse(third)?);

            let returned: JsValue = function
                .call(args)
                .catch(&ctx)
                .map_err(|e| script_failure(e, deadline))?;

            // Getters and toJSON run user code during normalization, so the interrupt can
            // fire there too.
            normalize(&ctx, returned).map_err(|e| {
                if Instant::now() >= deadline {
                    CodecError::Timeout
                } else {
                    e
                }
            })
        });

        if let Err(CodecError::Timeout) = &result {
            debug!(entry = %entry, deadline_ms = %self.config.deadline.as_millis(), "script exceeded deadline");
        }
        result
    }
}

fn script_failure(error: CaughtError<'_>, deadline: Instant) -> CodecError {
    if Instant::now() >= deadline {
        return CodecError::Timeout;
    }
    let message = match error {
        CaughtError::Exception(exception) => exception
            .message()
            .unwrap_or_else(|| exception.to_string()),
        other => other.to_string(),
    };
    CodecError::Script(message.trim().to_string())
}

/// Converts a JS value to JSON via the engine's own `JSON.stringify`.
pub(crate) fn to_json<'js>(ctx: &Ctx<'js>, value: JsValue<'js>) -> Result<Value> {
    let text = ctx
        .json_stringify(value)
        .catch(ctx)
        .map_err(|e| CodecError::Script(e.to_string()))?;
    match text {
        Some(text) => {
            let text = text
                .to_string()
                .map_err(|e| CodecError::Script(e.to_string()))?;
            Ok(serde_json::from_str(&text)?)
        }
        None => Ok(Value::Null),
    }
}
