use crate::envelope::FailureEnvelope;
use crate::error::{RemoteError, Result};
use crate::harness::ResultChannel;

/// A callable the generated program imports and runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    /// Import path of the module defining the function, e.g. `jobs.resize`.
    pub module: String,
    pub function: String,
    /// Model class the argument is validated into, as `(module, name)`.
    /// The raw JSON value is passed when absent.
    pub input_model: Option<(String, String)>,
    /// Prepended to the interpreter's import path (usually the project root).
    pub search_path: Option<String>,
}

impl CallTarget {
    pub fn new(module: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            function: function.into(),
            input_model: None,
            search_path: None,
        }
    }
}

/// Turns a call target and a serialized argument into runnable program text.
///
/// The program must write exactly one document through `channel`: the
/// encoded result, exiting 0, or a failure envelope, exiting non-zero.
pub trait PayloadGenerator: Send + Sync {
    fn generate(
        &self,
        target: &CallTarget,
        argument_json: &str,
        channel: &ResultChannel,
    ) -> Result<String>;
}

const PYTHON_TEMPLATE: &str = r#"import asyncio
import inspect
import json
import os
import sys

__SEARCH_PATH__
from __MODULE__ import __FUNCTION__ as _remote_target
__INPUT_IMPORT__

_ARGUMENT = __ARGUMENT__
_CHANNEL_KIND = "__CHANNEL_KIND__"
_CHANNEL_ENV = "__CHANNEL_ENV__"
_FAILURE_ENVELOPE = __FAILURE_ENVELOPE__


def _write_channel(document):
    location = os.environ.get(_CHANNEL_ENV)
    if not location:
        raise RuntimeError(_CHANNEL_ENV + " is not set")
    if _CHANNEL_KIND == "descriptor":
        with os.fdopen(os.dup(int(location)), "w") as channel:
            channel.write(document)
    else:
        with open(location, "w") as channel:
            channel.write(document)


def _encode(value):
    if hasattr(value, "model_dump_json"):
        return value.model_dump_json()
    return json.dumps(value)


async def _main():
    argument = __DECODE_ARGUMENT__
    result = _remote_target(argument)
    if inspect.isawaitable(result):
        result = await result
    _write_channel(_encode(result))


if __name__ == "__main__":
    try:
        asyncio.run(_main())
    except BaseException as error:
        try:
            failure = json.loads(_FAILURE_ENVELOPE)
            failure["error_type"] = type(error).__name__
            failure["error_message"] = str(error)
            _write_channel(json.dumps(failure))
        finally:
            print("remote execution failed: " + repr(error), file=sys.stderr)
            sys.exit(1)
"#;

/// Generates a Python entrypoint that imports and awaits the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct PythonCall;

impl PayloadGenerator for PythonCall {
    fn generate(
        &self,
        target: &CallTarget,
        argument_json: &str,
        channel: &ResultChannel,
    ) -> Result<String> {
        check_identifier_path(&target.module)?;
        check_identifier_path(&target.function)?;

        let (input_import, decode) = match &target.input_model {
            Some((module, name)) => {
                check_identifier_path(module)?;
                check_identifier_path(name)?;
                (
                    format!("from {module} import {name} as _RemoteInput"),
                    "_RemoteInput.model_validate_json(_ARGUMENT)",
                )
            }
            None => (String::new(), "json.loads(_ARGUMENT)"),
        };

        let search_path = match &target.search_path {
            Some(path) => format!("sys.path.insert(0, {})", python_string(path)?),
            None => String::new(),
        };

        let channel_kind = match channel {
            ResultChannel::InheritedDescriptor => "descriptor",
            ResultChannel::SharedFile(_) => "file",
        };

        let failure_envelope = python_string(&FailureEnvelope::new("", "").to_json())?;
        let argument = python_string(argument_json)?;

        Ok(fill(
            PYTHON_TEMPLATE,
            &[
                ("__SEARCH_PATH__", &search_path),
                ("__MODULE__", &target.module),
                ("__FUNCTION__", &target.function),
                ("__INPUT_IMPORT__", &input_import),
                ("__DECODE_ARGUMENT__", decode),
                ("__CHANNEL_KIND__", channel_kind),
                ("__CHANNEL_ENV__", channel.env_var()),
                ("__FAILURE_ENVELOPE__", &failure_envelope),
                ("__ARGUMENT__", &argument),
            ],
        ))
    }
}

/// Replace placeholders in one left-to-right pass. Substituted text is never
/// rescanned, so values may contain placeholder-like tokens.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    'scan: while let Some(ch) = rest.chars().next() {
        for (placeholder, value) in values {
            if let Some(after) = rest.strip_prefix(placeholder) {
                out.push_str(value);
                rest = after;
                continue 'scan;
            }
        }
        out.push(ch);
        rest = rest.get(ch.len_utf8()..).unwrap_or_default();
    }
    out
}

/// Encode `value` as a Python string literal. JSON string syntax is a
/// subset of Python's.
fn python_string(value: &str) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| RemoteError::Configuration(format!("encode string literal: {e}")))
}

fn check_identifier_path(path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && path.split('.').all(|part| {
            let mut chars = part.chars();
            chars
                .next()
                .is_some_and(|c| c.is_alphabetic() || c == '_')
                && chars.all(|c| c.is_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(RemoteError::Configuration(format!(
            "invalid import path: {path:?}"
        )))
    }
}
