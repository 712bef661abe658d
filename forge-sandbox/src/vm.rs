//! Restricted Lua VM construction and synchronous invocation.
//!
//! Everything here blocks; callers run it on `spawn_blocking`.

use std::borrow::Cow;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use mlua::{
    Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, SerializeOptions, StdLib,
    Value as LuaValue, Variadic, VmState,
};
use serde_json::Value;
use tracing::debug;

use crate::error::{SandboxError, SandboxResult};
use crate::limits::SandboxLimits;
use crate::pattern;
use crate::watchdog::Watchdog;

const MAX_LOG_LINES: usize = 256;
const MAX_LOG_LINE_LEN: usize = 2_000;

/// Base-library entries a handler may not see.
const REMOVED_GLOBALS: &[&str] = &[
    "load",
    "loadfile",
    "dofile",
    "collectgarbage",
    "setmetatable",
    "getmetatable",
    "rawset",
    "rawget",
    "rawequal",
    "rawlen",
    "print",
    "require",
];

const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Rebinds `pcall` and `xpcall` so a caught error is raised again once the
/// watchdog has fired.
const PROTECTED_CALLS: &str = r#"
local expired, raw_pcall, raw_xpcall, raise = ...
local function settle(ok, ...)
  if not ok and expired() then
    raise((...), 0)
  end
  return ok, ...
end
pcall = function(f, ...) return settle(raw_pcall(f, ...)) end
xpcall = function(f, handler, ...) return settle(raw_xpcall(f, handler, ...)) end
"#;

/// Result of one handler call together with its captured log lines.
pub(crate) struct Invocation {
    pub(crate) result: SandboxResult<Value>,
    pub(crate) logs: Vec<String>,
}

/// Compiles `code` in a fresh VM and checks that it yields a function.
pub(crate) fn compile_check(
    tool_name: &str,
    code: &str,
    limits: &SandboxLimits,
    timeout: Duration,
) -> SandboxResult<()> {
    let session = VmSession::new(tool_name, limits, timeout)?;
    session.compile(code).map(|_| ())
}

/// Compiles `code` in a fresh VM and calls the handler with `args`.
pub(crate) fn invoke(
    tool_name: &str,
    code: &str,
    args: &Value,
    now: &str,
    limits: &SandboxLimits,
    timeout: Duration,
) -> Invocation {
    let session = match VmSession::new(tool_name, limits, timeout) {
        Ok(session) => session,
        Err(err) => {
            return Invocation {
                result: Err(err),
                logs: Vec::new(),
            };
        }
    };

    let result = session
        .compile(code)
        .and_then(|handler| session.call(&handler, args, now));
    Invocation {
        result,
        logs: session.into_logs(),
    }
}

struct VmSession {
    lua: Lua,
    tool_name: String,
    watchdog: Watchdog,
    logs: Arc<Mutex<Vec<String>>>,
    timeout: Duration,
}

impl VmSession {
    fn new(tool_name: &str, limits: &SandboxLimits, timeout: Duration) -> SandboxResult<Self> {
        let setup = |err: mlua::Error| SandboxError::internal(format!("vm setup failed: {err}"));

        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            LuaOptions::default(),
        )
        .map_err(setup)?;
        let logs = Arc::new(Mutex::new(Vec::new()));

        let watchdog = Watchdog::new(timeout);

        restrict_globals(&lua).map_err(setup)?;
        install_utilities(&lua, tool_name, &logs).map_err(setup)?;
        pattern::install(&lua, &watchdog).map_err(setup)?;
        protect_calls(&lua, &watchdog).map_err(setup)?;
        lua.set_memory_limit(limits.memory_limit).map_err(setup)?;

        let hook = watchdog.clone();
        lua.set_hook(
            HookTriggers::new().every_nth_instruction(limits.watchdog_interval),
            move |_lua, _debug| hook.check().map(|()| VmState::Continue),
        );

        Ok(Self {
            lua,
            tool_name: tool_name.to_owned(),
            watchdog,
            logs,
            timeout,
        })
    }

    fn compile(&self, code: &str) -> SandboxResult<Function> {
        let source = normalize_source(code);
        let chunk = self
            .lua
            .load(source.as_ref())
            .set_name(format!("={}", self.tool_name))
            .into_function()
            .map_err(|err| SandboxError::Compile {
                reason: err.to_string(),
            })?;

        let value: LuaValue = chunk.call(()).map_err(|err| match self.classify(err) {
            SandboxError::Runtime { reason } => SandboxError::Compile { reason },
            other => other,
        })?;

        match value {
            LuaValue::Function(handler) => Ok(handler),
            other => Err(SandboxError::Compile {
                reason: format!(
                    "handler source must evaluate to a function, got {}",
                    other.type_name()
                ),
            }),
        }
    }

    fn call(&self, handler: &Function, args: &Value, now: &str) -> SandboxResult<Value> {
        let internal = |err: mlua::Error| SandboxError::internal(err.to_string());

        let args = self
            .lua
            .to_value_with(args, serialize_options())
            .map_err(internal)?;
        let ctx = self.lua.create_table().map_err(internal)?;
        ctx.set("tool_name", self.tool_name.as_str())
            .map_err(internal)?;
        ctx.set("now", now).map_err(internal)?;

        let result: LuaValue = handler
            .call((args, ctx))
            .map_err(|err| self.classify(err))?;

        self.lua
            .from_value(result)
            .map_err(|err| SandboxError::InvalidOutput {
                reason: format!("result is not JSON-representable: {err}"),
            })
    }

    fn classify(&self, err: mlua::Error) -> SandboxError {
        if self.watchdog.expired() {
            return SandboxError::Timeout {
                timeout_ms: duration_ms(self.timeout),
            };
        }
        if matches!(err, mlua::Error::MemoryError(_)) {
            return SandboxError::Runtime {
                reason: "memory limit exceeded".to_owned(),
            };
        }
        SandboxError::Runtime {
            reason: err.to_string(),
        }
    }

    fn into_logs(self) -> Vec<String> {
        let Self { lua, logs, .. } = self;
        drop(lua);
        match Arc::try_unwrap(logs) {
            Ok(lines) => lines.into_inner().unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(shared) => shared
                .lock()
                .map(|lines| lines.clone())
                .unwrap_or_default(),
        }
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn serialize_options() -> SerializeOptions {
    SerializeOptions::new()
        .serialize_none_to_null(false)
        .serialize_unit_to_null(false)
}

/// Accepts `function(args, ctx) ... end` and `function name(...) ... end` in
/// addition to a chunk that returns the function.
fn normalize_source(code: &str) -> Cow<'_, str> {
    let trimmed = code.trim();
    let Some(rest) = trimmed.strip_prefix("function") else {
        return Cow::Borrowed(code);
    };
    match rest.chars().next() {
        Some('(') => return Cow::Owned(format!("return {trimmed}")),
        Some(ch) if ch.is_whitespace() => {}
        _ => return Cow::Borrowed(code),
    }

    let rest = rest.trim_start();
    if rest.starts_with('(') {
        return Cow::Owned(format!("return {trimmed}"));
    }
    let ident: String = rest
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .collect();
    if ident.is_empty() {
        Cow::Borrowed(code)
    } else {
        Cow::Owned(format!("local {ident}\n{trimmed}\nreturn {ident}"))
    }
}

fn restrict_globals(lua: &Lua) -> mlua::Result<()> {
    let globals = lua.globals();
    for name in REMOVED_GLOBALS {
        globals.set(*name, LuaValue::Nil)?;
    }
    let string: mlua::Table = globals.get("string")?;
    string.set("dump", LuaValue::Nil)?;
    Ok(())
}

fn protect_calls(lua: &Lua, watchdog: &Watchdog) -> mlua::Result<()> {
    let globals = lua.globals();
    let flag = watchdog.clone();
    let expired = lua.create_function(move |_, ()| Ok(flag.expired()))?;
    let pcall: Function = globals.get("pcall")?;
    let xpcall: Function = globals.get("xpcall")?;
    let raise: Function = globals.get("error")?;
    lua.load(PROTECTED_CALLS)
        .set_name("=sandbox")
        .call::<()>((expired, pcall, xpcall, raise))
}

fn install_utilities(lua: &Lua, tool_name: &str, logs: &Arc<Mutex<Vec<String>>>) -> mlua::Result<()> {
    let globals = lua.globals();

    let json = lua.create_table()?;
    json.set(
        "encode",
        lua.create_function(|lua, value: LuaValue| {
            let value: Value = lua.from_value(value)?;
            serde_json::to_string(&value).map_err(mlua::Error::external)
        })?,
    )?;
    json.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let value: Value = serde_json::from_str(&text).map_err(mlua::Error::external)?;
            lua.to_value_with(&value, serialize_options())
        })?,
    )?;
    globals.set("json", json)?;

    let base64 = lua.create_table()?;
    base64.set(
        "encode",
        lua.create_function(|_, data: mlua::String| Ok(STANDARD.encode(&*data.as_bytes())))?,
    )?;
    base64.set(
        "decode",
        lua.create_function(|lua, text: String| {
            let bytes = STANDARD
                .decode(text.trim())
                .map_err(mlua::Error::external)?;
            lua.create_string(&bytes)
        })?,
    )?;
    globals.set("base64", base64)?;

    let log = lua.create_table()?;
    for level in LOG_LEVELS {
        let sink = Arc::clone(logs);
        let tool = tool_name.to_owned();
        log.set(
            level,
            lua.create_function(move |lua, parts: Variadic<LuaValue>| {
                let message = parts
                    .iter()
                    .map(|part| render(lua, part))
                    .collect::<Vec<_>>()
                    .join(" ");
                debug!(tool = %tool, level, "handler log: {message}");
                let mut lines = sink
                    .lock()
                    .map_err(|_| mlua::Error::RuntimeError("log sink poisoned".to_owned()))?;
                if lines.len() < MAX_LOG_LINES {
                    let message: String = message.chars().take(MAX_LOG_LINE_LEN).collect();
                    lines.push(format!("[{level}] {message}"));
                }
                Ok(())
            })?,
        )?;
    }
    globals.set("log", log)?;

    Ok(())
}

fn render(lua: &Lua, value: &LuaValue) -> String {
    match value {
        LuaValue::Nil => "nil".to_owned(),
        LuaValue::Boolean(flag) => flag.to_string(),
        LuaValue::Integer(number) => number.to_string(),
        LuaValue::Number(number) => number.to_string(),
        LuaValue::String(text) => String::from(text.to_string_lossy()),
        LuaValue::Table(_) => lua
            .from_value::<Value>(value.clone())
            .map_or_else(|_| "table".to_owned(), |json| json.to_string()),
        other => other.type_name().to_owned(),
    }
}
