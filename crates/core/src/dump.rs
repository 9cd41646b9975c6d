//! Human-readable rendering of stack values
//!
//! # Format
//!
//! - nil, booleans: `nil`, `true`, `false`
//! - numbers: `42`, `2.5` (a float within 1e-6 of an integer prints as that
//!   integer)
//! - strings: `"hello\n"` (escaped)
//! - tables: `{ 1, 2, key=value }`, sequence part first, then string keys
//!   in sorted order; `{...}` past the depth limit
//! - functions: `[&]`, userdata: `[# <tostring>]`, threads: `[thread]`,
//!   light userdata: `(*0x...)`

use crate::call::pcall;
use crate::error::Result;
use crate::field::push_global;
use crate::iter::{ipairs, spairs};
use crate::state::{Kind, State};
use mlua::ffi;
use std::ffi::c_int;

/// Output options for [`dump`]
#[derive(Debug, Clone)]
pub struct DumpConfig {
    /// Put each keyed entry of a table on its own line
    pub pretty: bool,
    /// Deepest table nesting rendered in full
    pub max_depth: usize,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            pretty: true,
            max_depth: 3,
        }
    }
}

impl DumpConfig {
    /// Single-line output
    pub fn compact() -> Self {
        Self {
            pretty: false,
            ..Self::default()
        }
    }

    pub fn pretty() -> Self {
        Self::default()
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
}

/// Render the value at `index`
pub fn dump(state: State<'_>, index: c_int, config: &DumpConfig) -> Result<String> {
    let mut buf = String::new();
    format_value(state, state.abs_index(index), config, 0, &mut buf)?;
    Ok(buf)
}

fn format_value(
    state: State<'_>,
    index: c_int,
    config: &DumpConfig,
    depth: usize,
    buf: &mut String,
) -> Result<()> {
    let l = state.as_ptr();
    match state.kind(index) {
        Kind::None | Kind::Nil => buf.push_str("nil"),
        Kind::Boolean => {
            let b = unsafe { ffi::lua_toboolean(l, index) } != 0;
            buf.push_str(if b { "true" } else { "false" });
        }
        Kind::Number => format_number(state, index, buf),
        Kind::String => {
            let bytes = state.bytes_at(index).unwrap_or_default();
            format_string(&String::from_utf8_lossy(&bytes), buf);
        }
        Kind::Table => format_table(state, index, config, depth + 1, buf)?,
        Kind::Function => buf.push_str("[&]"),
        Kind::Userdata => {
            buf.push_str("[# ");
            buf.push_str(&to_display_string(state, index)?);
            buf.push(']');
        }
        Kind::Thread => buf.push_str("[thread]"),
        Kind::LightUserdata => {
            let ptr = unsafe { ffi::lua_touserdata(l, index) };
            buf.push_str(&format!("(*{:p})", ptr));
        }
    }
    Ok(())
}

fn format_number(state: State<'_>, index: c_int, buf: &mut String) {
    let l = state.as_ptr();
    if unsafe { ffi::lua_isinteger(l, index) } != 0 {
        let n = unsafe { ffi::lua_tointegerx(l, index, std::ptr::null_mut()) };
        buf.push_str(&n.to_string());
        return;
    }
    let n = unsafe { ffi::lua_tonumberx(l, index, std::ptr::null_mut()) };
    if (n - n.round()).abs() < 1e-6 && n.abs() < i64::MAX as f64 {
        buf.push_str(&(n.round() as i64).to_string());
    } else {
        buf.push_str(&n.to_string());
    }
}

/// Format a string with escaping
fn format_string(s: &str, buf: &mut String) {
    buf.push('"');
    for c in s.chars() {
        match c {
            '"' => buf.push_str("\\\""),
            '\\' => buf.push_str("\\\\"),
            '\n' => buf.push_str("\\n"),
            '\r' => buf.push_str("\\r"),
            '\t' => buf.push_str("\\t"),
            '\0' => buf.push_str("\\0"),
            c if c.is_control() => buf.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c => buf.push(c),
        }
    }
    buf.push('"');
}

fn has_tostring(state: State<'_>, index: c_int) -> bool {
    let l = state.as_ptr();
    state.reserve(2);
    if unsafe { ffi::lua_getmetatable(l, index) } == 0 {
        return false;
    }
    state.push_str("__tostring");
    unsafe { ffi::lua_rawget(l, -2) };
    let found = !state.kind(-1).is_none_or_nil();
    state.pop(2);
    found
}

fn format_table(
    state: State<'_>,
    index: c_int,
    config: &DumpConfig,
    depth: usize,
    buf: &mut String,
) -> Result<()> {
    if has_tostring(state, index) {
        buf.push_str(&to_display_string(state, index)?);
        return Ok(());
    }
    if depth > config.max_depth {
        buf.push_str("{...}");
        return Ok(());
    }

    let mut items = Vec::new();
    ipairs(state, index, |state, _| {
        let mut item = String::new();
        format_value(state, state.top(), config, depth, &mut item)?;
        items.push(item);
        Ok(())
    })?;

    let mut keyed = Vec::new();
    spairs(state, index, |state, key| {
        let mut value = String::new();
        format_value(state, state.top(), config, depth, &mut value)?;
        keyed.push((key.to_string(), value));
        Ok(())
    })?;
    keyed.sort_by(|(a, _), (b, _)| a.cmp(b));

    if items.is_empty() && keyed.is_empty() {
        buf.push_str("{}");
        return Ok(());
    }

    let entries = items
        .into_iter()
        .chain(keyed.iter().map(|(k, v)| format!("{}={}", k, v)));

    if config.pretty && !keyed.is_empty() {
        buf.push_str("{\n");
        let lines: Vec<String> = entries
            .map(|entry| format!("{}{}", indent(depth), entry))
            .collect();
        buf.push_str(&lines.join(",\n"));
        buf.push('\n');
        buf.push_str(&indent(depth - 1));
        buf.push('}');
    } else {
        buf.push_str("{ ");
        buf.push_str(&entries.collect::<Vec<_>>().join(", "));
        buf.push_str(" }");
    }
    Ok(())
}

fn indent(depth: usize) -> String {
    " ".repeat(depth * 2)
}

/// Render the value through the global `tostring`, honoring `__tostring`
pub fn to_display_string(state: State<'_>, index: c_int) -> Result<String> {
    let index = state.abs_index(index);
    state.reserve(2);
    push_global(state, "tostring");
    state.push_value(index);
    pcall(state, 1, 1)?;
    let text = state.bytes_at(-1).unwrap_or_default();
    state.pop(1);
    Ok(String::from_utf8_lossy(&text).into_owned())
}

/// Render every slot, top first, as `"<abs> / <neg>: <value>"` lines
pub fn dump_stack(state: State<'_>, config: &DumpConfig) -> Result<String> {
    let mut out = String::new();
    let top = state.top();
    for (abs, neg) in (1..=top).rev().zip((1..=top).map(|n| -n)) {
        out.push_str(&format!("{} / {}: {}\n", abs, neg, dump(state, abs, config)?));
    }
    Ok(out)
}

/// Write [`dump_stack`] output to stdout
pub fn print_stack(state: State<'_>, config: &DumpConfig) -> Result<()> {
    println!("{}", dump_stack(state, config)?);
    Ok(())
}
