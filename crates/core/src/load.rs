//! Loading and running chunks

use crate::call::{error_text, pcall};
use crate::codec::{pop, Extract};
use crate::error::{Error, Result};
use crate::state::State;
use mlua::ffi;
use std::ffi::{c_int, CString};
use std::path::Path;
use tracing::debug;

/// Compile `source` and run it, leaving `nresults` results on the stack.
///
/// `name` is the chunk name shown in messages and tracebacks.
pub fn do_buffer(state: State<'_>, source: &[u8], nresults: c_int, name: &str) -> Result<()> {
    let chunk_name = CString::new(name.replace('\0', "")).unwrap_or_default();
    state.reserve(2);
    let status = unsafe {
        ffi::luaL_loadbufferx(
            state.as_ptr(),
            source.as_ptr().cast(),
            source.len(),
            chunk_name.as_ptr(),
            std::ptr::null(),
        )
    };
    if status != ffi::LUA_OK {
        let message = error_text(state, -1);
        state.pop(1);
        debug!(chunk = name, status, %message, "load failed");
        return Err(match status {
            ffi::LUA_ERRMEM => Error::Memory(message),
            _ => Error::Syntax(message),
        });
    }
    pcall(state, 0, nresults)
}

pub fn do_string(state: State<'_>, source: &str, nresults: c_int, name: &str) -> Result<()> {
    do_buffer(state, source.as_bytes(), nresults, name)
}

/// Read the script at `path` and run it
pub fn do_file(state: State<'_>, path: &Path, nresults: c_int, name: &str) -> Result<()> {
    let source = std::fs::read(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    do_buffer(state, &source, nresults, name)
}

/// Run `source` as an expression chunk and extract its single result
pub fn eval<T: Extract>(state: State<'_>, source: &str, name: &str) -> Result<T> {
    do_string(state, source, 1, name)?;
    pop::<T>(state)
}
