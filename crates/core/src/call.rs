//! Protected calls
//!
//! Every call from host code into the engine goes through [`pcall`]. A
//! message handler sits below the callable while it runs and turns the error
//! into `message + traceback` before the engine unwinds the frame, so the
//! traceback still shows where the error was raised.

use crate::codec::{pop, Extract, Push};
use crate::error::{Error, Result};
use crate::field;
use crate::state::{Kind, State};
use mlua::ffi;
use std::ffi::c_int;
use tracing::debug;

/// Request every result the callable returns
pub const MULTRET: c_int = ffi::LUA_MULTRET;

/// Describe the error object at `index` as text
pub(crate) fn error_text(state: State<'_>, index: c_int) -> String {
    match state.kind(index) {
        Kind::String => String::from_utf8_lossy(&state.bytes_at(index).unwrap_or_default())
            .into_owned(),
        Kind::Number => unsafe {
            let l = state.as_ptr();
            if ffi::lua_isinteger(l, index) != 0 {
                ffi::lua_tointegerx(l, index, std::ptr::null_mut()).to_string()
            } else {
                ffi::lua_tonumberx(l, index, std::ptr::null_mut()).to_string()
            }
        },
        kind => format!("(error object is a {} value)", kind.name()),
    }
}

unsafe extern "C-unwind" fn message_handler(l: *mut ffi::lua_State) -> c_int {
    let state = unsafe { State::from_ptr(l) };
    let message = error_text(state, 1);
    state.push_str(&message);
    // Lua strings are NUL-terminated
    let text = unsafe { ffi::lua_tolstring(l, -1, std::ptr::null_mut()) };
    unsafe { ffi::luaL_traceback(l, l, text, 1) };
    1
}

/// Call the callable sitting below `nargs` arguments on the stack.
///
/// On success `nresults` results replace the callable and its arguments
/// (all of them for [`MULTRET`]). On failure the callable and its arguments
/// are gone and nothing else is left behind.
pub fn pcall(state: State<'_>, nargs: c_int, nresults: c_int) -> Result<()> {
    let base = state.top() - nargs;
    state.reserve(1);
    unsafe { ffi::lua_pushcfunction(state.as_ptr(), message_handler) };
    state.insert(base);

    let status = unsafe { ffi::lua_pcall(state.as_ptr(), nargs, nresults, base) };
    if status == ffi::LUA_OK {
        state.remove(base);
        return Ok(());
    }

    let output = error_text(state, -1);
    state.set_top(base - 1);
    debug!(status, %output, "protected call failed");
    Err(match status {
        ffi::LUA_ERRMEM => Error::Memory(output),
        ffi::LUA_ERRERR => Error::MessageHandler(output),
        _ => Error::runtime(&output),
    })
}

/// Argument list for a call: `()` or a tuple of pushable values
pub trait Args {
    /// Push every argument and return how many were pushed
    fn push_args(&self, state: State<'_>) -> c_int;
}

impl Args for () {
    fn push_args(&self, _state: State<'_>) -> c_int {
        0
    }
}

macro_rules! args_tuple {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: Push),+> Args for ($($name,)+) {
            fn push_args(&self, state: State<'_>) -> c_int {
                state.reserve($len);
                $( self.$idx.push(state); )+
                $len
            }
        }
    };
}

args_tuple!(1; A 0);
args_tuple!(2; A 0, B 1);
args_tuple!(3; A 0, B 1, C 2);
args_tuple!(4; A 0, B 1, C 2, D 3);
args_tuple!(5; A 0, B 1, C 2, D 3, E 4);
args_tuple!(6; A 0, B 1, C 2, D 3, E 4, F 5);
args_tuple!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
args_tuple!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

/// Call the callable on top of the stack and extract one result
pub fn call<R: Extract>(state: State<'_>, args: impl Args) -> Result<R> {
    let nargs = args.push_args(state);
    pcall(state, nargs, 1)?;
    pop::<R>(state)
}

/// Push the value at `path`, failing if it resolves to nil
fn push_field(state: State<'_>, index: c_int, path: &str) -> Result<()> {
    field::get_field(state, index, path, true)?;
    if state.kind(-1).is_none_or_nil() {
        state.pop(1);
        return Err(Error::MissingField {
            path: path.to_string(),
        });
    }
    Ok(())
}

/// Call a global function and extract one result
pub fn call_global<R: Extract>(state: State<'_>, name: &str, args: impl Args) -> Result<R> {
    field::push_global(state, name);
    call(state, args)
}

/// Call the function at dotted `path` inside the table at `index`
pub fn call_field<R: Extract>(
    state: State<'_>,
    index: c_int,
    path: &str,
    args: impl Args,
) -> Result<R> {
    push_field(state, index, path)?;
    call(state, args)
}

/// Call the callable on top of the stack, leaving its results pushed.
///
/// Returns how many results were left, which is the real count when
/// `nresults` is [`MULTRET`].
pub fn call_push(state: State<'_>, nresults: c_int, args: impl Args) -> Result<c_int> {
    let below = state.top() - 1;
    let nargs = args.push_args(state);
    pcall(state, nargs, nresults)?;
    Ok(state.top() - below)
}

pub fn call_push_global(
    state: State<'_>,
    name: &str,
    nresults: c_int,
    args: impl Args,
) -> Result<c_int> {
    field::push_global(state, name);
    call_push(state, nresults, args)
}

pub fn call_push_field(
    state: State<'_>,
    index: c_int,
    path: &str,
    nresults: c_int,
    args: impl Args,
) -> Result<c_int> {
    push_field(state, index, path)?;
    call_push(state, nresults, args)
}
