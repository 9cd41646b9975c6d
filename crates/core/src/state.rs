//! Engine ownership and the stack handle
//!
//! [`Engine`] owns one `lua_State` for its whole life. [`State`] is the
//! borrowed, copyable handle every marshalling function takes: it carries the
//! raw pointer plus a lifetime tying it to the engine (or to the C callback
//! frame it was created in).
//!
//! Index arguments follow the engine's rules: positive indices count from
//! the bottom of the current frame (1-based), negative ones from the top.

use crate::error::{Error, Result};
use mlua::ffi;
use std::ffi::c_int;
use std::marker::PhantomData;
use std::ptr::NonNull;
use tracing::debug;

/// Strict-globals policy, run when an engine is created with `strict = true`
pub const STRICT_LUA: &str = include_str!("strict.lua");

/// Dynamic kind of a stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// Index past the top of the stack
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl Kind {
    fn from_raw(tp: c_int) -> Self {
        match tp {
            ffi::LUA_TNIL => Kind::Nil,
            ffi::LUA_TBOOLEAN => Kind::Boolean,
            ffi::LUA_TLIGHTUSERDATA => Kind::LightUserdata,
            ffi::LUA_TNUMBER => Kind::Number,
            ffi::LUA_TSTRING => Kind::String,
            ffi::LUA_TTABLE => Kind::Table,
            ffi::LUA_TFUNCTION => Kind::Function,
            ffi::LUA_TUSERDATA => Kind::Userdata,
            ffi::LUA_TTHREAD => Kind::Thread,
            _ => Kind::None,
        }
    }

    /// Engine-facing type name
    pub const fn name(self) -> &'static str {
        match self {
            Kind::None => "no value",
            Kind::Nil => "nil",
            Kind::Boolean => "boolean",
            Kind::LightUserdata => "light userdata",
            Kind::Number => "number",
            Kind::String => "string",
            Kind::Table => "table",
            Kind::Function => "function",
            Kind::Userdata => "userdata",
            Kind::Thread => "thread",
        }
    }

    /// True for nil and for an index past the top
    pub const fn is_none_or_nil(self) -> bool {
        matches!(self, Kind::None | Kind::Nil)
    }
}

/// Borrowed handle on an engine's value stack
#[derive(Clone, Copy)]
pub struct State<'lua> {
    raw: NonNull<ffi::lua_State>,
    _engine: PhantomData<&'lua ffi::lua_State>,
}

impl<'lua> State<'lua> {
    /// Wrap a raw state pointer.
    ///
    /// # Safety
    /// `raw` must be a non-null, open `lua_State` that stays valid for `'lua`
    /// and is not used concurrently from another thread.
    pub unsafe fn from_ptr(raw: *mut ffi::lua_State) -> Self {
        Self {
            raw: unsafe { NonNull::new_unchecked(raw) },
            _engine: PhantomData,
        }
    }

    /// Raw pointer, for calling engine functions the core does not wrap
    pub fn as_ptr(self) -> *mut ffi::lua_State {
        self.raw.as_ptr()
    }

    /// Number of slots in the current frame
    pub fn top(self) -> c_int {
        unsafe { ffi::lua_gettop(self.as_ptr()) }
    }

    pub fn set_top(self, index: c_int) {
        unsafe { ffi::lua_settop(self.as_ptr(), index) }
    }

    /// Remove `n` slots from the top
    pub fn pop(self, n: c_int) {
        unsafe { ffi::lua_settop(self.as_ptr(), -n - 1) }
    }

    /// Convert a relative index into an absolute one
    pub fn abs_index(self, index: c_int) -> c_int {
        unsafe { ffi::lua_absindex(self.as_ptr(), index) }
    }

    /// Push a copy of the slot at `index`
    pub fn push_value(self, index: c_int) {
        unsafe { ffi::lua_pushvalue(self.as_ptr(), index) }
    }

    /// Move the top slot into `index`, shifting the slots above it up
    pub fn insert(self, index: c_int) {
        unsafe { ffi::lua_rotate(self.as_ptr(), index, 1) }
    }

    /// Remove the slot at `index`, shifting the slots above it down
    pub fn remove(self, index: c_int) {
        unsafe {
            ffi::lua_rotate(self.as_ptr(), index, -1);
            ffi::lua_settop(self.as_ptr(), -2);
        }
    }

    pub fn kind(self, index: c_int) -> Kind {
        Kind::from_raw(unsafe { ffi::lua_type(self.as_ptr(), index) })
    }

    /// Make room for `extra` more slots.
    ///
    /// Panics when the engine cannot grow its stack any further, which only
    /// happens past the engine's hard limit of about a million slots.
    pub fn reserve(self, extra: c_int) {
        if unsafe { ffi::lua_checkstack(self.as_ptr(), extra) } == 0 {
            panic!("Lua stack overflow: cannot reserve {} slots", extra);
        }
    }

    pub fn push_nil(self) {
        unsafe { ffi::lua_pushnil(self.as_ptr()) }
    }

    /// Push a byte string (may contain interior NULs)
    pub fn push_bytes(self, bytes: &[u8]) {
        unsafe {
            ffi::lua_pushlstring(self.as_ptr(), bytes.as_ptr().cast(), bytes.len());
        }
    }

    pub fn push_str(self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    /// Push a new empty table with preallocated array/hash parts
    pub fn new_table(self, narr: usize, nrec: usize) {
        let narr = c_int::try_from(narr).unwrap_or(0);
        let nrec = c_int::try_from(nrec).unwrap_or(0);
        unsafe { ffi::lua_createtable(self.as_ptr(), narr, nrec) }
    }

    /// Push the globals table
    pub fn push_globals(self) {
        unsafe {
            ffi::lua_rawgeti(
                self.as_ptr(),
                ffi::LUA_REGISTRYINDEX,
                ffi::LUA_RIDX_GLOBALS as ffi::lua_Integer,
            );
        }
    }

    /// Raw length of the value at `index` (no `__len`)
    pub fn raw_len(self, index: c_int) -> usize {
        unsafe { ffi::lua_rawlen(self.as_ptr(), index) as usize }
    }

    /// Copy the bytes of the string slot at `index`.
    ///
    /// Returns `None` unless the slot is a string; numbers are not converted
    /// in place, so this is safe to call on a key during traversal.
    pub fn bytes_at(self, index: c_int) -> Option<Vec<u8>> {
        if self.kind(index) != Kind::String {
            return None;
        }
        let mut len = 0usize;
        let ptr = unsafe { ffi::lua_tolstring(self.as_ptr(), index, &mut len) };
        if ptr.is_null() {
            return None;
        }
        let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
        Some(bytes.to_vec())
    }

    /// Read the string slot at `index` as UTF-8 text
    pub fn text_at(self, index: c_int) -> Result<String> {
        let index = self.abs_index(index);
        let bytes = self.bytes_at(index).ok_or(Error::Type {
            expected: "string",
            found: self.kind(index).name(),
            index,
        })?;
        String::from_utf8(bytes).map_err(|_| Error::Utf8 { index })
    }

    /// Raw equality of two slots (no `__eq`)
    pub fn raw_equal(self, a: c_int, b: c_int) -> bool {
        unsafe { ffi::lua_rawequal(self.as_ptr(), a, b) != 0 }
    }
}

/// Restores the stack to the depth it had when the guard was created
pub(crate) struct StackGuard<'lua> {
    state: State<'lua>,
    top: c_int,
}

impl<'lua> StackGuard<'lua> {
    pub(crate) fn new(state: State<'lua>) -> Self {
        Self {
            state,
            top: state.top(),
        }
    }

    /// Guard that restores the stack to `top` instead of the current depth
    pub(crate) fn at(state: State<'lua>, top: c_int) -> Self {
        Self { state, top }
    }

    /// Keep whatever is on the stack now
    pub(crate) fn release(self) {
        std::mem::forget(self);
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.state.set_top(self.top);
    }
}

/// One engine instance: a `lua_State` with the standard libraries open
pub struct Engine {
    raw: NonNull<ffi::lua_State>,
}

// The engine has no thread affinity; callers serialize access (see `luaw::Lua`).
// Host values it owns are `Send` (`push_new_userdata` requires it).
unsafe impl Send for Engine {}

impl Engine {
    /// Create an engine, optionally installing the strict-globals policy
    pub fn new(strict: bool) -> Result<Self> {
        let raw = NonNull::new(unsafe { ffi::luaL_newstate() })
            .ok_or_else(|| Error::Memory("could not allocate Lua state".to_string()))?;
        unsafe { ffi::luaL_openlibs(raw.as_ptr()) };
        let engine = Engine { raw };

        if strict {
            crate::load::do_string(engine.state(), STRICT_LUA, 0, "strict.lua")?;
        }
        debug!(strict, "engine created");
        Ok(engine)
    }

    pub fn state(&self) -> State<'_> {
        unsafe { State::from_ptr(self.raw.as_ptr()) }
    }

    /// Run a full collection cycle, finalizing unreachable userdata
    pub fn collect_garbage(&self) -> Result<()> {
        crate::load::do_string(self.state(), "collectgarbage('collect')", 0, "=gc")
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        debug!("closing engine");
        unsafe { ffi::lua_close(self.raw.as_ptr()) }
    }
}

/// Fail unless the stack holds exactly `expected` slots
pub fn ensure(state: State<'_>, expected: c_int) -> Result<()> {
    let found = state.top();
    if found != expected {
        return Err(Error::StackSize { expected, found });
    }
    Ok(())
}

/// Raw length of the table or string at `index`
pub fn len(state: State<'_>, index: c_int) -> usize {
    state.raw_len(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_starts_empty() {
        let engine = Engine::new(false).unwrap();
        assert_eq!(engine.state().top(), 0);
        assert!(ensure(engine.state(), 0).is_ok());
    }

    #[test]
    fn test_ensure_reports_mismatch() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        state.push_nil();
        state.push_nil();
        match ensure(state, 1) {
            Err(Error::StackSize { expected, found }) => {
                assert_eq!(expected, 1);
                assert_eq!(found, 2);
            }
            other => panic!("Expected StackSize, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_of_slots() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        state.push_nil();
        state.push_str("hi");
        state.new_table(0, 0);
        assert_eq!(state.kind(1), Kind::Nil);
        assert_eq!(state.kind(2), Kind::String);
        assert_eq!(state.kind(-1), Kind::Table);
        assert_eq!(state.kind(10), Kind::None);
        assert!(state.kind(10).is_none_or_nil());
    }

    #[test]
    fn test_insert_and_remove() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        state.push_str("a");
        state.push_str("b");
        state.push_str("c");
        state.insert(1);
        assert_eq!(state.text_at(1).unwrap(), "c");
        state.remove(1);
        assert_eq!(state.text_at(1).unwrap(), "a");
        assert_eq!(state.top(), 2);
    }

    #[test]
    fn test_stack_guard_restores_depth() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        {
            let _guard = StackGuard::new(state);
            state.push_nil();
            state.push_nil();
        }
        assert_eq!(state.top(), 0);

        let guard = StackGuard::new(state);
        state.push_nil();
        guard.release();
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_strict_engine_loads() {
        let engine = Engine::new(true).unwrap();
        assert_eq!(engine.state().top(), 0);
    }
}
