//! Registry references: pin an engine value so host code can hold on to it

use crate::state::{Kind, State};
use mlua::ffi;
use std::ffi::c_int;

/// A value anchored in the engine registry until the reference is dropped
pub struct RegistryRef<'lua> {
    state: State<'lua>,
    key: c_int,
}

impl<'lua> RegistryRef<'lua> {
    /// Pop the top value and anchor it.
    ///
    /// Nil cannot be anchored; the reference then pushes nil back.
    pub fn pop(state: State<'lua>) -> Self {
        let key = unsafe { ffi::luaL_ref(state.as_ptr(), ffi::LUA_REGISTRYINDEX) };
        Self { state, key }
    }

    /// Anchor a copy of the slot at `index`, leaving the stack unchanged
    pub fn new(state: State<'lua>, index: c_int) -> Self {
        state.reserve(1);
        state.push_value(index);
        Self::pop(state)
    }

    /// Push the referenced value
    pub fn push(&self) {
        self.state.reserve(1);
        if self.key == ffi::LUA_REFNIL {
            self.state.push_nil();
        } else {
            unsafe {
                ffi::lua_rawgeti(
                    self.state.as_ptr(),
                    ffi::LUA_REGISTRYINDEX,
                    self.key as ffi::lua_Integer,
                )
            };
        }
    }

    /// Kind of the referenced value
    pub fn kind(&self) -> Kind {
        self.push();
        let kind = self.state.kind(-1);
        self.state.pop(1);
        kind
    }
}

impl Drop for RegistryRef<'_> {
    fn drop(&mut self) {
        unsafe { ffi::luaL_unref(self.state.as_ptr(), ffi::LUA_REGISTRYINDEX, self.key) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{pop, push};
    use crate::load::do_string;
    use crate::state::Engine;

    #[test]
    fn test_ref_survives_stack_reset() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        push(state, "pinned");
        let pinned = RegistryRef::new(state, -1);
        state.set_top(0);

        pinned.push();
        assert_eq!(pop::<String>(state).unwrap(), "pinned");
        assert_eq!(pinned.kind(), Kind::String);
        assert_eq!(state.top(), 0);
    }

    #[test]
    fn test_ref_keeps_table_alive() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        do_string(state, "return { answer = 42 }", 1, "test").unwrap();
        let table = RegistryRef::pop(state);
        assert_eq!(state.top(), 0);

        engine.collect_garbage().unwrap();
        table.push();
        assert_eq!(crate::field::get::<i64>(state, -1, "answer", false).unwrap(), 42);
    }

    #[test]
    fn test_nil_ref() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        state.push_nil();
        let nothing = RegistryRef::pop(state);
        assert_eq!(nothing.kind(), Kind::Nil);
        assert_eq!(state.top(), 0);
    }
}
