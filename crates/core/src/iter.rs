//! Table traversal
//!
//! Each helper first pushes a copy of the table so the callback may push and
//! pop freely without disturbing the traversal. After every callback the
//! stack is trimmed back to the depth it had before the callback ran, and
//! the copy is dropped on every exit path, including an error returned by
//! the callback.
//!
//! All access is raw: `__index`, `__len` and `__pairs` are never consulted.

use crate::error::Result;
use crate::state::{State, StackGuard};
use mlua::ffi;
use std::ffi::c_int;

/// Walk the sequence part `1..=len`.
///
/// The callback sees the current value at -1 and its 1-based position.
pub fn ipairs<'lua, F>(state: State<'lua>, index: c_int, mut f: F) -> Result<()>
where
    F: FnMut(State<'lua>, i64) -> Result<()>,
{
    let len = state.raw_len(index) as i64;
    let guard = StackGuard::new(state);
    state.reserve(3);
    state.push_value(index);

    for i in 1..=len {
        unsafe { ffi::lua_rawgeti(state.as_ptr(), -1, i) };
        let entry_top = state.top();
        f(state, i)?;
        state.set_top(entry_top);
        state.pop(1);
    }

    drop(guard);
    Ok(())
}

/// Walk every entry whose key is a string.
///
/// The callback sees the value at -1 and the key at -2; entries with any
/// other key kind are skipped. Keys that are not valid UTF-8 are passed
/// lossily.
pub fn spairs<'lua, F>(state: State<'lua>, index: c_int, mut f: F) -> Result<()>
where
    F: FnMut(State<'lua>, &str) -> Result<()>,
{
    pairs(state, index, |state| {
        match state.bytes_at(-2) {
            // invalid UTF-8 is replaced, not skipped
            Some(key) => f(state, &String::from_utf8_lossy(&key)),
            None => Ok(()),
        }
    })
}

/// Walk every entry, array part and hash part together.
///
/// The callback sees the key at -2 and the value at -1. Order follows the
/// engine's own traversal and is unspecified.
pub fn pairs<'lua, F>(state: State<'lua>, index: c_int, mut f: F) -> Result<()>
where
    F: FnMut(State<'lua>) -> Result<()>,
{
    let guard = StackGuard::new(state);
    state.reserve(4);
    state.push_value(index);
    state.push_nil();

    while unsafe { ffi::lua_next(state.as_ptr(), -2) } != 0 {
        let entry_top = state.top();
        f(state)?;
        state.set_top(entry_top);
        state.pop(1);
    }

    drop(guard);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load::do_string;
    use crate::state::{Engine, Kind};

    fn table(engine: &Engine, src: &str) {
        do_string(engine.state(), &format!("return {}", src), 1, "test").unwrap();
    }

    #[test]
    fn test_ipairs_in_order() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        table(&engine, "{ 10, 20, 30, x = 1 }");

        let mut seen = Vec::new();
        ipairs(state, -1, |state, i| {
            seen.push((i, crate::codec::to::<i64>(state, -1)?));
            Ok(())
        })
        .unwrap();

        assert_eq!(seen, vec![(1, 10), (2, 20), (3, 30)]);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_spairs_skips_non_text_keys() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        table(&engine, "{ 1, 2, a = 'x', b = 'y', [true] = 3 }");

        let mut keys = Vec::new();
        spairs(state, 1, |_, key| {
            keys.push(key.to_string());
            Ok(())
        })
        .unwrap();

        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_spairs_passes_invalid_utf8_keys_lossily() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        table(&engine, "{ ['bad\\255key'] = 1, good = 2 }");

        let mut keys = Vec::new();
        spairs(state, 1, |_, key| {
            keys.push(key.to_string());
            Ok(())
        })
        .unwrap();

        keys.sort();
        assert_eq!(keys, vec!["bad\u{FFFD}key".to_string(), "good".to_string()]);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_pairs_sees_every_entry() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        table(&engine, "{ 1, 2, a = 3 }");

        let mut count = 0;
        pairs(state, -1, |state| {
            assert_ne!(state.kind(-2), Kind::Nil);
            count += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 3);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_callback_error_restores_stack() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        table(&engine, "{ 1, 2, 3 }");

        let result = ipairs(state, -1, |state, i| {
            state.push_str("noise");
            if i == 2 {
                return Err(crate::error::Error::MissingField {
                    path: "stop".to_string(),
                });
            }
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_callback_leftovers_are_trimmed() {
        let engine = Engine::new(false).unwrap();
        let state = engine.state();
        table(&engine, "{ a = 1, b = 2, c = 3 }");

        let mut count = 0;
        pairs(state, -1, |state| {
            state.push_str("left behind");
            count += 1;
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 3);
        assert_eq!(state.top(), 1);
    }
}
