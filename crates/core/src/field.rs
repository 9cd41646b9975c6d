//! Field access on tables, by single name or dotted path
//!
//! Lookups and assignments are raw. In qualified mode `path` is split on
//! `.` and every segment but the last must resolve to a table. Each accessor
//! leaves the stack at its entry depth on failure; `get_field` adds exactly
//! one slot on success and `set_field` consumes the value it stores.

use crate::classify::Category;
use crate::codec::{expect_table, Extract, Push};
use crate::error::{Error, Result};
use crate::state::{Kind, State, StackGuard};
use mlua::ffi;
use std::ffi::c_int;

fn missing(path: &str) -> Error {
    Error::MissingField {
        path: path.to_string(),
    }
}

fn segments(path: &str, qualified: bool) -> Vec<&str> {
    if qualified {
        path.split('.').collect()
    } else {
        vec![path]
    }
}

/// Push `table[segment]` in place of the table on top
fn step(state: State<'_>, segment: &str) {
    state.push_str(segment);
    unsafe { ffi::lua_rawget(state.as_ptr(), -2) };
    state.remove(-2);
}

/// Push the value at `path` inside the table at `index`.
///
/// A nil terminal value is pushed as nil; a nil or non-table value before
/// the terminal segment is a missing field.
pub fn get_field(state: State<'_>, index: c_int, path: &str, qualified: bool) -> Result<()> {
    let index = state.abs_index(index);
    expect_table(state, index, "table")?;

    let guard = StackGuard::new(state);
    state.reserve(3);
    state.push_value(index);
    let segments = segments(path, qualified);
    let last = segments.len() - 1;
    for (i, segment) in segments.into_iter().enumerate() {
        step(state, segment);
        if i < last && state.kind(-1) != Kind::Table {
            return Err(missing(path));
        }
    }
    guard.release();
    Ok(())
}

/// Whether `path` resolves to a non-nil value
pub fn has_field(state: State<'_>, index: c_int, path: &str, qualified: bool) -> bool {
    match get_field(state, index, path, qualified) {
        Ok(()) => {
            let present = !state.kind(-1).is_none_or_nil();
            state.pop(1);
            present
        }
        Err(_) => false,
    }
}

/// Store the value on top of the stack at `path` inside the table at `index`.
///
/// Intermediate tables must already exist. The value is consumed whether or
/// not the assignment succeeds.
pub fn set_field(state: State<'_>, index: c_int, path: &str, qualified: bool) -> Result<()> {
    let index = state.abs_index(index);
    let value = state.top();
    let _guard = StackGuard::at(state, value - 1);
    expect_table(state, index, "table")?;

    let segments = segments(path, qualified);
    let Some((terminal, parents)) = segments.split_last() else {
        return Err(missing(path));
    };

    state.reserve(3);
    state.push_value(index);
    for segment in parents {
        step(state, segment);
        if state.kind(-1) != Kind::Table {
            return Err(missing(path));
        }
    }
    state.push_str(terminal);
    state.push_value(value);
    unsafe { ffi::lua_rawset(state.as_ptr(), -3) };
    Ok(())
}

/// Read `path` as `T`.
///
/// A nil or missing field is an error unless `T` is an `Option`, which
/// yields `None` instead.
pub fn get<T: Extract>(state: State<'_>, index: c_int, path: &str, qualified: bool) -> Result<T> {
    let _guard = StackGuard::new(state);
    let optional = T::CATEGORY == Category::Optional;
    match get_field(state, index, path, qualified) {
        Ok(()) => {}
        Err(Error::MissingField { .. }) if optional => {
            state.push_nil();
        }
        Err(err) => return Err(err),
    }
    if !optional && state.kind(-1).is_none_or_nil() {
        return Err(missing(path));
    }
    T::to(state, -1)
}

/// Write `value` at `path`
pub fn set<T: Push + ?Sized>(
    state: State<'_>,
    index: c_int,
    path: &str,
    value: &T,
    qualified: bool,
) -> Result<()> {
    let index = state.abs_index(index);
    value.push(state);
    set_field(state, index, path, qualified)
}

/// Push the global `name`, bypassing any metamethods on the globals table
pub fn push_global(state: State<'_>, name: &str) {
    state.reserve(2);
    state.push_globals();
    step(state, name);
}

pub fn get_global<T: Extract>(state: State<'_>, name: &str) -> Result<T> {
    let _guard = StackGuard::new(state);
    state.reserve(1);
    state.push_globals();
    get(state, -1, name, false)
}

pub fn set_global<T: Push + ?Sized>(state: State<'_>, name: &str, value: &T) -> Result<()> {
    let _guard = StackGuard::new(state);
    state.reserve(1);
    state.push_globals();
    set(state, -1, name, value, false)
}
