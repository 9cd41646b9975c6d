//! Userdata lifecycle and per-type metatables
//!
//! A host value pushed as userdata lives in engine-managed memory inside a
//! [`UserCell`]: the value followed by a liveness flag. The engine's
//! collector runs the `__gc` trampoline, which drops the value once and
//! clears the flag, so a resurrected or re-finalized cell is never dropped
//! twice.
//!
//! Metatables are keyed in the engine registry by
//! [`UserType::mt_identifier`] and created on first use. The registry lives
//! and dies with the engine; entries are never removed individually.

use crate::classify::UserType;
use crate::codec::{kind_error, Extract, Push};
use crate::error::{format_panic_payload, Result};
use crate::state::{Kind, State};
use mlua::ffi;
use std::collections::BTreeMap;
use std::ffi::{c_int, c_void};
use std::mem::{align_of, size_of, ManuallyDrop};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::{self, NonNull};
use tracing::{debug, error, trace};

/// Largest alignment the engine guarantees for userdata blocks
pub const MAX_ALIGN: usize = 8;

/// Field under which a pushed pointer is stored in its wrapper table
pub const PTR_FIELD: &str = "__ptr";

/// Methods to register on a type's metatable, by name
pub type Metatable = BTreeMap<&'static str, ffi::lua_CFunction>;

/// Engine-owned storage for one host value.
///
/// `value` comes first so the userdata address is also the value's address.
#[repr(C)]
struct UserCell<T> {
    value: ManuallyDrop<T>,
    live: bool,
}

/// Registry key of `T`'s metatable
pub fn metatable_key<T: UserType>() -> &'static str {
    T::mt_identifier()
}

/// Whether `T`'s metatable has been created in this engine
pub fn has_metatable<T: UserType>(state: State<'_>) -> bool {
    state.reserve(1);
    state.push_str(T::mt_identifier());
    unsafe { ffi::lua_rawget(state.as_ptr(), ffi::LUA_REGISTRYINDEX) };
    let found = state.kind(-1) == Kind::Table;
    state.pop(1);
    found
}

/// Push `T`'s metatable, creating it on first use.
///
/// A fresh metatable carries `__name` and the `__gc` finalizer.
pub fn push_metatable<T: UserType>(state: State<'_>) {
    let key = T::mt_identifier();
    state.reserve(3);
    state.push_str(key);
    unsafe { ffi::lua_rawget(state.as_ptr(), ffi::LUA_REGISTRYINDEX) };
    if state.kind(-1) == Kind::Table {
        return;
    }
    state.pop(1);

    state.new_table(0, 2);
    state.push_str("__name");
    state.push_str(key);
    unsafe { ffi::lua_rawset(state.as_ptr(), -3) };
    state.push_str("__gc");
    unsafe {
        ffi::lua_pushcfunction(state.as_ptr(), gc_trampoline::<T>);
        ffi::lua_rawset(state.as_ptr(), -3);
    }

    state.push_str(key);
    state.push_value(-2);
    unsafe { ffi::lua_rawset(state.as_ptr(), ffi::LUA_REGISTRYINDEX) };
    debug!(key, "created metatable");
}

/// Register `methods` on `T`'s metatable and return its registry key.
///
/// `__index` points at the metatable itself so the methods are reachable
/// with `obj:method()`. The default finalizer stays unless `methods`
/// supplies its own `__gc`. An existing metatable is updated in place.
pub fn set_metatable<T: UserType>(state: State<'_>, methods: &Metatable) -> &'static str {
    state.reserve(3);
    push_metatable::<T>(state);
    for (name, func) in methods {
        state.push_str(name);
        unsafe {
            ffi::lua_pushcfunction(state.as_ptr(), *func);
            ffi::lua_rawset(state.as_ptr(), -3);
        }
    }
    if !methods.contains_key("__index") {
        state.push_str("__index");
        state.push_value(-2);
        unsafe { ffi::lua_rawset(state.as_ptr(), -3) };
    }
    state.pop(1);
    T::mt_identifier()
}

/// Move `value` into a new userdata with `T`'s metatable, left on the stack.
///
/// The returned pointer stays valid until the engine collects the userdata.
/// The engine may move between threads and its collector drops `value`
/// wherever it happens to run, hence `Send + 'static`:
///
/// ```compile_fail
/// use luaw_core::{Engine, UserType, push_new_userdata};
/// use std::rc::Rc;
///
/// struct Shared(Rc<()>);
/// impl UserType for Shared {}
///
/// let engine = Engine::new(false).unwrap();
/// push_new_userdata(engine.state(), Shared(Rc::new(())));
/// ```
pub fn push_new_userdata<T: UserType + Send + 'static>(
    state: State<'_>,
    value: T,
) -> NonNull<T> {
    const {
        assert!(
            align_of::<UserCell<T>>() <= MAX_ALIGN,
            "type is over-aligned for engine userdata"
        )
    };

    state.reserve(2);
    let raw = unsafe { ffi::lua_newuserdatauv(state.as_ptr(), size_of::<UserCell<T>>(), 0) };
    let cell = raw.cast::<UserCell<T>>();
    unsafe {
        ptr::write(
            cell,
            UserCell {
                value: ManuallyDrop::new(value),
                live: true,
            },
        )
    };
    trace!(key = T::mt_identifier(), ?raw, "allocated userdata");

    push_metatable::<T>(state);
    unsafe { ffi::lua_setmetatable(state.as_ptr(), -2) };
    // `value` is the first field of a repr(C) struct
    unsafe { NonNull::new_unchecked(cell.cast::<T>()) }
}

/// Whether the slot is a full userdata carrying `T`'s metatable
pub fn is_userdata<T: UserType>(state: State<'_>, index: c_int) -> bool {
    if state.kind(index) != Kind::Userdata {
        return false;
    }
    let index = state.abs_index(index);
    state.reserve(2);
    if unsafe { ffi::lua_getmetatable(state.as_ptr(), index) } == 0 {
        return false;
    }
    state.push_str(T::mt_identifier());
    unsafe { ffi::lua_rawget(state.as_ptr(), ffi::LUA_REGISTRYINDEX) };
    let same = state.raw_equal(-1, -2);
    state.pop(2);
    same
}

unsafe extern "C-unwind" fn gc_trampoline<T: UserType>(l: *mut ffi::lua_State) -> c_int {
    let state = unsafe { State::from_ptr(l) };
    // aggregates share the metatable but are tables, not cells
    if !is_userdata::<T>(state, 1) {
        return 0;
    }
    let cell = unsafe { ffi::lua_touserdata(l, 1) }.cast::<UserCell<T>>();
    let cell = unsafe { &mut *cell };
    if !cell.live {
        return 0;
    }
    cell.live = false;
    trace!(key = T::mt_identifier(), "finalizing userdata");

    let dropped = catch_unwind(AssertUnwindSafe(|| unsafe {
        ManuallyDrop::drop(&mut cell.value)
    }));
    if let Err(payload) = dropped {
        error!(
            key = T::mt_identifier(),
            panic = %format_panic_payload(&payload),
            "panic while finalizing userdata"
        );
    }
    0
}

// ============================================================================
// Pointers
// ============================================================================

fn push_pointer<T: UserType>(state: State<'_>, ptr: *const T) -> c_int {
    state.reserve(3);
    state.new_table(0, 1);
    state.push_str(PTR_FIELD);
    unsafe {
        ffi::lua_pushlightuserdata(state.as_ptr(), ptr as *mut c_void);
        ffi::lua_rawset(state.as_ptr(), -3);
    }
    push_metatable::<T>(state);
    unsafe { ffi::lua_setmetatable(state.as_ptr(), -2) };
    1
}

/// Light userdata stored under `__ptr` in the table at `index`
fn wrapped_pointer(state: State<'_>, index: c_int) -> Option<*mut c_void> {
    if state.kind(index) != Kind::Table {
        return None;
    }
    let index = state.abs_index(index);
    state.reserve(2);
    state.push_str(PTR_FIELD);
    unsafe { ffi::lua_rawget(state.as_ptr(), index) };
    let ptr = (state.kind(-1) == Kind::LightUserdata)
        .then(|| unsafe { ffi::lua_touserdata(state.as_ptr(), -1) });
    state.pop(1);
    ptr
}

fn pointer_is<T: UserType>(state: State<'_>, index: c_int) -> bool {
    match state.kind(index) {
        Kind::Userdata => is_userdata::<T>(state, index),
        Kind::Table => wrapped_pointer(state, index).is_some(),
        Kind::LightUserdata => true,
        _ => false,
    }
}

fn pointer_to<T: UserType>(state: State<'_>, index: c_int) -> Result<*mut T> {
    let ptr = match state.kind(index) {
        Kind::Userdata if is_userdata::<T>(state, index) => unsafe {
            ffi::lua_touserdata(state.as_ptr(), index)
        },
        Kind::Table => match wrapped_pointer(state, index) {
            Some(ptr) => ptr,
            None => return Err(kind_error(state, index, "pointer")),
        },
        Kind::LightUserdata => unsafe { ffi::lua_touserdata(state.as_ptr(), index) },
        _ => return Err(kind_error(state, index, "pointer")),
    };
    Ok(ptr.cast::<T>())
}

impl<T: UserType> Push for *mut T {
    fn push(&self, state: State<'_>) -> c_int {
        push_pointer::<T>(state, *self)
    }
}

impl<T: UserType> Push for *const T {
    fn push(&self, state: State<'_>) -> c_int {
        push_pointer::<T>(state, *self)
    }
}

impl<T: UserType> Extract for *mut T {
    fn is(state: State<'_>, index: c_int) -> bool {
        pointer_is::<T>(state, index)
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        pointer_to::<T>(state, index)
    }
}

impl<T: UserType> Extract for *const T {
    fn is(state: State<'_>, index: c_int) -> bool {
        pointer_is::<T>(state, index)
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        pointer_to::<T>(state, index).map(|ptr| ptr.cast_const())
    }
}
