//! Stack codec: push, type-test and extract per category
//!
//! [`Push`] writes a host value as exactly one slot. [`Extract`] tests
//! whether a slot is compatible with a host type (`is`, which never changes
//! the stack) and converts it (`to`). Extraction validates the slot kind and
//! reports mismatches as [`Error::Type`]; nested containers propagate the
//! first failure from their elements.
//!
//! Pointer and userdata impls live in [`crate::userdata`].

use crate::classify::{Aggregate, Classify};
use crate::error::{Error, Result};
use crate::iter::{ipairs, pairs};
use crate::state::{Kind, State};
use mlua::ffi;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::c_int;
use std::hash::{BuildHasher, Hash};
use std::ptr;
use tracing::trace;

/// Host value that can be written onto the stack
pub trait Push: Classify {
    /// Push `self` and return the number of slots written (always 1)
    fn push(&self, state: State<'_>) -> c_int;
}

/// Host value that can be read back from a stack slot
pub trait Extract: Classify + Sized {
    /// Whether the slot at `index` converts to `Self`
    fn is(state: State<'_>, index: c_int) -> bool;

    /// Convert the slot at `index`
    fn to(state: State<'_>, index: c_int) -> Result<Self>;
}

/// Push a host value, returning the number of slots written
pub fn push<T: Push + ?Sized>(state: State<'_>, value: &T) -> c_int {
    value.push(state)
}

/// Test whether the slot at `index` converts to `T`
pub fn is<T: Extract>(state: State<'_>, index: c_int) -> bool {
    T::is(state, index)
}

/// Convert the slot at `index` to `T`
pub fn to<T: Extract>(state: State<'_>, index: c_int) -> Result<T> {
    T::to(state, index)
}

/// Convert the slot at `index`, or return `default` if it is nil or absent
pub fn to_or<T: Extract>(state: State<'_>, index: c_int, default: T) -> Result<T> {
    if state.kind(index).is_none_or_nil() {
        Ok(default)
    } else {
        T::to(state, index)
    }
}

/// Convert the top slot and remove it.
///
/// The slot is removed whether or not the conversion succeeds.
pub fn pop<T: Extract>(state: State<'_>) -> Result<T> {
    let value = T::to(state, -1);
    state.pop(1);
    value
}

pub(crate) fn kind_error(state: State<'_>, index: c_int, expected: &'static str) -> Error {
    let index = state.abs_index(index);
    Error::Type {
        expected,
        found: state.kind(index).name(),
        index,
    }
}

pub(crate) fn expect_table(state: State<'_>, index: c_int, expected: &'static str) -> Result<()> {
    if state.kind(index) != Kind::Table {
        return Err(kind_error(state, index, expected));
    }
    Ok(())
}

// ============================================================================
// Numbers
// ============================================================================

/// Integral value of a number slot.
///
/// Floats count only when they have no fractional part.
fn integral_at(state: State<'_>, index: c_int) -> Option<i128> {
    if state.kind(index) != Kind::Number {
        return None;
    }
    let l = state.as_ptr();
    unsafe {
        if ffi::lua_isinteger(l, index) != 0 {
            return Some(ffi::lua_tointegerx(l, index, ptr::null_mut()) as i128);
        }
        let n = ffi::lua_tonumberx(l, index, ptr::null_mut());
        // i128 covers every integer-valued f64 below 1.7e38
        if n.is_finite() && n.fract() == 0.0 && n.abs() < 1.7e38 {
            Some(n as i128)
        } else {
            None
        }
    }
}

fn range_error(target: &'static str, n: i128) -> Error {
    Error::Conversion {
        target,
        detail: format!("{} is out of range", n),
    }
}

fn integral_or_error(state: State<'_>, index: c_int, target: &'static str) -> Result<i128> {
    if state.kind(index) != Kind::Number {
        return Err(kind_error(state, index, "integer"));
    }
    integral_at(state, index).ok_or_else(|| Error::Conversion {
        target,
        detail: "number has a fractional part".to_string(),
    })
}

/// Whether the number slot at `index` holds the integer subtype
fn is_integer_subtype(state: State<'_>, index: c_int) -> bool {
    state.kind(index) == Kind::Number && unsafe { ffi::lua_isinteger(state.as_ptr(), index) } != 0
}

macro_rules! integer_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Push for $ty {
                fn push(&self, state: State<'_>) -> c_int {
                    // lossless for every type listed below
                    unsafe { ffi::lua_pushinteger(state.as_ptr(), *self as ffi::lua_Integer) };
                    1
                }
            }

            impl Extract for $ty {
                fn is(state: State<'_>, index: c_int) -> bool {
                    integral_at(state, index).is_some_and(|n| <$ty>::try_from(n).is_ok())
                }

                fn to(state: State<'_>, index: c_int) -> Result<Self> {
                    let n = integral_or_error(state, index, stringify!($ty))?;
                    <$ty>::try_from(n).map_err(|_| range_error(stringify!($ty), n))
                }
            }
        )+
    };
}

integer_codec!(i8, i16, i32, i64, isize, u8, u16, u32);

// Engine integers are 64-bit two's complement. Unsigned 64-bit values above
// `i64::MAX` travel as their wrapped bit pattern, so an engine integer reads
// back as the same bits and a negative one is a large unsigned value.
macro_rules! wrapping_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Push for $ty {
                fn push(&self, state: State<'_>) -> c_int {
                    let n = *self as u64 as ffi::lua_Integer;
                    unsafe { ffi::lua_pushinteger(state.as_ptr(), n) };
                    1
                }
            }

            impl Extract for $ty {
                fn is(state: State<'_>, index: c_int) -> bool {
                    state.kind(index) == Kind::Number && Self::to(state, index).is_ok()
                }

                fn to(state: State<'_>, index: c_int) -> Result<Self> {
                    if is_integer_subtype(state, index) {
                        let n = unsafe { ffi::lua_tointegerx(state.as_ptr(), index, ptr::null_mut()) };
                        let bits = n as u64;
                        return <$ty>::try_from(bits)
                            .map_err(|_| range_error(stringify!($ty), i128::from(bits)));
                    }
                    let n = integral_or_error(state, index, stringify!($ty))?;
                    <$ty>::try_from(n).map_err(|_| range_error(stringify!($ty), n))
                }
            }
        )+
    };
}

wrapping_codec!(u64, usize);

macro_rules! float_codec {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Push for $ty {
                fn push(&self, state: State<'_>) -> c_int {
                    unsafe { ffi::lua_pushnumber(state.as_ptr(), f64::from(*self)) };
                    1
                }
            }

            impl Extract for $ty {
                fn is(state: State<'_>, index: c_int) -> bool {
                    state.kind(index) == Kind::Number
                }

                fn to(state: State<'_>, index: c_int) -> Result<Self> {
                    if state.kind(index) != Kind::Number {
                        return Err(kind_error(state, index, "number"));
                    }
                    Ok(unsafe { ffi::lua_tonumberx(state.as_ptr(), index, ptr::null_mut()) } as $ty)
                }
            }
        )+
    };
}

float_codec!(f32, f64);

// ============================================================================
// Booleans, nil and text
// ============================================================================

impl Push for bool {
    fn push(&self, state: State<'_>) -> c_int {
        unsafe { ffi::lua_pushboolean(state.as_ptr(), c_int::from(*self)) };
        1
    }
}

impl Extract for bool {
    fn is(state: State<'_>, index: c_int) -> bool {
        state.kind(index) == Kind::Boolean
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        if state.kind(index) != Kind::Boolean {
            return Err(kind_error(state, index, "boolean"));
        }
        Ok(unsafe { ffi::lua_toboolean(state.as_ptr(), index) } != 0)
    }
}

impl Push for () {
    fn push(&self, state: State<'_>) -> c_int {
        state.push_nil();
        1
    }
}

impl Extract for () {
    fn is(state: State<'_>, index: c_int) -> bool {
        state.kind(index).is_none_or_nil()
    }

    /// Discards whatever the slot holds
    fn to(_state: State<'_>, _index: c_int) -> Result<Self> {
        Ok(())
    }
}

impl Push for str {
    fn push(&self, state: State<'_>) -> c_int {
        state.push_str(self);
        1
    }
}

impl Push for String {
    fn push(&self, state: State<'_>) -> c_int {
        state.push_str(self);
        1
    }
}

impl Extract for String {
    fn is(state: State<'_>, index: c_int) -> bool {
        state.kind(index) == Kind::String
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        state.text_at(index)
    }
}

impl<T: Push + ?Sized> Push for &T {
    fn push(&self, state: State<'_>) -> c_int {
        (**self).push(state)
    }
}

impl Push for ffi::lua_CFunction {
    fn push(&self, state: State<'_>) -> c_int {
        unsafe { ffi::lua_pushcfunction(state.as_ptr(), *self) };
        1
    }
}

// ============================================================================
// Sequences
// ============================================================================

fn push_sequence<'a, T, I>(state: State<'_>, items: I) -> c_int
where
    T: Push + 'a,
    I: ExactSizeIterator<Item = &'a T>,
{
    state.reserve(3);
    state.new_table(items.len(), 0);
    for (i, item) in items.enumerate() {
        item.push(state);
        unsafe { ffi::lua_rawseti(state.as_ptr(), -2, i as ffi::lua_Integer + 1) };
    }
    1
}

fn extract_sequence<T: Extract>(
    state: State<'_>,
    index: c_int,
    mut sink: impl FnMut(T),
) -> Result<()> {
    expect_table(state, index, "sequence")?;
    ipairs(state, index, |state, _| {
        sink(T::to(state, -1)?);
        Ok(())
    })
}

impl<T: Push> Push for [T] {
    fn push(&self, state: State<'_>) -> c_int {
        push_sequence(state, self.iter())
    }
}

impl<T: Push> Push for Vec<T> {
    fn push(&self, state: State<'_>) -> c_int {
        push_sequence(state, self.iter())
    }
}

impl<T: Extract> Extract for Vec<T> {
    fn is(state: State<'_>, index: c_int) -> bool {
        state.kind(index) == Kind::Table
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        let mut items = Vec::with_capacity(state.raw_len(index));
        extract_sequence(state, index, |item| Vec::push(&mut items, item))?;
        Ok(items)
    }
}

impl<T: Push> Push for VecDeque<T> {
    fn push(&self, state: State<'_>) -> c_int {
        push_sequence(state, self.iter())
    }
}

impl<T: Extract> Extract for VecDeque<T> {
    fn is(state: State<'_>, index: c_int) -> bool {
        state.kind(index) == Kind::Table
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        let mut items = VecDeque::with_capacity(state.raw_len(index));
        extract_sequence(state, index, |item| items.push_back(item))?;
        Ok(items)
    }
}

// ============================================================================
// Maps
// ============================================================================

fn push_map<'a, K, V, I>(state: State<'_>, entries: I) -> c_int
where
    K: Push + 'a,
    V: Push + 'a,
    I: ExactSizeIterator<Item = (&'a K, &'a V)>,
{
    state.reserve(4);
    state.new_table(0, entries.len());
    for (key, value) in entries {
        key.push(state);
        if !is_valid_key(state, -1) {
            trace!(kind = state.kind(-1).name(), "skipping map entry with unusable key");
            state.pop(1);
            continue;
        }
        value.push(state);
        unsafe { ffi::lua_rawset(state.as_ptr(), -3) };
    }
    1
}

/// Whether the slot can index a table: neither nil nor NaN
fn is_valid_key(state: State<'_>, index: c_int) -> bool {
    match state.kind(index) {
        Kind::Nil | Kind::None => false,
        Kind::Number => {
            let n = unsafe { ffi::lua_tonumberx(state.as_ptr(), index, ptr::null_mut()) };
            !n.is_nan()
        }
        _ => true,
    }
}

fn map_entries_are<K: Extract, V: Extract>(state: State<'_>, index: c_int) -> bool {
    if state.kind(index) != Kind::Table {
        return false;
    }
    let mut all = true;
    let walked = pairs(state, index, |state| {
        if all && !(K::is(state, -2) && V::is(state, -1)) {
            all = false;
        }
        Ok(())
    });
    all && walked.is_ok()
}

fn extract_map<K: Extract, V: Extract>(
    state: State<'_>,
    index: c_int,
    mut sink: impl FnMut(K, V),
) -> Result<()> {
    expect_table(state, index, "map")?;
    pairs(state, index, |state| {
        let key = K::to(state, -2)?;
        let value = V::to(state, -1)?;
        sink(key, value);
        Ok(())
    })
}

impl<K: Push, V: Push, S> Push for HashMap<K, V, S> {
    fn push(&self, state: State<'_>) -> c_int {
        push_map(state, self.iter())
    }
}

impl<K, V, S> Extract for HashMap<K, V, S>
where
    K: Extract + Eq + Hash,
    V: Extract,
    S: BuildHasher + Default,
{
    fn is(state: State<'_>, index: c_int) -> bool {
        map_entries_are::<K, V>(state, index)
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        let mut map = HashMap::with_hasher(S::default());
        extract_map(state, index, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

impl<K: Push, V: Push> Push for BTreeMap<K, V> {
    fn push(&self, state: State<'_>) -> c_int {
        push_map(state, self.iter())
    }
}

impl<K: Extract + Ord, V: Extract> Extract for BTreeMap<K, V> {
    fn is(state: State<'_>, index: c_int) -> bool {
        map_entries_are::<K, V>(state, index)
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        let mut map = BTreeMap::new();
        extract_map(state, index, |k, v| {
            map.insert(k, v);
        })?;
        Ok(map)
    }
}

// ============================================================================
// Optionals
// ============================================================================

impl<T: Push> Push for Option<T> {
    fn push(&self, state: State<'_>) -> c_int {
        match self {
            Some(value) => value.push(state),
            None => {
                state.push_nil();
                1
            }
        }
    }
}

impl<T: Extract> Extract for Option<T> {
    fn is(state: State<'_>, index: c_int) -> bool {
        state.kind(index).is_none_or_nil() || T::is(state, index)
    }

    fn to(state: State<'_>, index: c_int) -> Result<Self> {
        if state.kind(index).is_none_or_nil() {
            Ok(None)
        } else {
            T::to(state, index).map(Some)
        }
    }
}

// ============================================================================
// Tuples
// ============================================================================

fn element_is<T: Extract>(state: State<'_>, table: c_int, position: ffi::lua_Integer) -> bool {
    unsafe { ffi::lua_rawgeti(state.as_ptr(), table, position) };
    let is = T::is(state, -1);
    state.pop(1);
    is
}

fn element_to<T: Extract>(
    state: State<'_>,
    table: c_int,
    position: ffi::lua_Integer,
) -> Result<T> {
    unsafe { ffi::lua_rawgeti(state.as_ptr(), table, position) };
    pop::<T>(state)
}

macro_rules! tuple_codec {
    ($len:expr; $($name:ident $idx:tt),+) => {
        impl<$($name: Push),+> Push for ($($name,)+) {
            fn push(&self, state: State<'_>) -> c_int {
                state.reserve(3);
                state.new_table($len, 0);
                $(
                    self.$idx.push(state);
                    unsafe { ffi::lua_rawseti(state.as_ptr(), -2, $idx + 1) };
                )+
                1
            }
        }

        impl<$($name: Extract),+> Extract for ($($name,)+) {
            fn is(state: State<'_>, index: c_int) -> bool {
                let index = state.abs_index(index);
                if state.kind(index) != Kind::Table || state.raw_len(index) != $len {
                    return false;
                }
                state.reserve(2);
                $( element_is::<$name>(state, index, $idx + 1) )&&+
            }

            fn to(state: State<'_>, index: c_int) -> Result<Self> {
                let index = state.abs_index(index);
                expect_table(state, index, "tuple")?;
                let found = state.raw_len(index);
                if found != $len {
                    return Err(Error::Length { expected: $len, found });
                }
                state.reserve(2);
                Ok(($( element_to::<$name>(state, index, $idx + 1)?, )+))
            }
        }
    };
}

tuple_codec!(1; A 0);
tuple_codec!(2; A 0, B 1);
tuple_codec!(3; A 0, B 1, C 2);
tuple_codec!(4; A 0, B 1, C 2, D 3);
tuple_codec!(5; A 0, B 1, C 2, D 3, E 4);
tuple_codec!(6; A 0, B 1, C 2, D 3, E 4, F 5);
tuple_codec!(7; A 0, B 1, C 2, D 3, E 4, F 5, G 6);
tuple_codec!(8; A 0, B 1, C 2, D 3, E 4, F 5, G 6, H 7);

// ============================================================================
// Aggregates
// ============================================================================

/// Push an aggregate through its own serializer and attach its metatable
pub fn push_aggregate<T: Aggregate>(value: &T, state: State<'_>) -> c_int {
    state.reserve(2);
    value.to_lua(state);
    crate::userdata::push_metatable::<T>(state);
    unsafe { ffi::lua_setmetatable(state.as_ptr(), -2) };
    1
}

/// Make aggregate types marshallable.
///
/// Each type must implement [`Aggregate`](crate::Aggregate) (and therefore
/// [`UserType`](crate::UserType)).
///
/// ```ignore
/// impl UserType for Point {}
/// impl Aggregate for Point { /* to_lua, from_lua */ }
/// luaw_core::aggregate!(Point);
/// ```
#[macro_export]
macro_rules! aggregate {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Classify for $ty {
                const CATEGORY: $crate::Category = $crate::Category::Aggregate;
            }

            impl $crate::Push for $ty {
                fn push(&self, state: $crate::State<'_>) -> ::std::ffi::c_int {
                    $crate::codec::push_aggregate(self, state)
                }
            }

            impl $crate::Extract for $ty {
                fn is(state: $crate::State<'_>, index: ::std::ffi::c_int) -> bool {
                    <$ty as $crate::Aggregate>::lua_is(state, index)
                }

                fn to(state: $crate::State<'_>, index: ::std::ffi::c_int) -> $crate::Result<Self> {
                    <$ty as $crate::Aggregate>::from_lua(state, index)
                }
            }
        )+
    };
}
