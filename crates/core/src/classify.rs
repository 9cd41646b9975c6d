//! Value classification
//!
//! Every host type that crosses the boundary belongs to exactly one
//! [`Category`], fixed by its [`Classify`] impl. Built-in categories are
//! covered by the impls below; user aggregates opt in through
//! [`Aggregate`] and the [`aggregate!`](crate::aggregate) macro. A type with
//! no impl is rejected by the compiler, so there is no runtime fallback.
//!
//! Precedence (first match wins, and impls never overlap):
//! integer, float, boolean, nil, text, pointer, sequence, map, optional,
//! tuple, function, aggregate.

use crate::error::Result;
use crate::state::{Kind, State};
use mlua::ffi;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ffi::c_int;

/// Marshalling category of a host type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Integer,
    Float,
    Boolean,
    Nil,
    Text,
    Pointer,
    Sequence,
    Map,
    Optional,
    Tuple,
    Function,
    Aggregate,
}

impl Category {
    pub const fn name(self) -> &'static str {
        match self {
            Category::Integer => "integer",
            Category::Float => "float",
            Category::Boolean => "boolean",
            Category::Nil => "nil",
            Category::Text => "text",
            Category::Pointer => "pointer",
            Category::Sequence => "sequence",
            Category::Map => "map",
            Category::Optional => "optional",
            Category::Tuple => "tuple",
            Category::Function => "function",
            Category::Aggregate => "aggregate",
        }
    }
}

/// Compile-time category of a host type
pub trait Classify {
    const CATEGORY: Category;
}

/// A host type with a metatable identity.
///
/// The identifier is the registry key of the type's metatable. Types that do
/// not override it get their `type_name`, which is stable within one build.
pub trait UserType: 'static {
    fn mt_identifier() -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Conversion hooks for a user-defined aggregate.
///
/// `to_lua` must push exactly one table. `from_lua` reads the table at
/// `index` (usually through [`field::get`](crate::field::get)). Register the
/// type with [`aggregate!`](crate::aggregate) to make it marshallable.
pub trait Aggregate: UserType + Sized {
    fn to_lua(&self, state: State<'_>);

    fn from_lua(state: State<'_>, index: c_int) -> Result<Self>;

    fn lua_is(state: State<'_>, index: c_int) -> bool {
        state.kind(index) == Kind::Table
    }
}

macro_rules! classify {
    ($category:ident => $($ty:ty),+ $(,)?) => {
        $(
            impl Classify for $ty {
                const CATEGORY: Category = Category::$category;
            }
        )+
    };
}

classify!(Integer => i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);
classify!(Float => f32, f64);
classify!(Boolean => bool);
classify!(Nil => ());
classify!(Text => String, str);
classify!(Function => ffi::lua_CFunction);

impl<T: Classify + ?Sized> Classify for &T {
    const CATEGORY: Category = T::CATEGORY;
}

impl<T: UserType> Classify for *mut T {
    const CATEGORY: Category = Category::Pointer;
}

impl<T: UserType> Classify for *const T {
    const CATEGORY: Category = Category::Pointer;
}

impl<T> Classify for [T] {
    const CATEGORY: Category = Category::Sequence;
}

impl<T> Classify for Vec<T> {
    const CATEGORY: Category = Category::Sequence;
}

impl<T> Classify for VecDeque<T> {
    const CATEGORY: Category = Category::Sequence;
}

impl<K, V, S> Classify for HashMap<K, V, S> {
    const CATEGORY: Category = Category::Map;
}

impl<K, V> Classify for BTreeMap<K, V> {
    const CATEGORY: Category = Category::Map;
}

impl<T> Classify for Option<T> {
    const CATEGORY: Category = Category::Optional;
}

macro_rules! classify_tuple {
    ($($name:ident),+) => {
        impl<$($name),+> Classify for ($($name,)+) {
            const CATEGORY: Category = Category::Tuple;
        }
    };
}

classify_tuple!(A);
classify_tuple!(A, B);
classify_tuple!(A, B, C);
classify_tuple!(A, B, C, D);
classify_tuple!(A, B, C, D, E);
classify_tuple!(A, B, C, D, E, F);
classify_tuple!(A, B, C, D, E, F, G);
classify_tuple!(A, B, C, D, E, F, G, H);

/// Category of `T`, usable in generic code
pub const fn category_of<T: Classify + ?Sized>() -> Category {
    T::CATEGORY
}
