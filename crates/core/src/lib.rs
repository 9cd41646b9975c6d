//! luaw core: typed marshalling between Rust and an embedded Lua 5.4 engine
//!
//! Host values cross the boundary through the engine's value stack. The
//! host type picks the conversion at compile time through its [`Classify`]
//! category; [`Push`] and [`Extract`] do the work against a [`State`].
//!
//! # Modules
//!
//! - `state`: engine ownership, the stack handle, slot kinds
//! - `classify`: compile-time categories, user type hooks
//! - `codec`: push / is / to for every category
//! - `iter`: sequence, string-keyed and full table traversal
//! - `field`: dotted-path field access and globals
//! - `call`: protected calls with tracebacks
//! - `userdata`: engine-owned host objects and per-type metatables
//! - `dump`: human-readable rendering of stack values
//! - `load`: compiling and running chunks
//! - `registry`: registry references
//! - `error`: the single error type
//!
//! Engine errors never unwind through host frames: host code only reaches
//! engine code through [`pcall`], and table access is raw.

pub mod call;
pub mod classify;
pub mod codec;
pub mod dump;
pub mod error;
pub mod field;
pub mod iter;
pub mod load;
pub mod registry;
pub mod state;
pub mod userdata;

pub use mlua::ffi;

pub use call::{
    Args, MULTRET, call, call_field, call_global, call_push, call_push_field, call_push_global,
    pcall,
};
pub use classify::{Aggregate, Category, Classify, UserType, category_of};
pub use codec::{Extract, Push, is, pop, push, to, to_or};
pub use dump::{DumpConfig, dump, dump_stack, print_stack, to_display_string};
pub use error::{Error, Result};
pub use field::{
    get, get_field, get_global, has_field, push_global, set, set_field, set_global,
};
pub use iter::{ipairs, pairs, spairs};
pub use load::{do_buffer, do_file, do_string, eval};
pub use registry::RegistryRef;
pub use state::{Engine, Kind, STRICT_LUA, State, ensure, len};
pub use userdata::{
    Metatable, has_metatable, metatable_key, push_metatable, push_new_userdata, set_metatable,
};
