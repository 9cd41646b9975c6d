//! End-to-end checks of the marshalling layer through the locked engine
//!
//! Each test builds its own `Lua`, so they run independently in parallel.

use luaw::{
    Aggregate, Error, Kind, Lua, LuaConfig, State, UserType, ffi, get, has_field, is, pop, push,
    push_new_userdata, set,
};
use std::collections::{BTreeMap, HashMap};
use std::ffi::c_int;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[test]
fn test_integer_float_text_round_trip() {
    let lua = Lua::new().unwrap();
    lua.with_lua(|state| {
        for n in [i64::MIN, -7, 0, 7, i64::MAX] {
            push(state, &n);
            assert_eq!(pop::<i64>(state).unwrap(), n);
        }
        for f in [-1.5f64, 0.0, 3.141592653589793, 1e300] {
            push(state, &f);
            assert_eq!(pop::<f64>(state).unwrap(), f);
        }
        for s in ["", "plain", "ünïcödé", "with\0nul"] {
            push(state, s);
            assert_eq!(pop::<String>(state).unwrap(), s);
        }
        assert_eq!(state.top(), 0);
    });
}

#[test]
fn test_sequence_and_map_round_trip() {
    let lua = Lua::new().unwrap();
    lua.with_lua(|state| {
        let seq: Vec<String> = (0..50).map(|i| format!("item{}", i)).collect();
        push(state, &seq);
        assert_eq!(pop::<Vec<String>>(state).unwrap(), seq);

        let map: HashMap<String, f64> = (0..20).map(|i| (format!("k{}", i), i as f64 / 4.0)).collect();
        push(state, &map);
        assert_eq!(pop::<HashMap<String, f64>>(state).unwrap(), map);
    });
}

#[test]
fn test_tuple_is_rules() {
    let lua = Lua::new().unwrap();
    lua.with_lua(|state| {
        push(state, &(1i64, "a".to_string()));
        assert!(is::<(i64, String)>(state, -1));
        assert!(!is::<(i64, String, bool)>(state, -1));
        assert!(!is::<(String, String)>(state, -1));
        state.set_top(0);
    });
}

#[test]
fn test_optional_round_trip() {
    let lua = Lua::new().unwrap();
    lua.with_lua(|state| {
        push(state, &None::<String>);
        assert_eq!(pop::<Option<String>>(state).unwrap(), None);
        push(state, &Some(12u32));
        assert_eq!(pop::<Option<u32>>(state).unwrap(), Some(12));
    });
}

#[test]
fn test_qualified_fields() {
    let lua = Lua::new().unwrap();
    lua.exec("cfg = { a = { b = { c = 5 } } }").unwrap();
    lua.with_lua(|state| {
        luaw::push_global(state, "cfg");
        let depth = state.top();

        assert_eq!(get::<i64>(state, -1, "a.b.c", true).unwrap(), 5);
        assert!(!has_field(state, -1, "a.b.x", true));
        match get::<i64>(state, -1, "a.b.x", true) {
            Err(Error::MissingField { path }) => assert_eq!(path, "a.b.x"),
            other => panic!("Expected MissingField, got {:?}", other),
        }
        set(state, -1, "a.b.c", &7i64, true).unwrap();
        assert_eq!(get::<i64>(state, -1, "a.b.c", true).unwrap(), 7);
        assert_eq!(state.top(), depth);
        state.set_top(0);
    });
    assert_eq!(lua.eval::<i64>("return cfg.a.b.c").unwrap(), 7);
}

#[test]
fn test_protected_call_failure() {
    let lua = Lua::new().unwrap();
    lua.exec("function explode(x) error('exploded with ' .. x) end").unwrap();
    lua.with_lua(|state| {
        push(state, "sentinel");
        let depth = state.top();
        let err = luaw::call_global::<()>(state, "explode", (3,)).unwrap_err();
        match &err {
            Error::Runtime { message, traceback } => {
                assert!(message.contains("exploded with 3"));
                assert!(traceback.as_deref().is_some_and(|tb| !tb.is_empty()));
            }
            other => panic!("Expected Runtime error, got {:?}", other),
        }
        assert_eq!(state.top(), depth);
        state.set_top(0);
    });
}

#[test]
fn test_dump_depth_bound() {
    let lua = Lua::with_config(&LuaConfig::new().with_pretty(false).with_max_depth(1)).unwrap();
    lua.exec("loop = {}; loop.next = loop; deep = { { { { 1 } } } }").unwrap();
    assert_eq!(lua.dump_global("loop").unwrap(), "{ next={...} }");
    assert_eq!(lua.dump_global("deep").unwrap(), "{ {...} }");
}

struct Tracked {
    drops: Arc<AtomicUsize>,
}

impl UserType for Tracked {
    fn mt_identifier() -> &'static str {
        "integration.Tracked"
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_userdata_lifecycle() {
    let drops = Arc::new(AtomicUsize::new(0));
    let lua = Lua::new().unwrap();
    lua.with_lua(|state| {
        push_new_userdata(
            state,
            Tracked {
                drops: drops.clone(),
            },
        );
        push_new_userdata(
            state,
            Tracked {
                drops: drops.clone(),
            },
        );
        assert_eq!(luaw::metatable_key::<Tracked>(), "integration.Tracked");
        unsafe {
            ffi::lua_getmetatable(state.as_ptr(), 1);
            ffi::lua_getmetatable(state.as_ptr(), 2);
        }
        assert!(state.raw_equal(-1, -2));
        state.set_top(0);
    });
    lua.collect_garbage().unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 2);
    lua.collect_garbage().unwrap();
    drop(lua);
    assert_eq!(drops.load(Ordering::SeqCst), 2);
}

#[test]
fn test_userdata_finalized_on_another_thread() {
    let drops = Arc::new(AtomicUsize::new(0));
    let lua = Arc::new(Lua::new().unwrap());
    let owner = drops.clone();
    lua.with_lua(move |state| {
        push_new_userdata(state, Tracked { drops: owner });
        state.set_top(0);
    });

    let collector = Arc::clone(&lua);
    std::thread::spawn(move || collector.collect_garbage().unwrap())
        .join()
        .unwrap();
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[derive(Debug, PartialEq)]
struct Rect {
    w: f64,
    h: f64,
}

impl UserType for Rect {}

impl Aggregate for Rect {
    fn to_lua(&self, state: State<'_>) {
        state.new_table(0, 2);
        set(state, -1, "w", &self.w, false).unwrap();
        set(state, -1, "h", &self.h, false).unwrap();
    }

    fn from_lua(state: State<'_>, index: c_int) -> luaw::Result<Self> {
        Ok(Rect {
            w: get(state, index, "w", false)?,
            h: get(state, index, "h", false)?,
        })
    }
}

luaw::aggregate!(Rect);

#[test]
fn test_aggregate_through_lua() {
    let lua = Lua::new().unwrap();
    lua.exec("function area(r) return r.w * r.h end\nfunction grow(r) return { w = r.w * 2, h = r.h * 2 } end")
        .unwrap();
    let area: f64 = lua.call_global("area", (Rect { w: 2.0, h: 3.5 },)).unwrap();
    assert_eq!(area, 7.0);

    let grown: Rect = lua.call_global("grow", (Rect { w: 1.0, h: 2.0 },)).unwrap();
    assert_eq!(grown, Rect { w: 2.0, h: 4.0 });
}

#[test]
fn test_nested_containers_through_lua() {
    let lua = Lua::new().unwrap();
    lua.exec(
        "function index(words) local m = {} for i, w in ipairs(words) do m[w] = i end return m end",
    )
    .unwrap();
    let words = vec!["x".to_string(), "y".to_string()];
    let index: BTreeMap<String, i64> = lua.call_global("index", (words,)).unwrap();
    assert_eq!(index.get("x"), Some(&1));
    assert_eq!(index.get("y"), Some(&2));
}

#[test]
fn test_strict_mode() {
    let lua = Lua::with_config(&LuaConfig::new().with_strict(true)).unwrap();
    lua.exec("declared = 1").unwrap();
    lua.exec("function f() declared = 2 end f()").unwrap();
    assert_eq!(lua.get_global::<i64>("declared").unwrap(), 2);

    let err = lua.exec("function g() sneaky = 1 end g()").unwrap_err();
    assert!(err.to_string().contains("assign to undeclared variable 'sneaky'"));

    let err = lua.exec("function h() return missing end h()").unwrap_err();
    assert!(err.to_string().contains("variable 'missing' is not declared"));
}

#[test]
fn test_preload_and_exec_file() {
    let mut prelude = tempfile::NamedTempFile::new().unwrap();
    writeln!(prelude, "function twice(x) return x * 2 end").unwrap();
    let mut script = tempfile::NamedTempFile::new().unwrap();
    writeln!(script, "result = twice(21)").unwrap();

    let lua = Lua::with_config(&LuaConfig::new().with_preload(prelude.path())).unwrap();
    lua.exec_file(script.path()).unwrap();
    assert_eq!(lua.get_global::<i64>("result").unwrap(), 42);
}

#[test]
fn test_preload_failure_surfaces() {
    let config = LuaConfig::new().with_preload("/nonexistent/prelude.lua");
    assert!(matches!(Lua::with_config(&config), Err(Error::Io { .. })));
}

#[test]
fn test_shared_between_threads() {
    let lua = Arc::new(Lua::new().unwrap());
    lua.exec("counter = 0\nfunction bump() counter = counter + 1 return counter end")
        .unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let lua = Arc::clone(&lua);
            std::thread::spawn(move || {
                for _ in 0..250 {
                    let _: i64 = lua.call_global("bump", ()).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lua.get_global::<i64>("counter").unwrap(), 1000);
}

#[test]
fn test_independent_engines() {
    let a = Lua::new().unwrap();
    let b = Lua::new().unwrap();
    a.exec("shared = 'a'").unwrap();
    assert_eq!(b.get_global::<Option<String>>("shared").unwrap(), None);
    a.with_lua(|state| assert_eq!(state.kind(1), Kind::None));
}
