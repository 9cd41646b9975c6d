//! luaw: a Lua 5.4 engine that can be shared between threads
//!
//! [`Lua`] owns one engine behind a mutex. Each method takes the lock once
//! and leaves the engine stack as it found it; [`Lua::with_lua`] hands out
//! the raw [`State`] for longer marshalling sequences under one lock.
//!
//! ```ignore
//! let lua = luaw::Lua::new()?;
//! lua.exec("function greet(name) return 'hello ' .. name end")?;
//! let s: String = lua.call_global("greet", ("world",))?;
//! ```

pub mod config;
pub mod logging;

pub use config::{ConfigError, DumpSettings, LuaConfig};
pub use luaw_core::*;

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// A locked engine instance
pub struct Lua {
    engine: Mutex<Engine>,
    config: LuaConfig,
}

impl Lua {
    /// Engine with default settings
    pub fn new() -> Result<Self> {
        Self::with_config(&LuaConfig::default())
    }

    /// Engine with `config` applied: strict mode, then each preload script
    pub fn with_config(config: &LuaConfig) -> Result<Self> {
        let engine = Engine::new(config.strict)?;
        for path in &config.preload {
            debug!(path = %path.display(), "preloading");
            do_file(engine.state(), path, 0, &chunk_name_for(path))?;
        }
        info!(strict = config.strict, preload = config.preload.len(), "lua engine ready");
        Ok(Lua {
            engine: Mutex::new(engine),
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &LuaConfig {
        &self.config
    }

    /// Run `f` with the engine locked.
    ///
    /// `f` must not call back into this `Lua`; the lock is not re-entrant.
    pub fn with_lua<R>(&self, f: impl FnOnce(State<'_>) -> R) -> R {
        // a poisoned lock still guards a valid engine
        let engine = self.engine.lock().unwrap_or_else(PoisonError::into_inner);
        f(engine.state())
    }

    /// Run `source`, discarding any results
    pub fn exec(&self, source: &str) -> Result<()> {
        self.with_lua(|state| {
            let top = state.top();
            let result = do_string(state, source, 0, &self.config.chunk_name);
            state.set_top(top);
            result
        })
    }

    /// Run the script at `path`
    pub fn exec_file(&self, path: &Path) -> Result<()> {
        self.with_lua(|state| {
            let top = state.top();
            let result = do_file(state, path, 0, &chunk_name_for(path));
            state.set_top(top);
            result
        })
    }

    /// Run `source` and convert its single result
    pub fn eval<T: Extract>(&self, source: &str) -> Result<T> {
        self.with_lua(|state| {
            let top = state.top();
            let result = eval(state, source, &self.config.chunk_name);
            state.set_top(top);
            result
        })
    }

    pub fn get_global<T: Extract>(&self, name: &str) -> Result<T> {
        self.with_lua(|state| get_global(state, name))
    }

    pub fn set_global<T: Push + ?Sized>(&self, name: &str, value: &T) -> Result<()> {
        self.with_lua(|state| set_global(state, name, value))
    }

    /// Call a global function with `args` and convert its first result
    pub fn call_global<R: Extract>(&self, name: &str, args: impl Args) -> Result<R> {
        self.with_lua(|state| {
            let top = state.top();
            let result = call_global(state, name, args);
            state.set_top(top);
            result
        })
    }

    /// Render a global with the configured dumper settings
    pub fn dump_global(&self, name: &str) -> Result<String> {
        let config = self.config.dump_config();
        self.with_lua(|state| {
            let top = state.top();
            push_global(state, name);
            let result = dump(state, -1, &config);
            state.set_top(top);
            result
        })
    }

    pub fn collect_garbage(&self) -> Result<()> {
        self.with_lua(|state| do_string(state, "collectgarbage('collect')", 0, "=gc"))
    }
}

/// Chunk name for a script file, in the engine's `@path` convention
pub fn chunk_name_for(path: &Path) -> String {
    format!("@{}", path.display())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lua_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Lua>();
    }

    #[test]
    fn test_exec_and_globals() {
        let lua = Lua::new().unwrap();
        lua.exec("x = 40 + 2").unwrap();
        assert_eq!(lua.get_global::<i64>("x").unwrap(), 42);

        lua.set_global("name", "luaw").unwrap();
        assert_eq!(lua.eval::<String>("return name:upper()").unwrap(), "LUAW");
        lua.with_lua(|state| assert_eq!(state.top(), 0));
    }

    #[test]
    fn test_chunk_name_in_errors() {
        let lua = Lua::with_config(&LuaConfig::new().with_chunk_name("=app")).unwrap();
        let err = lua.exec("error('bad')").unwrap_err();
        assert!(err.to_string().contains("app:1:"));
    }

    #[test]
    fn test_dump_global_uses_config() {
        let lua = Lua::with_config(&LuaConfig::new().with_pretty(false)).unwrap();
        lua.exec("t = { 1, 2, k = 'v' }").unwrap();
        assert_eq!(lua.dump_global("t").unwrap(), r#"{ 1, 2, k="v" }"#);
    }

    #[test]
    fn test_chunk_name_for() {
        assert_eq!(chunk_name_for(Path::new("a/b.lua")), "@a/b.lua");
    }
}
