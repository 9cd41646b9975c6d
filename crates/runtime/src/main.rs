//! luaw CLI
//!
//! Runs a Lua script, an inline chunk or stdin, then prints every value the
//! chunk returns.

use clap::Parser as ClapParser;
use luaw::{DumpConfig, Lua, LuaConfig, MULTRET, State, chunk_name_for, do_file, do_string, dump};
use std::io::{self, Read};
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "luaw")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run Lua 5.4 code and print what it returns", long_about = None)]
struct Cli {
    /// Script to run (reads stdin when neither a script nor -e is given)
    script: Option<PathBuf>,

    /// Run this chunk instead of a script
    #[arg(short = 'e', long = "execute", value_name = "CODE", conflicts_with = "script")]
    code: Option<String>,

    /// Reject undeclared globals assigned from inside functions
    #[arg(long)]
    strict: bool,

    /// Engine configuration (TOML)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Deepest table nesting printed in full
    #[arg(long, value_name = "N")]
    max_depth: Option<usize>,

    /// Print each result on one line
    #[arg(long)]
    compact: bool,
}

fn main() {
    luaw::logging::init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match LuaConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {}", e);
                process::exit(1);
            }
        },
        None => LuaConfig::default(),
    };
    if cli.strict {
        config.strict = true;
    }
    if let Some(depth) = cli.max_depth {
        config.dump.max_depth = depth;
    }
    if cli.compact {
        config.dump.pretty = false;
    }

    let lua = match Lua::with_config(&config) {
        Ok(lua) => lua,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    };

    let dump_config = config.dump_config();
    let outcome = lua.with_lua(|state| run(state, &cli, &dump_config));
    match outcome {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Run the selected chunk and render its results
fn run(state: State<'_>, cli: &Cli, config: &DumpConfig) -> luaw::Result<Vec<String>> {
    let base = state.top();
    if let Some(code) = &cli.code {
        do_string(state, code, MULTRET, "=(command line)")?;
    } else if let Some(path) = &cli.script {
        do_file(state, path, MULTRET, &chunk_name_for(path))?;
    } else {
        let mut source = Vec::new();
        io::stdin()
            .read_to_end(&mut source)
            .map_err(|source| luaw::Error::Io {
                path: PathBuf::from("<stdin>"),
                source,
            })?;
        luaw::do_buffer(state, &source, MULTRET, "=stdin")?;
    }

    let lines = ((base + 1)..=state.top())
        .map(|index| dump(state, index, config))
        .collect();
    state.set_top(base);
    lines
}
