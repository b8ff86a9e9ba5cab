//! # damper
//!
//! Debounce and throttle arbitrary commands across unrelated processes.
//!
//! ```text
//! damper [MODE] [OPTIONS] <id> <delay_ms> <command> [args...]
//! damper --status [mode id]
//! damper --reset <mode> <id>
//! damper --reset-all <id>
//! ```

use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::Result;
use clap::error::ErrorKind;
use clap::{ArgGroup, Parser};

use damper_core::{
    engine, gc, reset, status, EngineError, GcPolicy, Key, Mode, Request, StateDir, EXIT_IO,
    EXIT_USAGE,
};

mod render;

/// Debounce and throttle commands across processes sharing a filesystem
#[derive(Parser)]
#[command(name = "damper")]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("op").args(["status", "reset", "reset_all", "gc"])))]
struct Cli {
    /// Debounce: every call pushes the execution out by delay_ms (default)
    #[arg(long)]
    debounce: bool,

    /// Throttle: a fixed window of delay_ms opens on the first call
    #[arg(long, conflicts_with = "debounce")]
    throttle: bool,

    /// Execute on the leading edge of a burst
    /// (default: false for debounce, true for throttle)
    #[arg(long, value_name = "BOOL")]
    leading: Option<bool>,

    /// Execute on the trailing edge of a burst (default: true)
    #[arg(long, value_name = "BOOL")]
    trailing: Option<bool>,

    /// Kill the child after this many milliseconds (exit 79)
    #[arg(long, value_name = "MS")]
    timeout: Option<u64>,

    /// Skip outright (exit 76) when another runner owns the key
    #[arg(long)]
    no_wait: bool,

    /// Wait on a busy key (the default; conflicts with --no-wait)
    #[arg(long, conflicts_with = "no_wait")]
    wait: bool,

    /// Show coordination state for all keys, or one [mode id] pair
    #[arg(long)]
    status: bool,

    /// Emit --status output as JSON
    #[arg(long, requires = "status")]
    json: bool,

    /// Cancel a pending schedule: --reset <mode> <id>
    #[arg(long)]
    reset: bool,

    /// Reset both modes of an id and drop its shared state: --reset-all <id>
    #[arg(long)]
    reset_all: bool,

    /// Sweep stale state files now
    #[arg(long)]
    gc: bool,

    /// State directory override (env: DAMPER_STATE_DIR)
    #[arg(long, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// <id> <delay_ms> <command> [args...]
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        value_name = "ID DELAY_MS COMMAND"
    )]
    rest: Vec<OsString>,
}

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    // A killed consumer of our output is the consumer's business.
    #[cfg(unix)]
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => EXIT_USAGE,
            };
            let _ = e.print();
            return code;
        }
    };

    let (state_root, lock_wait_ms, gc_policy) = {
        let config = damper_config::config();
        damper_config::logging::init(&config);
        (
            cli.state_dir
                .clone()
                .unwrap_or_else(|| config.state_dir().to_path_buf()),
            config.lock_wait_ms(),
            GcPolicy {
                interval_ms: config.gc.interval_ms,
                stale_after_ms: config.gc.stale_after_ms,
            },
        )
    };

    match dispatch(&cli, &state_root, lock_wait_ms, &gc_policy) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("damper: {:#}", err);
            err.downcast_ref::<EngineError>()
                .map(EngineError::exit_code)
                .unwrap_or(EXIT_IO)
        }
    }
}

fn dispatch(
    cli: &Cli,
    state_root: &std::path::Path,
    lock_wait_ms: u64,
    gc_policy: &GcPolicy,
) -> Result<i32> {
    let store = StateDir::open(state_root)?.with_lock_wait_ms(lock_wait_ms);

    if cli.status {
        return cmd_status(cli, &store);
    }
    if cli.reset {
        let (mode, id) = mode_id_args(&cli.rest, "--reset")?;
        reset::reset(&store, mode, &id)?;
        println!("Reset {}/{}", mode, id);
        return Ok(0);
    }
    if cli.reset_all {
        let id = id_arg(&cli.rest, "--reset-all")?;
        reset::reset_all(&store, &id)?;
        println!("Reset all state for {}", id);
        return Ok(0);
    }
    if cli.gc {
        let removed = gc::force_sweep(&store, gc_policy)?;
        println!("Swept {} stale state file(s)", removed);
        return Ok(0);
    }

    let req = build_request(cli)?;
    let code = engine::invoke(&store, &req)?;

    // Opportunistic sweep near the end of any invocation; never fatal.
    if let Err(e) = gc::maybe_sweep(&store, gc_policy) {
        tracing::debug!("opportunistic gc sweep failed: {}", e);
    }

    Ok(code)
}

fn cmd_status(cli: &Cli, store: &StateDir) -> Result<i32> {
    let entries = match cli.rest.len() {
        0 => status::collect(store)?,
        2 => {
            let mode = parse_mode(&cli.rest[0])?;
            let id = utf8_arg(&cli.rest[1], "id")?;
            status::collect_one(store, &Key::new(mode, id))?
                .into_iter()
                .collect()
        }
        _ => {
            return Err(usage("--status takes no arguments, or <mode> <id>"));
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        render::state_report(store.root(), &entries);
    }
    Ok(0)
}

fn build_request(cli: &Cli) -> Result<Request> {
    let mode = if cli.throttle {
        Mode::Throttle
    } else {
        Mode::Debounce
    };

    if cli.rest.len() < 3 {
        return Err(usage("expected <id> <delay_ms> <command> [args...]"));
    }

    let id = utf8_arg(&cli.rest[0], "id")?;
    let delay_ms: u64 = utf8_arg(&cli.rest[1], "delay_ms")?
        .parse()
        .map_err(|_| usage("delay_ms must be a positive integer of milliseconds"))?;

    Ok(Request {
        mode,
        id,
        delay_ms,
        leading: cli.leading.unwrap_or(mode == Mode::Throttle),
        trailing: cli.trailing.unwrap_or(true),
        no_wait: cli.no_wait,
        timeout_ms: cli.timeout,
        argv: cli.rest[2..].to_vec(),
    })
}

fn mode_id_args(rest: &[OsString], flag: &str) -> Result<(Mode, String)> {
    if rest.len() != 2 {
        return Err(usage(&format!("{} takes <mode> <id>", flag)));
    }
    Ok((parse_mode(&rest[0])?, utf8_arg(&rest[1], "id")?))
}

fn id_arg(rest: &[OsString], flag: &str) -> Result<String> {
    if rest.len() != 1 {
        return Err(usage(&format!("{} takes <id>", flag)));
    }
    utf8_arg(&rest[0], "id")
}

fn parse_mode(arg: &OsString) -> Result<Mode> {
    let s = utf8_arg(arg, "mode")?;
    Mode::parse(&s).ok_or_else(|| usage("mode must be 'debounce' or 'throttle'"))
}

fn utf8_arg(arg: &OsString, name: &str) -> Result<String> {
    arg.to_str()
        .map(str::to_string)
        .ok_or_else(|| usage(&format!("{} must be valid UTF-8", name)))
}

fn usage(msg: &str) -> anyhow::Error {
    EngineError::Usage(msg.to_string()).into()
}
