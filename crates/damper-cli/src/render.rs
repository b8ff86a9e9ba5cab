//! Human-readable rendering for `--status`.

use std::path::Path;

use chrono::{Local, TimeZone};
use damper_core::{now_ms, KeyStatus};

/// Print the state report for a set of keys.
pub fn state_report(root: &Path, entries: &[KeyStatus]) {
    println!();
    println!("  Damper State ({})", root.display());
    println!("  ============================================");

    if entries.is_empty() {
        println!();
        println!("  No coordination state.");
        println!();
        return;
    }

    let now = now_ms();
    for entry in entries {
        println!();
        println!("  {}/{}", entry.mode, entry.id);

        match (entry.alive, entry.pid) {
            (true, Some(pid)) => println!("    runner:     alive (pid {})", pid),
            (false, Some(pid)) => println!("    runner:     dead (stale pid {})", pid),
            _ => println!("    runner:     none"),
        }

        if let Some(at) = entry.scheduled_ms {
            println!("    scheduled:  {} ({})", relative(at, now), absolute(at));
        }
        if let Some(at) = entry.last_exec_ms {
            println!("    last exec:  {} ({})", relative(at, now), absolute(at));
        }
        if let Some(age) = entry.age_ms {
            println!("    last call:  {}", relative(now.saturating_sub(age), now));
        }
        if entry.dirty {
            println!("    dirty:      trailing execution owed");
        }
        if !entry.cmd.is_empty() {
            println!("    cmd:        {}", entry.cmd.join(" "));
        }
    }

    println!();
    println!("  ({} key{})", entries.len(), plural(entries.len()));
    println!();
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

/// "12s ago" / "in 3s", coarsening to minutes, hours, days.
fn relative(event_ms: u64, now_ms: u64) -> String {
    let (delta, suffix, prefix) = if event_ms <= now_ms {
        (now_ms - event_ms, " ago", "")
    } else {
        (event_ms - now_ms, "", "in ")
    };

    let secs = delta / 1000;
    let text = if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86_400)
    };

    format!("{}{}{}", prefix, text, suffix)
}

fn absolute(ms: u64) -> String {
    match Local.timestamp_millis_opt(ms as i64) {
        chrono::LocalResult::Single(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        _ => format!("{}ms", ms),
    }
}
