//! Markdown rendering of task records for terminal output

use relay_task::{Task, TaskOutput, TaskStats};
use std::fmt::Write;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Render one task and its captured output
pub fn render_output(output: &TaskOutput) -> String {
    let mut out = render_task(&output.task);

    if let Some(stdout) = output.stdout.as_deref().filter(|s| !s.trim().is_empty()) {
        push_block(&mut out, "Output", stdout);
    }
    if let Some(stderr) = output.stderr.as_deref().filter(|s| !s.trim().is_empty()) {
        push_block(&mut out, "Errors", stderr);
    }

    out
}

/// Render the task header and metadata list
pub fn render_task(task: &Task) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "## {} Task {}", task.state.symbol(), task.id.short());
    let _ = writeln!(out);
    let _ = writeln!(out, "**Status:** {}", task.state.display_name());
    let _ = writeln!(out, "**Description:** {}", task.description);
    if let Some(dir) = &task.working_directory {
        let _ = writeln!(out, "**Working directory:** `{}`", dir.display());
    }
    let _ = writeln!(out, "**Timeout:** {}s", task.timeout.as_secs());
    let _ = writeln!(out, "**Created:** {}", task.created_at.format(TIME_FORMAT));
    if let Some(started) = task.started_at {
        let _ = writeln!(out, "**Started:** {}", started.format(TIME_FORMAT));
    }
    if let Some(completed) = task.completed_at {
        let _ = writeln!(out, "**Completed:** {}", completed.format(TIME_FORMAT));
    }
    if let Some(duration) = task.duration() {
        let _ = writeln!(out, "**Duration:** {:.1}s", duration.as_secs_f64());
    }
    if let Some(code) = task.result.as_ref().and_then(|r| r.exit_code) {
        let _ = writeln!(out, "**Exit code:** {}", code);
    }
    if let Some(error) = &task.error {
        let _ = writeln!(out, "**Error:** {}", error);
    }

    out
}

/// Render a stats table
pub fn render_stats(stats: &TaskStats) -> String {
    let mut out = String::from("| State | Count |\n|---|---|\n");
    for (label, count) in [
        ("Pending", stats.pending),
        ("Running", stats.running),
        ("Completed", stats.completed),
        ("Failed", stats.failed),
        ("Cancelled", stats.cancelled),
        ("**Total**", stats.total),
    ] {
        let _ = writeln!(out, "| {} | {} |", label, count);
    }
    out
}

fn push_block(out: &mut String, title: &str, body: &str) {
    let fence = if body.contains("```") { "~~~" } else { "```" };
    let _ = writeln!(out);
    let _ = writeln!(out, "### {}", title);
    let _ = writeln!(out);
    let _ = writeln!(out, "{}", fence);
    let _ = writeln!(out, "{}", body.trim_end());
    let _ = writeln!(out, "{}", fence);
}
