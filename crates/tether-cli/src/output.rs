//! Terminal status lines

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

fn status_line(out: &mut impl Write, color: Color, mark: &str, msg: &str) {
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(mark),
        Print(' '),
        ResetColor,
        Print(msg),
        Print('\n')
    );
}

/// Green check mark on stdout
pub fn print_success(msg: &str) {
    status_line(&mut std::io::stdout(), Color::Green, "✓", msg);
}

/// Red cross on stderr
pub fn print_error(msg: &str) {
    status_line(&mut std::io::stderr(), Color::Red, "✗", msg);
}

pub fn print_warning(msg: &str) {
    status_line(&mut std::io::stderr(), Color::Yellow, "⚠", msg);
}

pub fn print_info(msg: &str) {
    status_line(&mut std::io::stdout(), Color::Cyan, "ℹ", msg);
}

/// One line per forward, aligned on the arrow
pub fn format_forwards(forwards: &[(String, String)]) -> String {
    let width = forwards.iter().map(|(local, _)| local.len()).max().unwrap_or(0);
    forwards
        .iter()
        .map(|(local, remote)| format!("{:<width$} -> {}", local, remote, width = width))
        .collect::<Vec<_>>()
        .join("\n")
}
