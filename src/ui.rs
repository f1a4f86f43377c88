use colored::Colorize;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Print a keypath line in tree output
pub fn keypath(keypath: &str) {
    println!("{}", keypath.white().bold());
}

/// Print a `+-` tree branch at the given depth
pub fn branch(depth: usize, msg: &str) {
    println!("{}{} {}", "  ".repeat(depth), "+-".dimmed(), msg);
}

/// Indent every line of a multi-line block
pub fn indent_block(text: &str, prefix: &str) -> String {
    text.lines()
        .map(|line| format!("{prefix}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Truncate a keypath for display, keeping the end (where the keys are)
pub fn truncate_keypath(keypath: &str, max_chars: usize) -> String {
    let len = keypath.chars().count();
    if len <= max_chars {
        keypath.to_string()
    } else if max_chars <= 3 {
        "...".to_string()
    } else {
        let tail: String = keypath.chars().skip(len - (max_chars - 3)).collect();
        format!("...{tail}")
    }
}

// ============================================================================
// Tests
// ============================================================================
