//! The interactive shell.
//!
//! Lines are accumulated until the brace/bracket/paren depth returns to zero
//! and no string literal is open, then the buffered chunk runs as one unit.

use std::io::{self, BufRead, IsTerminal, Write};

use colored::Colorize;
use pawscript::{PawScriptContext, RESULT_NAME};

/// Whether the buffered source forms an executable chunk.
fn can_exec(code: &str) -> bool {
    let mut depth = 0i32;
    let mut string_char = 0u8;
    let mut backslash = false;
    for c in code.bytes() {
        if string_char != 0 {
            if !backslash && c == string_char {
                string_char = 0;
            }
            backslash = c == b'\\';
        } else {
            match c {
                b'"' | b'\'' => string_char = c,
                b'(' | b'[' | b'{' => depth += 1,
                b')' | b']' | b'}' => depth -= 1,
                _ => {}
            }
        }
    }
    depth <= 0 && string_char == 0
}

pub fn run(context: &mut PawScriptContext) -> anyhow::Result<()> {
    if !io::stdin().is_terminal() {
        anyhow::bail!("stdin is not an interactive terminal, skipping interactive shell");
    }
    let stdin = io::stdin();
    let mut buffer = String::new();
    loop {
        print!("{} ", if buffer.is_empty() { ">" } else { "+" });
        io::stdout().flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(());
        }
        buffer.push_str(&line);
        if !can_exec(&buffer) {
            continue;
        }
        match context.run(&buffer) {
            Ok(()) => {
                if let Some(result) = context.render_variable(RESULT_NAME) {
                    println!("{result}");
                }
            }
            Err(error) => eprintln!("{}", error.to_string().red()),
        }
        while context.next_error().is_some() {}
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::can_exec;

    #[test]
    fn test_balanced_chunks_execute() {
        assert!(can_exec("u32 x = 3;"));
        assert!(can_exec("u8 f() { return 1; }"));
        assert!(!can_exec("u8 f() {"));
        assert!(!can_exec("u32 x = \"unterminated"));
        assert!(can_exec("s8* s = \"}}}\";"));
    }

    #[test]
    fn test_escaped_quote_stays_open() {
        assert!(!can_exec(r#"s8* s = "a\";"#));
        assert!(can_exec(r#"s8* s = "a\"";"#));
    }
}
