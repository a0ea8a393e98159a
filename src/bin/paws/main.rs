//! # Paws
//!
//! The PawScript interpreter binary. Runs files (or stdin) against a single
//! context and optionally drops into an interactive shell.

mod cli;
mod repl;

use std::error::Error;
use std::io::Read;

use cli::Cli;
use log::error;
use pawscript::{PawScriptContext, RESULT_NAME};

fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::init();

    simple_logger::init_with_level((&args.verbosity).into()).unwrap();

    if args.files.is_empty() && !args.interactive {
        println!("Paws - The PawScript interpreter");
        println!("Usage:");
        println!("-f <file>   execute a file");
        println!("-f -        run from stdin");
        println!("-i          interactive mode");
        println!();
        println!("You can chain multiple -f's; with -i the shell starts after them.");
        return Ok(());
    }

    let mut context = PawScriptContext::new();
    for file in &args.files {
        let result = if file == "-" {
            let mut code = String::new();
            std::io::stdin().read_to_string(&mut code)?;
            context.run(&code)
        } else {
            context.run_file(file)
        };
        match result {
            Ok(()) => {
                let name = if file == "-" { "<stdin>" } else { file.as_str() };
                if let Some(value) = context.render_variable(RESULT_NAME) {
                    println!("{name}: {value}");
                }
            }
            Err(err) => error!("{err}"),
        }
        while context.next_error().is_some() {}
    }

    if args.interactive {
        repl::run(&mut context)?;
    }

    Ok(())
}
