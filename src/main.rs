//! # Command Line Interface
//!
//! The argument parser is built in `cli.rs`.
//! The subcommands are run from the `commands` module.

mod cli;

use env_logger;
#[cfg(windows)]
use colored;
use mfdkit::commands;

fn main() -> Result<(),Box<dyn std::error::Error>>
{
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    #[cfg(windows)]
    let _ = colored::control::set_virtual_terminal(true);

    let main_cmd = cli::build_cli();
    let matches = main_cmd.clone().get_matches();

    if let Some(cmd) = matches.subcommand_matches("mkpack") {
        return commands::mkpack::mkpack(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("inspect") {
        return commands::inspect::inspect(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("run") {
        return commands::run::run(cmd);
    }
    if let Some(cmd) = matches.subcommand_matches("completions") {
        return commands::completions::generate(main_cmd,cmd);
    }

    eprintln!("No subcommand was found, try `mfdkit --help`");
    return Err(Box::new(commands::CommandError::InvalidCommand));
}
