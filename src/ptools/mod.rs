pub mod adv;
pub mod frida;
pub mod template;
pub mod wifi;

use anyhow::Result;
use thiserror::Error;

use crate::adb::{self, Adb, AdbError};
use crate::config::Config;
use crate::shell::ShellSession;
use crate::utils::{console, SpawnError};

use adv::AdvCommand;
use frida::FridaCommand;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("sh: {0}: Invalid command")]
    Invalid(String),
    #[error("Frida module invalid: {0}")]
    UnknownComponent(String),
}

impl CommandError {
    pub fn invalid(tokens: &[&str]) -> Self {
        CommandError::Invalid(tokens.join(" "))
    }
}

const MODULES: &[(&str, &str)] = &[
    ("adv", "Advanced commands"),
    ("frida", "Dynamic instrumentation"),
];

/// Routes `ptools <module> ...` to the adv or frida module.
///
/// Unknown input prints an invalid-command line and a host tool that cannot
/// be started prints an error line. Any other `Err` is fatal for the whole
/// shell.
pub fn dispatch(
    adb: &Adb,
    config: &Config,
    session: &mut ShellSession,
    tokens: &[&str],
) -> Result<()> {
    match route(adb, config, session, tokens) {
        Err(err) => match spawn_failure(&err) {
            Some(message) => {
                console::print_error(message);
                Ok(())
            }
            None => Err(err),
        },
        ok => ok,
    }
}

fn spawn_failure(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| match cause.downcast_ref::<AdbError>() {
        Some(AdbError::Spawn(spawn)) => Some(spawn.to_string()),
        _ => cause.downcast_ref::<SpawnError>().map(ToString::to_string),
    })
}

fn route(adb: &Adb, config: &Config, session: &mut ShellSession, tokens: &[&str]) -> Result<()> {
    match tokens {
        ["ptools", "help"] => {
            print_table("Available commands:", MODULES);
            Ok(())
        }
        ["ptools", "adv", "switch"] => switch_device(adb, session),
        ["ptools", "adv", _, ..] => match AdvCommand::parse(tokens) {
            Ok(command) => adv::run(adb, session, command),
            Err(err) => {
                println!("{}", err);
                Ok(())
            }
        },
        ["ptools", "frida", _, ..] => match FridaCommand::parse(tokens) {
            Ok(command) => frida::run(adb, config, session, command),
            Err(err @ CommandError::UnknownComponent(_)) => {
                console::print_error(err);
                Ok(())
            }
            Err(err) => {
                println!("{}", err);
                Ok(())
            }
        },
        _ => {
            println!("{}", CommandError::invalid(tokens));
            Ok(())
        }
    }
}

fn switch_device(adb: &Adb, session: &mut ShellSession) -> Result<()> {
    match adb::choose_device(adb, None)? {
        None => {
            console::print_error("The selected device is invalid");
            console::print_error("Device not updated");
        }
        Some(device) if device == session.device => console::print_warning("Device already used"),
        Some(device) => {
            session.switch(device);
            console::print_success("Updated device");
        }
    }
    Ok(())
}

pub(crate) fn print_table(title: &str, rows: &[(&str, &str)]) {
    println!("{}", title);
    println!("{:<26} {:<40}", "Command", "Description");
    for (command, description) in rows {
        println!("{:<26} {:<40}", command, description);
    }
}
