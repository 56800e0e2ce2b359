use anyhow::Result;
use colored::Colorize;
use std::io::{self, Write};
use std::process::Command;

use crate::adb::{self, Adb};
use crate::config::Config;
use crate::ptools;
use crate::utils::console::{self, LineSource};
use crate::utils::{shell_quote, Device};

const INITIAL_PATH: &str = "/";

/// State kept across shell lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellSession {
    pub device: Device,
    pub root: bool,
    pub current_path: String,
}

impl ShellSession {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            root: false,
            current_path: INITIAL_PATH.to_string(),
        }
    }

    /// Moves to another device, dropping root and the working directory.
    pub fn switch(&mut self, device: Device) {
        *self = Self::new(device);
    }

    fn prompt(&self) -> String {
        format!(
            "{}{}{}{}{}{} ",
            self.device.name.magenta(),
            "@".cyan(),
            "ptools".yellow(),
            ":".cyan(),
            self.current_path.red(),
            (if self.root { "#" } else { "$" }).white()
        )
    }
}

/// A classified input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Empty,
    Clear,
    Exit,
    Su,
    Ptools(String),
    Logcat(String),
    Remote(String),
}

impl Line {
    pub fn parse(input: &str) -> Self {
        let line = input.trim();
        match line {
            "" => Line::Empty,
            "clear" => Line::Clear,
            "exit" => Line::Exit,
            "su" | "su -" => Line::Su,
            _ if line.split_whitespace().next() == Some("ptools") => Line::Ptools(line.to_string()),
            _ if line == "logcat" || line.starts_with("logcat ") => Line::Logcat(line.to_string()),
            _ => Line::Remote(line.to_string()),
        }
    }
}

fn is_cd(command: &str) -> bool {
    command == "cd" || command.starts_with("cd ")
}

/// Prefixes `command` with the session directory. A `cd` also prints the
/// resulting directory so the session can follow it.
pub fn build_remote_command(current_path: &str, command: &str) -> String {
    let mut remote = format!("cd {}; {}", shell_quote(current_path), command);
    if is_cd(command) {
        remote.push_str("; pwd");
    }
    remote
}

/// Splits the trailing `pwd` line off a `cd` result.
pub fn split_cd_output(stdout: &str) -> (Option<String>, String) {
    let mut lines: Vec<&str> = stdout.trim().lines().collect();
    match lines.last().map(|line| line.trim()) {
        Some(last) if last.starts_with('/') => {
            let path = last.to_string();
            lines.pop();
            (Some(path), lines.join("\n"))
        }
        _ => (None, stdout.trim().to_string()),
    }
}

pub struct Shell<'a> {
    adb: &'a Adb,
    config: &'a Config,
    session: ShellSession,
}

impl<'a> Shell<'a> {
    pub fn new(adb: &'a Adb, config: &'a Config, device: Device) -> Self {
        Self {
            adb,
            config,
            session: ShellSession::new(device),
        }
    }

    /// Reads and runs lines until `exit`, end of input, an interrupt or a
    /// lost connection.
    pub fn run(&mut self) -> Result<()> {
        self.run_from(&mut console::Stdin)
    }

    pub fn run_from(&mut self, input: &mut impl LineSource) -> Result<()> {
        console::print_success("Shell started");

        loop {
            print!("{}", self.session.prompt());
            io::stdout().flush()?;

            let line = match input.next_line() {
                Ok(Some(line)) => Line::parse(&line),
                Ok(None) => {
                    println!();
                    break;
                }
                Err(err) if console::is_interrupt(&err) => {
                    println!();
                    break;
                }
                Err(err) => return Err(err),
            };

            match self.handle(line) {
                Ok(true) => {}
                Ok(false) => break,
                Err(err) if console::is_interrupt(&err) => {
                    println!();
                    break;
                }
                Err(err) => return Err(err),
            }
        }

        Ok(())
    }

    /// Runs one classified line. Returns false when the loop should end.
    fn handle(&mut self, line: Line) -> Result<bool> {
        match line {
            Line::Empty => {}
            Line::Clear => clear_screen(),
            Line::Exit if self.session.root => self.session.root = false,
            Line::Exit => return Ok(false),
            Line::Su => self.session.root = self.elevate()?,
            Line::Ptools(line) => {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                ptools::dispatch(self.adb, self.config, &mut self.session, &tokens)?;
            }
            Line::Logcat(command) => {
                self.adb
                    .attach(&self.session.device.name, &command, false, false)?;
            }
            Line::Remote(command) => {
                if !self.remote(&command)? {
                    console::print_error("Connection to terminal lost");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn elevate(&self) -> Result<bool> {
        let root = self.adb.has_root(&self.session.device.name)?;
        if !root {
            console::print_error("Root access unavailable");
        }
        Ok(root)
    }

    /// Runs one remote command. Returns false once the device is gone.
    fn remote(&mut self, command: &str) -> Result<bool> {
        let serial = self.session.device.name.as_str();
        let remote = build_remote_command(&self.session.current_path, command);
        let output = self.adb.exec(serial, &remote, self.session.root)?;

        if adb::connection_lost(&output, serial) {
            log::debug!("connection lost: {:?}", output);
            return Ok(false);
        }

        let mut text = output.text().to_string();
        if is_cd(command) {
            let (path, rest) = split_cd_output(&text);
            if let Some(path) = path {
                self.session.current_path = path;
            }
            text = rest;
        }

        if !text.is_empty() {
            println!("{}", text);
        }
        let errors = output.stderr.trim();
        if !errors.is_empty() {
            println!("{}", errors);
        }
        Ok(true)
    }
}

fn clear_screen() {
    let status = if cfg!(windows) {
        Command::new("cmd").args(["/C", "cls"]).status()
    } else {
        Command::new("clear").status()
    };
    if let Err(err) = status {
        log::warn!("clear failed: {}", err);
    }
}
