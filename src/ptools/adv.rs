use anyhow::Result;
use regex::Regex;

use super::{print_table, wifi, CommandError};
use crate::adb::Adb;
use crate::shell::ShellSession;
use crate::utils::{console, shell_quote, DatabaseFile, Package};

const HELP: &[(&str, &str)] = &[
    ("pkg [filter]", "List installed applications"),
    ("wifi", "Show saved Wi-Fi networks (root)"),
    ("db <package>", "Open an application database (root)"),
    ("switch", "Select another device"),
    ("help", "Show this table"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvCommand {
    Packages(Option<String>),
    Wifi,
    Databases(String),
    Help,
}

impl AdvCommand {
    /// Parses `ptools adv <verb> ...`.
    pub fn parse(tokens: &[&str]) -> Result<Self, CommandError> {
        match tokens.get(2..).unwrap_or_default() {
            ["pkg"] => Ok(AdvCommand::Packages(None)),
            ["pkg", filter] => Ok(AdvCommand::Packages(Some(filter.to_string()))),
            ["wifi"] => Ok(AdvCommand::Wifi),
            ["db", package] => Ok(AdvCommand::Databases(package.to_string())),
            ["help"] => Ok(AdvCommand::Help),
            _ => Err(CommandError::invalid(tokens)),
        }
    }

    fn requires_root(&self) -> bool {
        matches!(self, AdvCommand::Wifi | AdvCommand::Databases(_))
    }
}

pub fn run(adb: &Adb, session: &ShellSession, command: AdvCommand) -> Result<()> {
    if command.requires_root() && !session.root {
        console::print_error("Root permission required");
        return Ok(());
    }

    let serial = session.device.name.as_str();
    match command {
        AdvCommand::Packages(filter) => show_packages(adb, serial, filter.as_deref()),
        AdvCommand::Wifi => wifi::show_networks(adb, serial),
        AdvCommand::Databases(package) => open_database(adb, serial, &package),
        AdvCommand::Help => {
            print_table("Available commands:", HELP);
            Ok(())
        }
    }
}

/// Parses `pm list packages -f` lines of the form
/// `package:/<mode>/.../<name>.apk=<package id>`.
pub fn parse_packages(output: &str) -> Vec<Package> {
    let re = Regex::new(r"^package:/(.*?)/.*/(.*?)\.apk=(.*?)$").expect("valid package regex");
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let caps = re.captures(line)?;
            let package = Package {
                install_mode: caps[1].trim().to_string(),
                name: caps[2].trim().to_string(),
                package_id: caps[3].trim().to_string(),
            };
            if package.install_mode.is_empty() || package.name.is_empty() || package.package_id.is_empty() {
                log::trace!("skipping package line {:?}", line);
                return None;
            }
            Some(package)
        })
        .collect()
}

pub fn filter_packages(packages: Vec<Package>, filter: Option<&str>) -> Vec<Package> {
    match filter {
        Some(filter) => packages.into_iter().filter(|p| p.matches(filter)).collect(),
        None => packages,
    }
}

pub fn list_packages(adb: &Adb, serial: &str) -> Result<Vec<Package>> {
    let output = adb.shell(serial, "pm list packages -f 2>/dev/null")?;
    Ok(parse_packages(&output.stdout))
}

fn show_packages(adb: &Adb, serial: &str, filter: Option<&str>) -> Result<()> {
    let installed = list_packages(adb, serial)?;
    if installed.is_empty() {
        console::print_warning("No app installed");
        return Ok(());
    }

    let packages = filter_packages(installed, filter);
    if packages.is_empty() {
        console::print_error("No app matches");
        return Ok(());
    }

    console::print_info("List of installed applications:");
    println!("{:<20} {:<50} {:<50}", "Mode", "Name", "Package");
    for p in &packages {
        println!("{:<20} {:<50} {:<50}", p.install_mode, p.name, p.package_id);
    }
    Ok(())
}

/// Regular files from an `ls -la` listing. The link count column is absent
/// on old toolbox builds.
pub fn parse_databases(listing: &str) -> Vec<DatabaseFile> {
    let re = Regex::new(
        r"^-r\S*\s+(?:\d+\s+)?\S+\s+\S+\s+(\d+)\s+(\d{4}-\d{2}-\d{2})\s+(\d{2}:\d{2}(?::\d{2})?)\s+(.+)$",
    )
    .expect("valid listing regex");

    listing
        .lines()
        .map(str::trim_end)
        .filter(|line| line.starts_with("-r"))
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(DatabaseFile {
                size: caps[1].parse().ok()?,
                timestamp: format!("{}T{}Z", &caps[2], &caps[3]),
                filename: caps[4].to_string(),
            })
        })
        .collect()
}

fn open_database(adb: &Adb, serial: &str, package: &str) -> Result<()> {
    let installed = list_packages(adb, serial)?;
    if !installed.iter().any(|p| p.package_id == package) {
        console::print_error("No app matches");
        return Ok(());
    }

    let dir = format!("/data/data/{}/databases/", package);
    let listing = adb.su(serial, &format!("ls -la {}", shell_quote(&dir)))?;
    if listing.combined().contains("No such file or directory") {
        console::print_error("No database available");
        return Ok(());
    }

    let databases = parse_databases(&listing.stdout);
    if databases.is_empty() {
        console::print_warning("No database found");
        return Ok(());
    }

    console::print_info("Database available:");
    println!("{:<22} {:<10} {:<30}", "Date", "Size", "File");
    for db in &databases {
        println!("{:<22} {:<10} {:<30}", db.timestamp, db.size, db.filename);
    }

    println!();
    let answer = console::prompt("Select database?", Some(&databases[0].filename))?;
    let Some(selected) = select_database(&databases, &answer) else {
        console::print_error("Invalid database");
        return Ok(());
    };

    let path = format!("{}{}", dir, selected.filename);
    let status = adb.attach(serial, &format!("sqlite3 {}", shell_quote(&path)), true, true)?;
    log::debug!("sqlite3 exited with {:?}", status);
    Ok(())
}

fn select_database<'a>(databases: &'a [DatabaseFile], answer: &str) -> Option<&'a DatabaseFile> {
    databases
        .iter()
        .enumerate()
        .find(|(index, db)| index.to_string() == answer || db.filename == answer)
        .map(|(_, db)| db)
}
