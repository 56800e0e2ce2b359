use anyhow::Result;
use regex::Regex;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::path::Path;
use thiserror::Error;

use crate::utils::{console, run_attached, run_command, shell_quote, CommandOutput, Device, SpawnError};

#[derive(Debug, Error)]
pub enum AdbError {
    #[error("adb not found in PATH, install the Android platform tools or pass --adb")]
    NotFound,
    #[error("No device available")]
    NoDevice,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
}

/// Failure texts adb prints when the transport to the device goes away.
const CONNECTION_LOST_MARKERS: &[&str] = &[
    "error: closed",
    "no devices/emulators found",
    "device offline",
];

/// Client for the host `adb` binary.
#[derive(Debug, Clone)]
pub struct Adb {
    program: OsString,
}

impl Adb {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Resolves the adb binary, either as given or from `PATH`.
    pub fn locate(program: &OsStr) -> Result<Self, AdbError> {
        which::which(program)
            .map(Self::new)
            .map_err(|_| AdbError::NotFound)
    }

    pub fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> Result<CommandOutput, AdbError> {
        Ok(run_command(&self.program, args)?)
    }

    /// Runs `command` through the device shell, optionally through `su`.
    pub fn exec(&self, serial: &str, command: &str, root: bool) -> Result<CommandOutput, AdbError> {
        self.run(&shell_args(serial, command, root, false))
    }

    pub fn shell(&self, serial: &str, command: &str) -> Result<CommandOutput, AdbError> {
        self.exec(serial, command, false)
    }

    pub fn su(&self, serial: &str, command: &str) -> Result<CommandOutput, AdbError> {
        self.exec(serial, command, true)
    }

    /// Runs `command` on the device with the local terminal attached.
    pub fn attach(&self, serial: &str, command: &str, root: bool, tty: bool) -> Result<Option<i32>, AdbError> {
        Ok(run_attached(&self.program, &shell_args(serial, command, root, tty))?)
    }

    pub fn push(&self, serial: &str, local: &Path, remote: &str) -> Result<CommandOutput, AdbError> {
        let local = local.to_string_lossy();
        self.run(&["-s", serial, "push", &*local, remote])
    }

    /// Asks `su` for `id` and checks the answer names root.
    pub fn has_root(&self, serial: &str) -> Result<bool> {
        let output = self.su(serial, "id")?;
        Ok(output.text().contains("(root)"))
    }

    pub fn kill_server(&self) -> Result<()> {
        self.run(&["kill-server"])?;
        Ok(())
    }

    /// Attached devices in state `device`, with their build properties.
    pub fn devices(&self) -> Result<Vec<Device>> {
        let listing = self.run(&["devices"])?;
        let mut devices = Vec::new();

        for name in parse_devices(&listing.stdout) {
            let props = parse_getprop(&self.shell(&name, "getprop")?.stdout);
            let property = |key: &str| {
                props
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| "unknown".to_string())
            };
            devices.push(Device {
                sdk_version: property("ro.build.version.sdk"),
                cpu_abi: property("ro.product.cpu.abi"),
                name,
            });
        }

        Ok(devices)
    }
}

fn shell_args(serial: &str, command: &str, root: bool, tty: bool) -> Vec<String> {
    let mut args = vec!["-s".to_string(), serial.to_string(), "shell".to_string()];
    if tty {
        args.push("-t".to_string());
    }
    if root {
        args.push("su".to_string());
        args.push("-c".to_string());
        args.push(shell_quote(command));
    } else {
        args.push(command.to_string());
    }
    args
}

/// Serials of `adb devices` entries that are ready (not `unauthorized`/`offline`).
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|line| !line.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| line.trim_end().split_once('\t'))
        .filter(|(_, state)| state.trim() == "device")
        .map(|(name, _)| name.trim().to_string())
        .collect()
}

pub fn parse_getprop(output: &str) -> HashMap<String, String> {
    let re = Regex::new(r"^\[(.*?)\]: \[(.*?)\]\r?$").expect("valid getprop regex");
    output
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| (caps[1].to_string(), caps[2].to_string()))
        .collect()
}

/// Picks a device by list index or exact name.
pub fn select_device<'a>(devices: &'a [Device], answer: &str) -> Option<&'a Device> {
    devices
        .iter()
        .enumerate()
        .find(|(index, device)| device.name == answer || index.to_string() == answer)
        .map(|(_, device)| device)
}

/// Lists attached devices and asks which one to use.
///
/// `preset` answers the prompt up front. Returns `Ok(None)` when the answer
/// matches no device and `AdbError::NoDevice` when nothing is attached.
pub fn choose_device(adb: &Adb, preset: Option<&str>) -> Result<Option<Device>> {
    let devices = adb.devices()?;
    if devices.is_empty() {
        return Err(AdbError::NoDevice.into());
    }

    console::print_info("List of devices attached:");
    println!("{:<20} {:<10} {:<10}", "Name", "SDK", "Architecture");
    for device in &devices {
        println!(
            "{:<20} {:<10} {:<10}",
            device.name, device.sdk_version, device.cpu_abi
        );
    }

    let answer = match preset {
        Some(answer) => answer.to_string(),
        None => {
            println!();
            console::prompt("Select device?", Some(&devices[0].name))?
        }
    };

    Ok(select_device(&devices, &answer).cloned())
}

/// True when the output shows adb lost its transport to `serial`.
pub fn connection_lost(output: &CommandOutput, serial: &str) -> bool {
    if output.success() {
        return false;
    }
    let text = output.combined();
    let missing = format!("device '{}' not found", serial);
    text.contains(&missing)
        || CONNECTION_LOST_MARKERS
            .iter()
            .any(|marker| text.contains(marker))
}
