use anyhow::{anyhow, Context, Result};
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use super::{print_table, template, CommandError};
use crate::adb::Adb;
use crate::config::{Config, DEFAULT_FRIDA_VERSION, FRIDA_RELEASES};
use crate::shell::ShellSession;
use crate::utils::download::{download_file, extract_xz};
use crate::utils::{console, run_attached, run_command, shell_quote, FridaProcess};

pub const SERVER_PATH: &str = "/data/local/tmp/frida-server";
pub const SERVER_DATA_DIR: &str = "/data/local/tmp/re.frida.server";
pub const TOOLCHAIN_PACKAGES: &[&str] = &["frida-tools", "frida"];

const PINNING_V1: &str = include_str!("../../scripts/pinning_v1.js");
const PINNING_V2: &str = include_str!("../../scripts/pinning_v2.js");

const START_POLLS: usize = 5;
const START_POLL_INTERVAL: Duration = Duration::from_millis(500);

const HELP: &[(&str, &str)] = &[
    ("status", "Show running frida processes"),
    ("install <server|pip>", "Install a frida component (root)"),
    ("uninstall <server|pip>", "Remove a frida component (root)"),
    ("start", "Start frida-server (root)"),
    ("stop", "Stop frida-server (root)"),
    ("pinning <package> [1|2]", "Bypass SSL pinning (root)"),
    ("run <script> <package>", "Spawn a package with a script (root)"),
    ("create", "Generate a hook script"),
    ("help", "Show this table"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Server,
    Toolchain,
}

impl Component {
    fn parse(token: &str) -> Result<Self, CommandError> {
        match token {
            "server" => Ok(Component::Server),
            "pip" => Ok(Component::Toolchain),
            other => Err(CommandError::UnknownComponent(other.to_string())),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Component::Server => "Frida (server)",
            Component::Toolchain => "Frida (pip)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinningScript {
    V1,
    V2,
}

impl PinningScript {
    fn source(self) -> &'static str {
        match self {
            PinningScript::V1 => PINNING_V1,
            PinningScript::V2 => PINNING_V2,
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            PinningScript::V1 => "pinning_v1.js",
            PinningScript::V2 => "pinning_v2.js",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FridaCommand {
    Status,
    Install(Component),
    Uninstall(Component),
    Start,
    Stop,
    Pinning { package: String, script: PinningScript },
    Run { script: PathBuf, package: String },
    Create,
    Help,
}

impl FridaCommand {
    /// Parses `ptools frida <verb> ...`.
    pub fn parse(tokens: &[&str]) -> Result<Self, CommandError> {
        let command = match tokens.get(2..).unwrap_or_default() {
            ["status"] => FridaCommand::Status,
            ["install", component] => FridaCommand::Install(Component::parse(component)?),
            ["uninstall", component] => FridaCommand::Uninstall(Component::parse(component)?),
            ["start"] => FridaCommand::Start,
            ["stop"] => FridaCommand::Stop,
            ["pinning", package] | ["pinning", package, "1"] => FridaCommand::Pinning {
                package: package.to_string(),
                script: PinningScript::V1,
            },
            ["pinning", package, "2"] => FridaCommand::Pinning {
                package: package.to_string(),
                script: PinningScript::V2,
            },
            ["run", script, package] => FridaCommand::Run {
                script: PathBuf::from(script),
                package: package.to_string(),
            },
            ["create"] => FridaCommand::Create,
            ["help"] => FridaCommand::Help,
            _ => return Err(CommandError::invalid(tokens)),
        };
        Ok(command)
    }

    fn requires_root(&self) -> bool {
        !matches!(
            self,
            FridaCommand::Status | FridaCommand::Create | FridaCommand::Help
        )
    }

    /// Verbs that work on the device state at all.
    fn probes_state(&self) -> bool {
        !matches!(self, FridaCommand::Create | FridaCommand::Help)
    }
}

/// Snapshot of the frida components and processes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FridaState {
    pub processes: Vec<FridaProcess>,
    pub server: bool,
    pub toolchain: bool,
}

/// What the preconditions allow for a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    Proceed,
    Warning(String),
    Errors(Vec<String>),
}

impl FridaState {
    pub fn probe(adb: &Adb, config: &Config, serial: &str) -> Result<Self> {
        Ok(Self {
            processes: processes(adb, serial)?,
            server: server_installed(adb, serial)?,
            toolchain: toolchain_installed(config),
        })
    }

    pub fn running(&self) -> bool {
        !self.processes.is_empty()
    }

    pub fn installed(&self, component: Component) -> bool {
        match component {
            Component::Server => self.server,
            Component::Toolchain => self.toolchain,
        }
    }

    /// Checks installation, root, process and idempotence preconditions.
    pub fn gate(&self, command: &FridaCommand, root: bool) -> Gate {
        let manages_install = matches!(
            command,
            FridaCommand::Install(_) | FridaCommand::Uninstall(_)
        );
        if command.probes_state() && !manages_install && !(self.server && self.toolchain) {
            let errors = [Component::Server, Component::Toolchain]
                .into_iter()
                .filter(|c| !self.installed(*c))
                .map(|c| format!("{} is not installed", c.label()))
                .collect();
            return Gate::Errors(errors);
        }

        if command.requires_root() && !root {
            return Gate::Errors(vec!["Root permission required".to_string()]);
        }

        match command {
            FridaCommand::Stop if !self.running() => Gate::Warning("Frida is not running".into()),
            FridaCommand::Pinning { .. } | FridaCommand::Run { .. } if !self.running() => {
                Gate::Errors(vec!["Frida is not running".to_string()])
            }
            FridaCommand::Start | FridaCommand::Install(_) | FridaCommand::Uninstall(_)
                if self.running() =>
            {
                Gate::Warning("Frida already running".into())
            }
            FridaCommand::Install(component) if self.installed(*component) => {
                Gate::Warning(format!("{} is already installed", component.label()))
            }
            FridaCommand::Install(Component::Server) if !self.toolchain => {
                Gate::Warning("Frida (pip) must be installed".into())
            }
            FridaCommand::Uninstall(component) if !self.installed(*component) => {
                Gate::Warning(format!("{} is not installed", component.label()))
            }
            _ => Gate::Proceed,
        }
    }
}

pub fn run(adb: &Adb, config: &Config, session: &ShellSession, command: FridaCommand) -> Result<()> {
    let serial = session.device.name.as_str();

    if command.probes_state() {
        let state = FridaState::probe(adb, config, serial)?;
        match state.gate(&command, session.root) {
            Gate::Proceed => {}
            Gate::Warning(message) => {
                console::print_warning(message);
                return Ok(());
            }
            Gate::Errors(messages) => {
                messages.iter().for_each(|m| console::print_error(m));
                return Ok(());
            }
        }
        return execute(adb, config, session, &state, command);
    }

    match command {
        FridaCommand::Create => {
            let hook = template::collect()?;
            let path = template::write_script(&config.scripts_dir(), &hook, &chrono::Local::now())?;
            console::print_success(format!("Script created: {}", path.display()));
        }
        _ => print_table("Available commands:", HELP),
    }
    Ok(())
}

fn execute(
    adb: &Adb,
    config: &Config,
    session: &ShellSession,
    state: &FridaState,
    command: FridaCommand,
) -> Result<()> {
    let serial = session.device.name.as_str();

    match command {
        FridaCommand::Status => {
            if !state.running() {
                console::print_warning("Frida is not running");
                return Ok(());
            }
            console::print_info("Frida process running:");
            println!("{:<10} {:<10} {:<30}", "User", "PID", "Name");
            for p in &state.processes {
                println!("{:<10} {:<10} {:<30}", p.owner_user, p.pid, p.process_name);
            }
        }
        FridaCommand::Install(Component::Toolchain) => {
            for package in TOOLCHAIN_PACKAGES {
                if let Err(err) = run_attached(&config.pip, &["install", *package]) {
                    console::print_error(err);
                    return Ok(());
                }
            }
            report(toolchain_installed(config), "Frida (pip) is installed", "Frida (pip) is not installed");
        }
        FridaCommand::Install(Component::Server) => {
            install_server(adb, config, session)?;
            report(
                server_installed(adb, serial)?,
                "Frida (server) is installed",
                "Frida (server) is not installed",
            );
        }
        FridaCommand::Uninstall(Component::Toolchain) => {
            for package in TOOLCHAIN_PACKAGES {
                if let Err(err) = run_attached(&config.pip, &["uninstall", "-y", *package]) {
                    console::print_error(err);
                    return Ok(());
                }
            }
            report(
                !toolchain_installed(config),
                "Frida (pip) is uninstalled",
                "Frida (pip) is not uninstalled",
            );
        }
        FridaCommand::Uninstall(Component::Server) => {
            adb.su(serial, &format!("rm {}", shell_quote(SERVER_PATH)))?;
            adb.su(serial, &format!("rm -r {}", shell_quote(SERVER_DATA_DIR)))?;
            report(
                !server_installed(adb, serial)?,
                "Frida (server) is uninstalled",
                "Frida (server) is not uninstalled",
            );
        }
        FridaCommand::Start => {
            adb.su(serial, &format!("setsid {} >/dev/null 2>&1 &", SERVER_PATH))?;
            let mut started = false;
            for _ in 0..START_POLLS {
                thread::sleep(START_POLL_INTERVAL);
                if !processes(adb, serial)?.is_empty() {
                    started = true;
                    break;
                }
            }
            report(started, "Frida started", "Frida failed to start");
        }
        FridaCommand::Stop => {
            for p in &state.processes {
                adb.su(serial, &format!("kill -9 {}", p.pid))?;
            }
            report(processes(adb, serial)?.is_empty(), "Frida stopped", "Frida failed to stop");
        }
        FridaCommand::Pinning { package, script } => {
            let path = config.scratch_dir.join(script.file_name());
            fs::create_dir_all(&config.scratch_dir)?;
            fs::write(&path, script.source())
                .with_context(|| format!("Failed to write {}", path.display()))?;

            console::print_success("Bypass SSL pinning started");
            spawn_with_script(config, serial, &path, &package);
            console::print_success("Bypass SSL pinning stopped");
        }
        FridaCommand::Run { script, package } => {
            if !script.is_file() {
                console::print_error(format!("Script not found: {}", script.display()));
                return Ok(());
            }
            console::print_success("Script started");
            spawn_with_script(config, serial, &script, &package);
            console::print_success("Script stopped");
        }
        FridaCommand::Create | FridaCommand::Help => {}
    }
    Ok(())
}

fn report(ok: bool, success: &str, failure: &str) {
    if ok {
        console::print_success(success);
    } else {
        console::print_error(failure);
    }
}

fn install_server(adb: &Adb, config: &Config, session: &ShellSession) -> Result<()> {
    let version = config
        .frida_version
        .clone()
        .or_else(|| local_version(config))
        .unwrap_or_else(|| DEFAULT_FRIDA_VERSION.to_string());
    let arch = server_arch(&session.device.cpu_abi);

    let archive = config
        .scratch_dir
        .join(format!("frida-server-{}-android-{}.xz", version, arch));
    if !archive.exists() {
        download_file(&release_url(&version, &arch), &archive)?;
    }

    let binary = config.scratch_dir.join("frida-server");
    extract_xz(&archive, &binary)?;
    if !binary.exists() {
        return Err(anyhow!("The required file does not exist: {}", binary.display()));
    }

    let serial = session.device.name.as_str();
    let pushed = adb.push(serial, &binary, SERVER_PATH)?;
    if !pushed.success() {
        console::print_error(pushed.combined());
    }
    adb.su(serial, &format!("chmod 755 {}", shell_quote(SERVER_PATH)))?;
    Ok(())
}

/// Spawns `package` under frida with `script` loaded. A frida that cannot be
/// started is reported like a shell would.
fn spawn_with_script(config: &Config, serial: &str, script: &Path, package: &str) {
    let script = script.to_string_lossy();
    let mut args = vec!["-D", serial, "-l", &*script, "-f", package];
    let legacy = local_version(config)
        .and_then(|version| major_version(&version))
        .map_or(true, |major| major < 16);
    if legacy {
        args.push("--no-pause");
    }
    match run_attached(&config.frida, &args) {
        Ok(status) => log::debug!("frida exited with {:?}", status),
        Err(err) => console::print_error(err),
    }
}

/// Release asset name for a device ABI.
pub fn server_arch(abi: &str) -> String {
    match abi {
        "arm64-v8a" => "arm64".to_string(),
        "armeabi-v7a" | "armeabi" => "arm".to_string(),
        "x86" | "x86_64" => abi.to_string(),
        other => other.split('-').next().unwrap_or(other).to_string(),
    }
}

pub fn release_url(version: &str, arch: &str) -> String {
    format!(
        "{}/{}/frida-server-{}-android-{}.xz",
        FRIDA_RELEASES, version, version, arch
    )
}

fn major_version(version: &str) -> Option<u32> {
    version.trim().split('.').next()?.parse().ok()
}

fn local_version(config: &Config) -> Option<String> {
    let output = run_command(&config.frida, &["--version"]).ok()?;
    let version = output.text();
    (output.success() && !version.is_empty()).then(|| version.to_string())
}

/// Parses `ps -A | grep frida` rows into owner, pid and name.
pub fn parse_processes(output: &str) -> Vec<FridaProcess> {
    let re = Regex::new(r"^(\S+)\s+(\d+)\s+.*?(\S+)$").expect("valid ps regex");
    output
        .lines()
        .map(str::trim)
        .filter_map(|line| {
            let caps = re.captures(line)?;
            Some(FridaProcess {
                owner_user: caps[1].to_string(),
                pid: caps[2].parse().ok()?,
                process_name: caps[3].to_string(),
            })
        })
        .collect()
}

fn processes(adb: &Adb, serial: &str) -> Result<Vec<FridaProcess>> {
    let output = adb.shell(serial, "ps -A | grep frida | grep -v grep")?;
    Ok(parse_processes(&output.stdout))
}

fn server_installed(adb: &Adb, serial: &str) -> Result<bool> {
    let output = adb.shell(
        serial,
        &format!("test -f {} && echo installed", shell_quote(SERVER_PATH)),
    )?;
    Ok(output.text() == "installed")
}

/// Lower-cased package names from `pip list`.
pub fn parse_pip_list(output: &str) -> HashSet<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_lowercase)
        .collect()
}

fn toolchain_installed(config: &Config) -> bool {
    match run_command(&config.pip, &["list"]) {
        Ok(output) => {
            let installed = parse_pip_list(&output.stdout);
            TOOLCHAIN_PACKAGES.iter().all(|p| installed.contains(*p))
        }
        Err(err) => {
            log::warn!("pip unavailable: {:#}", err);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(pid: u32) -> FridaProcess {
        FridaProcess {
            owner_user: "root".to_string(),
            pid,
            process_name: "frida-server".to_string(),
        }
    }

    fn installed(processes: Vec<FridaProcess>) -> FridaState {
        FridaState {
            processes,
            server: true,
            toolchain: true,
        }
    }

    #[test]
    fn parse_verbs() {
        assert_eq!(FridaCommand::parse(&["ptools", "frida", "status"]), Ok(FridaCommand::Status));
        assert_eq!(
            FridaCommand::parse(&["ptools", "frida", "install", "pip"]),
            Ok(FridaCommand::Install(Component::Toolchain))
        );
        assert_eq!(
            FridaCommand::parse(&["ptools", "frida", "install", "gadget"]),
            Err(CommandError::UnknownComponent("gadget".to_string()))
        );
        assert_eq!(
            FridaCommand::parse(&["ptools", "frida", "pinning", "com.a"]),
            Ok(FridaCommand::Pinning {
                package: "com.a".to_string(),
                script: PinningScript::V1
            })
        );
        assert_eq!(
            FridaCommand::parse(&["ptools", "frida", "pinning", "com.a", "2"]),
            Ok(FridaCommand::Pinning {
                package: "com.a".to_string(),
                script: PinningScript::V2
            })
        );
        assert_eq!(
            FridaCommand::parse(&["ptools", "frida", "pinning", "com.a", "3"]),
            Err(CommandError::Invalid("ptools frida pinning com.a 3".to_string()))
        );
        assert_eq!(
            FridaCommand::parse(&["ptools", "frida", "run", "hook.js", "com.a"]),
            Ok(FridaCommand::Run {
                script: PathBuf::from("hook.js"),
                package: "com.a".to_string()
            })
        );
        assert!(FridaCommand::parse(&["ptools", "frida", "start", "now"]).is_err());
    }

    #[test]
    fn install_server_twice_warns_the_second_time() {
        let command = FridaCommand::Install(Component::Server);
        let before = FridaState {
            processes: Vec::new(),
            server: false,
            toolchain: true,
        };
        assert_eq!(before.gate(&command, true), Gate::Proceed);

        let after = FridaState {
            server: true,
            ..before
        };
        assert_eq!(
            after.gate(&command, true),
            Gate::Warning("Frida (server) is already installed".to_string())
        );
    }

    #[test]
    fn install_server_needs_toolchain_first() {
        let state = FridaState::default();
        assert_eq!(
            state.gate(&FridaCommand::Install(Component::Server), true),
            Gate::Warning("Frida (pip) must be installed".to_string())
        );
        assert_eq!(state.gate(&FridaCommand::Install(Component::Toolchain), true), Gate::Proceed);
        assert_eq!(
            state.gate(&FridaCommand::Uninstall(Component::Toolchain), true),
            Gate::Warning("Frida (pip) is not installed".to_string())
        );
    }

    #[test]
    fn stop_without_processes_only_warns() {
        assert_eq!(
            installed(Vec::new()).gate(&FridaCommand::Stop, true),
            Gate::Warning("Frida is not running".to_string())
        );
        assert_eq!(installed(vec![process(4242)]).gate(&FridaCommand::Stop, true), Gate::Proceed);
    }

    #[test]
    fn running_server_blocks_start_and_install() {
        let state = installed(vec![process(4242)]);
        for command in [
            FridaCommand::Start,
            FridaCommand::Uninstall(Component::Server),
        ] {
            assert_eq!(
                state.gate(&command, true),
                Gate::Warning("Frida already running".to_string())
            );
        }
    }

    #[test]
    fn root_and_install_requirements() {
        let state = installed(Vec::new());
        assert_eq!(
            state.gate(&FridaCommand::Start, false),
            Gate::Errors(vec!["Root permission required".to_string()])
        );
        assert_eq!(state.gate(&FridaCommand::Status, false), Gate::Proceed);

        let pinning = FridaCommand::Pinning {
            package: "com.a".to_string(),
            script: PinningScript::V1,
        };
        assert_eq!(
            state.gate(&pinning, true),
            Gate::Errors(vec!["Frida is not running".to_string()])
        );

        let missing = FridaState::default();
        assert_eq!(
            missing.gate(&FridaCommand::Status, true),
            Gate::Errors(vec![
                "Frida (server) is not installed".to_string(),
                "Frida (pip) is not installed".to_string(),
            ])
        );
    }

    #[test]
    fn parse_process_table() {
        let output = "root          4242     1   123456   7890 0                   0 S frida-server\n\
                      u0_a123       5151   600   987654  32100 0                   0 S frida-helper-32\r\n\
                      \n";
        assert_eq!(
            parse_processes(output),
            vec![
                process(4242),
                FridaProcess {
                    owner_user: "u0_a123".to_string(),
                    pid: 5151,
                    process_name: "frida-helper-32".to_string(),
                },
            ]
        );
    }

    #[test]
    fn pip_list_names() {
        let output = "Package     Version\n----------- -------\nfrida       16.1.4\nFrida-Tools 12.3.0\n";
        let names = parse_pip_list(output);
        assert!(names.contains("frida"));
        assert!(names.contains("frida-tools"));
        assert!(!names.contains("python-xz"));
    }

    #[test]
    fn release_asset_for_device_abi() {
        assert_eq!(server_arch("arm64-v8a"), "arm64");
        assert_eq!(server_arch("armeabi-v7a"), "arm");
        assert_eq!(server_arch("x86_64"), "x86_64");
        assert_eq!(server_arch("mips-r2"), "mips");
        assert_eq!(
            release_url("15.2.2", "arm64"),
            "https://github.com/frida/frida/releases/download/15.2.2/frida-server-15.2.2-android-arm64.xz"
        );
        assert_eq!(major_version("16.1.4\n"), Some(16));
        assert_eq!(major_version("dev"), None);
    }
}
