use anyhow::{anyhow, bail, Context, Result};
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Mutex, OnceLock};
use std::thread;
use thiserror::Error;

pub fn print_error(message: impl std::fmt::Display) {
    println!("{} {}", "[ERROR]".red(), message);
}

pub fn print_info(message: impl std::fmt::Display) {
    println!("{} {}", "[INFO]".cyan(), message);
}

pub fn print_warning(message: impl std::fmt::Display) {
    println!("{} {}", "[WARNING]".yellow(), message);
}

pub fn print_success(message: impl std::fmt::Display) {
    println!("{} {}", "[SUCCESS]".green(), message);
}

/// Ctrl+C arrived while waiting for input.
#[derive(Debug, Error)]
#[error("Interrupted")]
pub struct Interrupted;

pub fn is_interrupt(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Interrupted>())
}

/// Where answers come from.
pub trait LineSource {
    /// Next line without its terminator. `None` means end of input.
    fn next_line(&mut self) -> Result<Option<String>>;
}

impl<R: BufRead> LineSource for R {
    fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        if self.read_line(&mut line).context("Failed to read input")? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

enum Event {
    Line(String),
    Eof,
    Interrupt,
}

struct Reader {
    requests: Sender<()>,
    events: Receiver<Event>,
    pending: bool,
}

struct Terminal {
    interrupts: Mutex<Sender<Event>>,
    reader: Mutex<Reader>,
}

static TERMINAL: OnceLock<Terminal> = OnceLock::new();

/// Stdin is read on a helper thread, one line per request, so an attached
/// child never competes with a read-ahead for the terminal.
fn terminal() -> &'static Terminal {
    TERMINAL.get_or_init(|| {
        let (requests, pending_requests) = mpsc::channel::<()>();
        let (events, received) = mpsc::channel();
        let lines = events.clone();

        thread::spawn(move || {
            let stdin = io::stdin();
            for () in pending_requests {
                let event = match stdin.lock().next_line() {
                    Ok(Some(line)) => Event::Line(line),
                    Ok(None) => Event::Eof,
                    Err(err) => {
                        log::warn!("stdin: {:#}", err);
                        Event::Eof
                    }
                };
                if lines.send(event).is_err() {
                    break;
                }
            }
        });

        Terminal {
            interrupts: Mutex::new(events),
            reader: Mutex::new(Reader {
                requests,
                events: received,
                pending: false,
            }),
        }
    })
}

/// Wakes the pending (or next) terminal read with [`Interrupted`].
pub fn interrupt() {
    if let Ok(sender) = terminal().interrupts.lock() {
        let _ = sender.send(Event::Interrupt);
    }
}

/// The process terminal.
pub struct Stdin;

impl LineSource for Stdin {
    fn next_line(&mut self) -> Result<Option<String>> {
        let mut reader = terminal()
            .reader
            .lock()
            .map_err(|_| anyhow!("Terminal reader poisoned"))?;
        if !reader.pending {
            reader.requests.send(()).context("Terminal reader stopped")?;
            reader.pending = true;
        }
        // an interrupt leaves the request pending for the next read
        match reader.events.recv().context("Terminal reader stopped")? {
            Event::Line(line) => {
                reader.pending = false;
                Ok(Some(line))
            }
            Event::Eof => {
                reader.pending = false;
                Ok(None)
            }
            Event::Interrupt => Err(Interrupted.into()),
        }
    }
}

pub fn prompt(question: &str, default: Option<&str>) -> Result<String> {
    prompt_from(&mut Stdin, question, default)
}

pub fn prompt_from(input: &mut impl LineSource, question: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("{} [{}]: ", question, default),
        None => print!("{}: ", question),
    }
    io::stdout().flush()?;

    let answer = input.next_line()?.unwrap_or_default();
    resolve_answer(&answer, default)
}

fn resolve_answer(answer: &str, default: Option<&str>) -> Result<String> {
    let answer = answer.trim();
    if !answer.is_empty() {
        return Ok(answer.to_string());
    }
    match default {
        Some(default) => Ok(default.to_string()),
        None => bail!("The answer is invalid."),
    }
}

pub fn prompt_usize(question: &str, default: Option<usize>) -> Result<usize> {
    let default = default.map(|value| value.to_string());
    let answer = prompt(question, default.as_deref())?;
    answer
        .parse::<usize>()
        .map_err(|_| anyhow::anyhow!("The answer is invalid."))
}

pub fn prompt_bool(question: &str, default: bool) -> Result<bool> {
    prompt_bool_from(&mut Stdin, question, default)
}

pub fn prompt_bool_from(input: &mut impl LineSource, question: &str, default: bool) -> Result<bool> {
    let answer = prompt_from(input, question, Some(if default { "yes" } else { "no" }))?;
    parse_bool(&answer).ok_or_else(|| anyhow::anyhow!("The answer is invalid."))
}

fn parse_bool(answer: &str) -> Option<bool> {
    match answer.to_lowercase().as_str() {
        "y" | "yes" | "1" | "true" => Some(true),
        "n" | "no" | "0" | "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_answer_falls_back_to_default() {
        assert_eq!(resolve_answer("", Some("emulator-5554")).unwrap(), "emulator-5554");
        assert_eq!(resolve_answer("  1 ", Some("0")).unwrap(), "1");
        assert!(resolve_answer("", None).is_err());
    }

    #[test]
    fn bool_answers() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn prompts_read_from_any_source() {
        let mut input = io::Cursor::new("\nYES\r\n");
        assert!(!prompt_bool_from(&mut input, "Stop ADB?", false).unwrap());
        assert!(prompt_bool_from(&mut input, "Stop ADB?", false).unwrap());
        // end of input takes the default
        assert!(!prompt_bool_from(&mut input, "Stop ADB?", false).unwrap());

        let mut input = io::Cursor::new("maybe\n");
        assert!(prompt_bool_from(&mut input, "Stop ADB?", false).is_err());
    }

    #[test]
    fn interrupts_are_recognized_through_context() {
        let err = anyhow::Error::new(Interrupted).context("Select database?");
        assert!(is_interrupt(&err));
        assert!(!is_interrupt(&anyhow!("The answer is invalid.")));
    }
}
