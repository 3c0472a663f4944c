//! Line-oriented operator console for the fleet controller.
//!
//! Reads commands from stdin, runs them against the [`FleetManager`] and prints the
//! outcome. `all` addresses every connected device. `reboot` and `poweroff` ask for a
//! `y/N` confirmation unless given `--yes`.

use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::fleet::{BroadcastReport, FleetManager};

const HELP: &str = "\
commands:
  devices                         connection state of every device
  start <device|all>              enable tracking
  stop <device|all>               disable tracking
  status <device>                 tracking and recording state
  recordings <device>             list recordings, newest first
  download <device> <file> [dir]  fetch a recording (default dir: downloads)
  reboot <device|all> [--yes]     reboot
  poweroff <device|all> [--yes]   power off
  help                            this text
  quit                            leave the console";

/// Which devices a command addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Every connected device
    All,
    /// One device by name
    Device(String),
}

impl Target {
    fn parse(word: &str) -> Self {
        if word.eq_ignore_ascii_case("all") {
            Target::All
        } else {
            Target::Device(word.to_string())
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::All => f.write_str("all connected devices"),
            Target::Device(name) => f.write_str(name),
        }
    }
}

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// List configured devices and their connection state
    Devices,
    /// Enable tracking
    StartTracking(Target),
    /// Disable tracking
    StopTracking(Target),
    /// Query tracking and recording state
    Status(String),
    /// List recordings on a device
    Recordings(String),
    /// Fetch one recording into `dest`
    Download {
        /// Device holding the recording
        device: String,
        /// Recording file name
        filename: String,
        /// Local directory to save into
        dest: PathBuf,
    },
    /// Reboot the host; `confirmed` skips the prompt
    Reboot {
        /// Devices to reboot
        target: Target,
        /// Given `--yes`
        confirmed: bool,
    },
    /// Power off the host; `confirmed` skips the prompt
    PowerOff {
        /// Devices to power off
        target: Target,
        /// Given `--yes`
        confirmed: bool,
    },
    /// Print the command summary
    Help,
    /// Leave the console
    Quit,
}

impl ConsoleCommand {
    /// Question to ask before running a host-level command that was not confirmed.
    pub fn confirmation_prompt(&self) -> Option<String> {
        match self {
            ConsoleCommand::Reboot {
                target,
                confirmed: false,
            } => Some(format!("reboot {}? [y/N] ", target)),
            ConsoleCommand::PowerOff {
                target,
                confirmed: false,
            } => Some(format!("power off {}? [y/N] ", target)),
            _ => None,
        }
    }
}

/// Whether a confirmation answer means yes.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn is_yes_flag(word: &str) -> bool {
    matches!(word, "--yes" | "-y")
}

/// Parse one console line. Blank lines parse to `Ok(None)`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let Some((&verb, args)) = words.split_first() else {
        return Ok(None);
    };

    let command = match (verb.to_ascii_lowercase().as_str(), args) {
        ("devices" | "ls", []) => ConsoleCommand::Devices,
        ("start", [target]) => ConsoleCommand::StartTracking(Target::parse(target)),
        ("stop", [target]) => ConsoleCommand::StopTracking(Target::parse(target)),
        ("status", [device]) => ConsoleCommand::Status(device.to_string()),
        ("recordings", [device]) => ConsoleCommand::Recordings(device.to_string()),
        ("download", [device, filename]) => ConsoleCommand::Download {
            device: device.to_string(),
            filename: filename.to_string(),
            dest: PathBuf::from("downloads"),
        },
        ("download", [device, filename, dest]) => ConsoleCommand::Download {
            device: device.to_string(),
            filename: filename.to_string(),
            dest: PathBuf::from(*dest),
        },
        ("reboot", [target]) => ConsoleCommand::Reboot {
            target: Target::parse(target),
            confirmed: false,
        },
        ("reboot", [target, flag]) if is_yes_flag(flag) => ConsoleCommand::Reboot {
            target: Target::parse(target),
            confirmed: true,
        },
        ("poweroff" | "power_off", [target]) => ConsoleCommand::PowerOff {
            target: Target::parse(target),
            confirmed: false,
        },
        ("poweroff" | "power_off", [target, flag]) if is_yes_flag(flag) => ConsoleCommand::PowerOff {
            target: Target::parse(target),
            confirmed: true,
        },
        ("help" | "?", []) => ConsoleCommand::Help,
        ("quit" | "exit", []) => ConsoleCommand::Quit,
        _ => return Err(format!("cannot parse '{}' (try 'help')", line.trim())),
    };
    Ok(Some(command))
}

/// Run one command and render its outcome as text.
pub async fn execute(manager: &FleetManager, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Devices => {
            let mut out = String::new();
            for (name, status) in manager.statuses() {
                let _ = writeln!(out, "{:<16} {}", name, status);
            }
            if out.is_empty() {
                out.push_str("no devices configured\n");
            }
            out
        }
        ConsoleCommand::StartTracking(Target::All) => render_report("start", manager.start_tracking_all().await),
        ConsoleCommand::StopTracking(Target::All) => render_report("stop", manager.stop_tracking_all().await),
        ConsoleCommand::Reboot {
            target: Target::All, ..
        } => render_report("reboot", manager.reboot_all().await),
        ConsoleCommand::PowerOff {
            target: Target::All, ..
        } => render_report("poweroff", manager.power_off_all().await),
        ConsoleCommand::StartTracking(Target::Device(device)) => {
            render_unit(&device, "tracking enabled", manager.start_tracking(&device).await)
        }
        ConsoleCommand::StopTracking(Target::Device(device)) => {
            render_unit(&device, "tracking disabled", manager.stop_tracking(&device).await)
        }
        ConsoleCommand::Reboot {
            target: Target::Device(device),
            ..
        } => render_unit(&device, "rebooting", manager.reboot(&device).await),
        ConsoleCommand::PowerOff {
            target: Target::Device(device),
            ..
        } => render_unit(&device, "powering off", manager.power_off(&device).await),
        ConsoleCommand::Status(device) => match manager.status(&device).await {
            Ok(status) => format!(
                "{}: tracking {}, {}\n",
                device,
                if status.tracking { "on" } else { "off" },
                if status.recording { "recording" } else { "idle" }
            ),
            Err(e) => format!("{}: {}\n", device, e),
        },
        ConsoleCommand::Recordings(device) => match manager.list_recordings(&device).await {
            Ok(files) if files.is_empty() => format!("{}: no recordings\n", device),
            Ok(files) => {
                let mut out = String::new();
                for file in files {
                    let _ = writeln!(out, "{}", file);
                }
                out
            }
            Err(e) => format!("{}: {}\n", device, e),
        },
        ConsoleCommand::Download {
            device,
            filename,
            dest,
        } => match manager.download_recording(&device, &filename, &dest).await {
            Ok(path) => format!("saved {}\n", path.display()),
            Err(e) => format!("{}: {}\n", device, e),
        },
        ConsoleCommand::Help => format!("{}\n", HELP),
        ConsoleCommand::Quit => String::new(),
    }
}

fn render_unit(device: &str, done: &str, result: crate::fleet::error::Result<()>) -> String {
    match result {
        Ok(()) => format!("{}: {}\n", device, done),
        Err(e) => format!("{}: {}\n", device, e),
    }
}

fn render_report(action: &str, report: BroadcastReport) -> String {
    if report.is_empty() {
        return format!("{}: no connected devices\n", action);
    }
    let mut out = String::new();
    for (device, result) in report {
        match result {
            Ok(()) => {
                let _ = writeln!(out, "{}: {} ok", device, action);
            }
            Err(e) => {
                let _ = writeln!(out, "{}: {} failed: {}", device, action, e);
            }
        }
    }
    out
}

/// Read commands from stdin until `quit`, end of input, or `shutdown`.
pub async fn run(manager: Arc<FleetManager>, shutdown: CancellationToken) -> std::io::Result<()> {
    info!("Operator console ready, type 'help' for commands");
    let mut stdout = tokio::io::stdout();
    session(&manager, BufReader::new(tokio::io::stdin()), &mut stdout, shutdown).await
}

/// Console session over arbitrary input and output streams.
pub async fn session<R, W>(
    manager: &FleetManager,
    input: R,
    output: &mut W,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("Console input closed");
            break;
        };

        let reply = match parse_line(&line) {
            Ok(None) => continue,
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => match command.confirmation_prompt() {
                Some(prompt) => {
                    output.write_all(prompt.as_bytes()).await?;
                    output.flush().await?;
                    let answer = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        answer = lines.next_line() => answer?,
                    };
                    if answer.as_deref().is_some_and(is_affirmative) {
                        execute(manager, command).await
                    } else {
                        "cancelled\n".to_string()
                    }
                }
                None => execute(manager, command).await,
            },
            Err(message) => format!("{}\n", message),
        };
        output.write_all(reply.as_bytes()).await?;
        output.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_targets() {
        assert_eq!(
            parse_line("start all").unwrap(),
            Some(ConsoleCommand::StartTracking(Target::All))
        );
        assert_eq!(
            parse_line("  STOP dock_a ").unwrap(),
            Some(ConsoleCommand::StopTracking(Target::Device("dock_a".into())))
        );
        assert_eq!(parse_line("").unwrap(), None);
    }

    #[test]
    fn parses_download_with_optional_dir() {
        assert_eq!(
            parse_line("download dock_a 2024_01_01.mp4").unwrap(),
            Some(ConsoleCommand::Download {
                device: "dock_a".into(),
                filename: "2024_01_01.mp4".into(),
                dest: PathBuf::from("downloads"),
            })
        );
        assert!(matches!(
            parse_line("download dock_a x.mp4 /tmp/clips").unwrap(),
            Some(ConsoleCommand::Download { dest, .. }) if dest == PathBuf::from("/tmp/clips")
        ));
    }

    #[test]
    fn rejects_wrong_arity() {
        assert!(parse_line("status").is_err());
        assert!(parse_line("reboot a b").is_err());
        assert!(parse_line("dance").is_err());
    }

    #[test]
    fn host_commands_need_confirmation_unless_yes() {
        let reboot = parse_line("reboot all").unwrap().unwrap();
        assert_eq!(
            reboot.confirmation_prompt().as_deref(),
            Some("reboot all connected devices? [y/N] ")
        );
        let power_off = parse_line("poweroff dock_a").unwrap().unwrap();
        assert_eq!(power_off.confirmation_prompt().as_deref(), Some("power off dock_a? [y/N] "));

        assert_eq!(
            parse_line("reboot all --yes").unwrap(),
            Some(ConsoleCommand::Reboot {
                target: Target::All,
                confirmed: true,
            })
        );
        assert_eq!(parse_line("power_off dock_a -y").unwrap().unwrap().confirmation_prompt(), None);
        assert_eq!(parse_line("start all").unwrap().unwrap().confirmation_prompt(), None);
    }

    #[test]
    fn affirmative_answers() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative(" YES "));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative("sure"));
    }

    fn idle_manager() -> FleetManager {
        FleetManager::new(
            &crate::config::FleetConfig::default(),
            Arc::new(crate::fleet::LatestFrameSink::new()),
        )
        .unwrap()
    }

    async fn transcript(manager: &FleetManager, input: &str) -> String {
        let mut output = Vec::new();
        session(manager, input.as_bytes(), &mut output, CancellationToken::new())
            .await
            .unwrap();
        String::from_utf8(output).unwrap()
    }

    #[tokio::test]
    async fn declined_reboot_is_not_sent() {
        let manager = idle_manager();
        let out = transcript(&manager, "reboot all\nn\nquit\n").await;
        assert!(out.contains("reboot all connected devices? [y/N] "));
        assert!(out.contains("cancelled"));
        assert!(!out.contains("no connected devices\n"));

        // end of input at the prompt also declines
        let out = transcript(&manager, "poweroff all\n").await;
        assert!(!out.contains("poweroff: no connected devices"));
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn confirmed_reboot_is_sent() {
        let manager = idle_manager();
        let out = transcript(&manager, "reboot all\ny\n").await;
        assert!(out.contains("reboot: no connected devices"));

        let out = transcript(&manager, "poweroff all --yes\n").await;
        assert!(!out.contains("[y/N]"));
        assert!(out.contains("poweroff: no connected devices"));
        manager.shutdown().await;
    }

    #[test]
    fn renders_broadcast_report() {
        let mut report = BroadcastReport::new();
        report.insert("a".into(), Ok(()));
        report.insert(
            "b".into(),
            Err(crate::fleet::ClientError::Timeout("recv".into())),
        );
        let text = render_report("start", report);
        assert!(text.contains("a: start ok"));
        assert!(text.contains("b: start failed"));
        assert_eq!(render_report("stop", BroadcastReport::new()), "stop: no connected devices\n");
    }
}
