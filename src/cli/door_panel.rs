use std::io::{self, Write};
use std::time::Duration;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use crossterm::{cursor, terminal};
use crate::cli::pin_prompt::prompt_for_pin;
use crate::common::Result;
use crate::core::aggregator::AccessDecision;
use crate::core::lockout::Lockout;
use crate::service::{EnrollmentRequest, StationCommand, StationDisplay};

/// Which door indicators are lit for a decision. An unresolved identity or a
/// door outside `1..=count` lights none.
pub fn lit_doors(count: u32, decision: &AccessDecision) -> Vec<bool> {
    let door = if decision.is_resolved() {
        decision.door_label().trim().parse::<u32>().ok()
    } else {
        None
    };
    (1..=count).map(|d| Some(d) == door).collect()
}

pub struct RawModeGuard;

impl RawModeGuard {
    pub fn enable() -> Result<Self> {
        terminal::enable_raw_mode()?;
        Ok(Self)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
        let _ = crossterm::execute!(io::stdout(), cursor::Show);
    }
}

/// Terminal door panel: the last decision, one indicator per door and a status line.
pub struct DoorPanel {
    door_count: u32,
    last: Option<AccessDecision>,
    status: String,
    _raw: RawModeGuard,
}

impl DoorPanel {
    pub fn new(door_count: u32) -> Result<Self> {
        let raw = RawModeGuard::enable()?;
        crossterm::execute!(io::stdout(), terminal::Clear(terminal::ClearType::All), cursor::Hide)?;
        let panel = Self {
            door_count,
            last: None,
            status: String::new(),
            _raw: raw,
        };
        panel.render();
        Ok(panel)
    }

    fn render(&self) {
        if let Err(e) = self.draw(&mut io::stdout()) {
            tracing::warn!("Failed to draw door panel: {}", e);
        }
    }

    fn draw(&self, out: &mut impl Write) -> io::Result<()> {
        let (name, level, job) = match &self.last {
            Some(d) => (
                d.name.as_str(),
                d.permission_label(),
                d.job_status.map(|j| j.to_string()).unwrap_or_default(),
            ),
            None => ("-", "-".to_string(), String::new()),
        };

        crossterm::queue!(
            out,
            cursor::MoveTo(0, 0),
            terminal::Clear(terminal::ClearType::All),
            Print(format!("Name:        {}\r\n", name)),
            Print(format!("Permission:  {}\r\n", level)),
            Print(format!("Job status:  {}\r\n\r\n", job)),
        )?;

        let lit = match &self.last {
            Some(d) => lit_doors(self.door_count, d),
            None => vec![false; self.door_count as usize],
        };
        for (i, on) in lit.iter().enumerate() {
            let color = if *on { Color::Green } else { Color::DarkGrey };
            crossterm::queue!(
                out,
                SetForegroundColor(color),
                Print(format!(" [Door {}] ", i + 1)),
                ResetColor,
            )?;
        }

        crossterm::queue!(
            out,
            Print(format!("\r\n\r\n{}\r\n", self.status)),
            Print("t: train   e: enroll   q/Esc: quit\r\n"),
        )?;
        out.flush()
    }
}

impl StationDisplay for DoorPanel {
    fn show_decision(&mut self, decision: &AccessDecision) {
        self.last = Some(decision.clone());
        self.render();
    }

    fn show_status(&mut self, status: &str) {
        self.status = status.to_string();
        self.render();
    }

    fn poll_command(&mut self) -> Result<Option<StationCommand>> {
        if !event::poll(Duration::from_millis(0))? {
            return Ok(None);
        }
        let command = match event::read()? {
            Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) => match code {
                KeyCode::Char('t') => Some(StationCommand::Train),
                KeyCode::Char('e') => Some(StationCommand::Enroll),
                KeyCode::Char('q') | KeyCode::Esc => Some(StationCommand::Quit),
                _ => None,
            },
            _ => None,
        };
        Ok(command)
    }

    fn enrollment_request(&mut self, lockout: &mut Lockout) -> Result<Option<EnrollmentRequest>> {
        crossterm::execute!(io::stdout(), cursor::MoveTo(0, 0), terminal::Clear(terminal::ClearType::All))?;
        let granted = prompt_for_pin(lockout)?;

        // The PIN prompt leaves raw mode; the edit line is read cooked.
        let request = if granted {
            crossterm::execute!(
                io::stdout(),
                cursor::Show,
                Print("add <name> <image>...  |  delete <name> <file>...  (empty line cancels)\n> "),
            )?;
            let mut line = String::new();
            io::stdin().read_line(&mut line)?;
            let request = EnrollmentRequest::parse(&line);
            if request.is_none() && !line.trim().is_empty() {
                tracing::warn!("Unrecognised enrollment command: {}", line.trim());
            }
            request
        } else {
            None
        };

        terminal::enable_raw_mode()?;
        crossterm::execute!(io::stdout(), cursor::Hide)?;
        self.render();
        Ok(request)
    }
}

/// Plain line-per-event output for replays and non-interactive runs.
pub struct LogDisplay {
    door_count: u32,
}

impl LogDisplay {
    pub fn new(door_count: u32) -> Self {
        Self { door_count }
    }
}

impl StationDisplay for LogDisplay {
    fn show_decision(&mut self, decision: &AccessDecision) {
        let doors: Vec<String> = lit_doors(self.door_count, decision)
            .iter()
            .enumerate()
            .filter(|(_, on)| **on)
            .map(|(i, _)| (i + 1).to_string())
            .collect();
        println!(
            "{}  level={}  door={}  ({} frames)",
            decision.name,
            decision.permission_label(),
            if doors.is_empty() { "none".to_string() } else { doors.join(",") },
            decision.count
        );
    }

    fn show_status(&mut self, status: &str) {
        tracing::info!("{}", status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{AccessLevel, JobStatus};

    fn decision(door: Option<&str>) -> AccessDecision {
        AccessDecision {
            name: "alice".into(),
            count: 40,
            job_status: door.map(|_| JobStatus::Manager),
            permission_level: door.map(|_| AccessLevel::default()),
            door_number: door.map(str::to_string),
        }
    }

    #[test]
    fn authorised_door_is_lit() {
        assert_eq!(lit_doors(3, &decision(Some("2"))), vec![false, true, false]);
    }

    #[test]
    fn unresolved_identity_resets_all_doors() {
        assert_eq!(lit_doors(3, &decision(None)), vec![false; 3]);
        assert_eq!(lit_doors(3, &decision(Some("7"))), vec![false; 3]);
    }
}
