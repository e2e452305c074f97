use std::io::{self, Write};
use std::time::{Duration, Instant};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::style::Print;
use crossterm::{cursor, terminal};
use crate::cli::door_panel::RawModeGuard;
use crate::common::Result;
use crate::core::lockout::{Lockout, SubmitOutcome};

const PIN_LEN: usize = 4;
const COUNTDOWN_TICK: Duration = Duration::from_secs(1);

fn status_line(message: &str) -> io::Result<()> {
    let mut out = io::stdout();
    crossterm::queue!(
        out,
        cursor::MoveToColumn(0),
        terminal::Clear(terminal::ClearType::CurrentLine),
        Print(message),
    )?;
    out.flush()
}

/// Interactive PIN entry driven by `lockout`. Keys typed while locked are
/// submitted but not evaluated; the countdown advances once a second.
/// Returns `false` if the operator cancels with Esc.
pub fn prompt_for_pin(lockout: &mut Lockout) -> Result<bool> {
    let _raw = RawModeGuard::enable()?;
    let mut entered = String::new();
    let mut last_tick = Instant::now();
    status_line("Enter PIN: ")?;

    while !lockout.is_granted() {
        if lockout.is_locked() && last_tick.elapsed() >= COUNTDOWN_TICK {
            last_tick = Instant::now();
            match lockout.tick() {
                Some(remaining) => status_line(&format!("Locked. Try again in {}s", remaining))?,
                None => status_line("Enter PIN: ")?,
            }
        }

        if !event::poll(Duration::from_millis(100))? {
            continue;
        }
        let Event::Key(KeyEvent { code, kind: KeyEventKind::Press, .. }) = event::read()? else {
            continue;
        };

        match code {
            KeyCode::Esc => {
                status_line("Cancelled\r\n")?;
                return Ok(false);
            }
            KeyCode::Backspace => {
                entered.pop();
            }
            KeyCode::Char(c) if c.is_ascii_digit() && entered.len() < PIN_LEN => {
                entered.push(c);
                if !lockout.is_locked() {
                    status_line(&format!("Enter PIN: {}", "*".repeat(entered.len())))?;
                }
            }
            KeyCode::Enter => {
                let pin = std::mem::take(&mut entered);
                match lockout.submit(&pin) {
                    SubmitOutcome::Granted => status_line("Access granted\r\n")?,
                    SubmitOutcome::Denied { attempts } => {
                        status_line(&format!("Wrong PIN ({} strike(s)). Enter PIN: ", attempts))?
                    }
                    SubmitOutcome::LockedOut { remaining_secs } => {
                        last_tick = Instant::now();
                        status_line(&format!("Locked. Try again in {}s", remaining_secs))?
                    }
                    SubmitOutcome::Ignored { .. } => {}
                }
            }
            _ => {}
        }
    }
    Ok(true)
}

/// Non-interactive check of a PIN given on the command line. A single
/// attempt; the lockout cannot span separate invocations.
pub fn check_pin(lockout: &mut Lockout, pin: &str) -> bool {
    matches!(lockout.submit(pin), SubmitOutcome::Granted)
}
