use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::machine::{FinishReason, Interpreter, MachineState, Message, Signal, Warning};
use crate::opcode::{Catalog, Locale};
use crate::parser::{listing, parse};
use crate::presets::preset;

/// Upper bound for the pause between two instructions.
pub const MAX_STEP_DELAY_MS: u64 = 2000;

/// Configuration for a stepped execution session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Pause between instructions, in milliseconds (0 to 2000).
    pub step_delay_ms: u64,
    /// Language for catalog labels and history lines.
    pub locale: Locale,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 1000,
            locale: Locale::En,
        }
    }
}

/// Errors returned by session inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a program is running; reset before changing inputs")]
    Busy,
    #[error("step delay {0}ms is outside 0..=2000ms")]
    DelayOutOfRange(u64),
    #[error("no example {0}; examples are numbered 1 to 3")]
    UnknownExample(usize),
}

/// Everything the presentation layer shows, captured at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub pointer: usize,
    pub buffer: String,
    pub output: Vec<String>,
    pub history: Vec<String>,
    /// Index of the token being executed, if a run is in progress.
    pub current: Option<usize>,
    pub running: bool,
}

/// Notifications sent from the worker to whoever renders the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// State after a step, a run start, or a reset.
    Snapshot(Snapshot),
    /// An instruction at `index` could not take effect.
    Warning { index: usize, warning: Warning },
    /// The run stopped on its own (not by reset).
    Finished(FinishReason),
}

struct Inner {
    message: Message,
    program: String,
    step_delay: Duration,
    machine: MachineState,
    history: Vec<String>,
    current: Option<usize>,
    running: bool,
    /// Bumped by every run and reset. A worker only touches state while
    /// this still equals the value it was started with.
    generation: u64,
    events: mpsc::Sender<Event>,
    /// Thread of the most recently started run, stored under the same lock
    /// that bumped `generation`.
    worker: Option<JoinHandle<()>>,
}

impl Inner {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            pointer: self.machine.pointer,
            buffer: self.machine.buffer.clone(),
            output: self.machine.output.clone(),
            history: self.history.clone(),
            current: self.current,
            running: self.running,
        }
    }

    fn emit(&self, event: Event) {
        // A dropped receiver just means nobody is watching.
        let _ = self.events.send(event);
    }

    fn publish(&self) {
        self.emit(Event::Snapshot(self.snapshot()));
    }

    fn clear(&mut self) {
        self.generation += 1;
        self.machine = MachineState::default();
        self.history.clear();
        self.current = None;
        self.running = false;
    }
}

struct Shared {
    inner: Mutex<Inner>,
    wake: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single-user session: one message, one program, at most one run.
///
/// Runs execute on a background thread. After every instruction the worker
/// publishes an [`Event::Snapshot`]; between instructions it sleeps for the
/// configured delay on a condition variable that [`Session::reset`] wakes,
/// so a reset always wins against a step that was already scheduled.
pub struct Session {
    catalog: Catalog,
    shared: Arc<Shared>,
}

impl Session {
    /// Create an idle session and the receiving end of its event channel.
    pub fn new(config: RunnerConfig) -> Result<(Self, mpsc::Receiver<Event>), SessionError> {
        let step_delay = validate_delay(config.step_delay_ms)?;
        let (tx, rx) = mpsc::channel();
        let inner = Inner {
            message: Message::default(),
            program: String::new(),
            step_delay,
            machine: MachineState::default(),
            history: Vec::new(),
            current: None,
            running: false,
            generation: 0,
            events: tx,
            worker: None,
        };
        let session = Self {
            catalog: Catalog::new(config.locale),
            shared: Arc::new(Shared {
                inner: Mutex::new(inner),
                wake: Condvar::new(),
            }),
        };
        Ok((session, rx))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.lock().snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn message(&self) -> Message {
        self.shared.lock().message.clone()
    }

    pub fn program_text(&self) -> String {
        self.shared.lock().program.clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        parse(&self.shared.lock().program)
    }

    /// The loaded program rendered one instruction per line.
    pub fn listing(&self) -> String {
        listing(&self.tokens(), &self.catalog)
    }

    pub fn step_delay(&self) -> Duration {
        self.shared.lock().step_delay
    }

    pub fn set_message(&self, text: &str) -> Result<(), SessionError> {
        let mut inner = self.idle()?;
        inner.message = Message::new(text);
        Ok(())
    }

    pub fn set_program(&self, text: &str) -> Result<(), SessionError> {
        let mut inner = self.idle()?;
        inner.program = text.to_string();
        Ok(())
    }

    pub fn set_step_delay(&self, ms: u64) -> Result<(), SessionError> {
        let delay = validate_delay(ms)?;
        let mut inner = self.idle()?;
        inner.step_delay = delay;
        Ok(())
    }

    /// Reset, then seed message and program from preset `index` (1-based).
    pub fn load_example(&self, index: usize) -> Result<(), SessionError> {
        let p = preset(index).ok_or(SessionError::UnknownExample(index))?;
        let mut inner = self.shared.lock();
        inner.clear();
        inner.message = Message::new(p.message);
        inner.program = p.program.to_string();
        inner.publish();
        drop(inner);
        self.shared.wake.notify_all();
        debug!(index, "loaded example");
        Ok(())
    }

    /// Start executing the loaded program. Returns `false` if a run is
    /// already in progress.
    pub fn run(&self) -> bool {
        let mut inner = self.shared.lock();
        if inner.running {
            return false;
        }
        inner.clear();
        inner.running = true;
        inner.publish();

        let generation = inner.generation;
        let tokens = parse(&inner.program);
        let delay = inner.step_delay;
        let interp = Interpreter::new(self.catalog, inner.message.clone());

        info!(
            instructions = tokens.len(),
            delay_ms = delay.as_millis() as u64,
            "run started"
        );
        // The worker blocks on the lock until the handle is stored.
        let shared = Arc::clone(&self.shared);
        inner.worker = Some(thread::spawn(move || {
            worker_loop(&shared, &interp, &tokens, delay, generation);
        }));
        true
    }

    /// Clear all machine state and cancel any in-flight run.
    pub fn reset(&self) {
        let mut inner = self.shared.lock();
        let was_running = inner.running;
        inner.clear();
        inner.publish();
        drop(inner);
        self.shared.wake.notify_all();
        if was_running {
            info!("run cancelled by reset");
        }
    }

    /// Block until the most recently started worker thread has exited.
    pub fn wait(&self) {
        let handle = self.shared.lock().worker.take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }

    fn idle(&self) -> Result<MutexGuard<'_, Inner>, SessionError> {
        let inner = self.shared.lock();
        if inner.running {
            return Err(SessionError::Busy);
        }
        Ok(inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stop a paced run instead of leaving it sleeping in the background.
        self.reset();
    }
}

fn validate_delay(ms: u64) -> Result<Duration, SessionError> {
    if ms > MAX_STEP_DELAY_MS {
        return Err(SessionError::DelayOutOfRange(ms));
    }
    Ok(Duration::from_millis(ms))
}

/// Worker thread: execute tokens in order, pausing between them.
fn worker_loop(
    shared: &Shared,
    interp: &Interpreter,
    tokens: &[String],
    delay: Duration,
    generation: u64,
) {
    let mut reason = FinishReason::EndOfProgram;

    for (idx, token) in tokens.iter().enumerate() {
        let mut inner = shared.lock();
        if inner.generation != generation {
            debug!(index = idx, "stale run discarded");
            return;
        }

        inner.current = Some(idx);
        let step = interp.step(token, &inner.machine);
        inner.machine = step.state;
        inner.history.push(step.log);
        if let Signal::ContinueWithWarning(warning) = &step.signal {
            warn!(index = idx, %warning, "instruction had no effect");
            inner.emit(Event::Warning {
                index: idx,
                warning: warning.clone(),
            });
        }
        inner.publish();

        if step.signal == Signal::Halt {
            reason = FinishReason::Halted;
            break;
        }
        if idx + 1 == tokens.len() {
            break;
        }

        // Cancellable pause: reset bumps the generation and wakes us.
        let deadline = Instant::now() + delay;
        loop {
            if inner.generation != generation {
                debug!(index = idx, "run cancelled during delay");
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _) = shared
                .wake
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
        }
    }

    let mut inner = shared.lock();
    if inner.generation != generation {
        return;
    }
    inner.current = None;
    inner.running = false;
    inner.publish();
    inner.emit(Event::Finished(reason));
    info!(?reason, steps = inner.history.len(), "run finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(delay_ms: u64) -> (Session, mpsc::Receiver<Event>) {
        Session::new(RunnerConfig {
            step_delay_ms: delay_ms,
            ..Default::default()
        })
        .unwrap()
    }

    fn wait_for_history(rx: &mpsc::Receiver<Event>, len: usize) {
        loop {
            match rx.recv_timeout(Duration::from_secs(5)) {
                Ok(Event::Snapshot(s)) if s.history.len() >= len => return,
                Ok(_) => {}
                Err(e) => panic!("no snapshot with {len} history lines: {e}"),
            }
        }
    }

    #[test]
    fn test_new_session_is_idle() {
        let (s, _rx) = session(0);
        assert_eq!(s.snapshot(), Snapshot::default());
        assert!(!s.is_running());
    }

    #[test]
    fn test_config_rejects_long_delay() {
        let result = Session::new(RunnerConfig {
            step_delay_ms: 2001,
            ..Default::default()
        });
        assert_eq!(result.err(), Some(SessionError::DelayOutOfRange(2001)));
    }

    #[test]
    fn test_run_sos_to_completion() {
        let (s, rx) = session(0);
        s.load_example(2).unwrap();
        assert!(s.run());
        s.wait();

        let snap = s.snapshot();
        assert_eq!(snap.output, vec!["SOS", "SENT: SOS"]);
        assert_eq!(snap.buffer, "SOS");
        assert_eq!(snap.pointer, 2);
        assert_eq!(snap.history.len(), 8);
        assert_eq!(snap.current, None);
        assert!(!snap.running);

        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(events.last(), Some(&Event::Finished(FinishReason::Halted)));
    }

    #[test]
    fn test_snapshots_follow_program_order() {
        let (s, rx) = session(0);
        s.load_example(3).unwrap();
        s.run();
        s.wait();

        let currents: Vec<usize> = rx
            .try_iter()
            .filter_map(|e| match e {
                Event::Snapshot(snap) => snap.current,
                _ => None,
            })
            .collect();
        assert_eq!(currents, (0..7).collect::<Vec<_>>());
        assert_eq!(s.snapshot().output, vec!["T", "E"]);
    }

    #[test]
    fn test_halt_skips_remaining_instructions() {
        let (s, _rx) = session(0);
        s.set_message("AB").unwrap();
        s.set_program("0x01 0xff 0x03 0x04").unwrap();
        s.run();
        s.wait();
        let snap = s.snapshot();
        assert_eq!(snap.history.len(), 2);
        assert!(snap.output.is_empty());
    }

    #[test]
    fn test_empty_program_finishes() {
        let (s, rx) = session(0);
        assert!(s.run());
        s.wait();
        assert!(!s.is_running());
        let events: Vec<Event> = rx.try_iter().collect();
        assert_eq!(events.last(), Some(&Event::Finished(FinishReason::EndOfProgram)));
    }

    #[test]
    fn test_warning_is_reported_and_run_continues() {
        let (s, rx) = session(0);
        s.set_message("a").unwrap();
        s.set_program("0x02 0x01 0x03").unwrap();
        s.run();
        s.wait();

        let warnings: Vec<(usize, Warning)> = rx
            .try_iter()
            .filter_map(|e| match e {
                Event::Warning { index, warning } => Some((index, warning)),
                _ => None,
            })
            .collect();
        assert_eq!(
            warnings,
            vec![(0, Warning::AlreadyAtEnd { pointer: 0, len: 1 })]
        );
        assert_eq!(s.snapshot().output, vec!["A"]);
    }

    #[test]
    fn test_run_is_single_flight() {
        let (s, rx) = session(MAX_STEP_DELAY_MS);
        s.load_example(1).unwrap();
        assert!(s.run());
        assert!(!s.run());
        wait_for_history(&rx, 1);
        s.reset();
        s.wait();
    }

    #[test]
    fn test_inputs_locked_while_running() {
        let (s, _rx) = session(MAX_STEP_DELAY_MS);
        s.load_example(2).unwrap();
        s.run();
        assert_eq!(s.set_message("X"), Err(SessionError::Busy));
        assert_eq!(s.set_program("0x00"), Err(SessionError::Busy));
        assert_eq!(s.set_step_delay(0), Err(SessionError::Busy));
        s.reset();
        s.wait();
        assert_eq!(s.set_step_delay(0), Ok(()));
        assert_eq!(s.message().to_string(), "SOS");
    }

    #[test]
    fn test_reset_cancels_pending_step() {
        let (s, rx) = session(MAX_STEP_DELAY_MS);
        s.set_message("AB").unwrap();
        s.set_program("0x01 0x02 0x01 0x03").unwrap();
        s.run();
        wait_for_history(&rx, 1);

        s.reset();
        s.wait();

        assert_eq!(s.snapshot(), Snapshot::default());
        // Nothing from the cancelled run arrives after the reset snapshot.
        let rest: Vec<Event> = rx.try_iter().collect();
        assert_eq!(rest.last(), Some(&Event::Snapshot(Snapshot::default())));
    }

    #[test]
    fn test_fresh_run_after_reset() {
        let (s, rx) = session(MAX_STEP_DELAY_MS);
        s.load_example(2).unwrap();
        s.run();
        wait_for_history(&rx, 1);
        s.reset();
        s.set_step_delay(0).unwrap();
        assert!(s.run());
        s.wait();
        assert_eq!(s.snapshot().output, vec!["SOS", "SENT: SOS"]);
    }

    #[test]
    fn test_delay_paces_steps_but_not_after_last() {
        let (s, _rx) = session(100);
        s.set_program("0x00 0x00 0x00").unwrap();
        let start = Instant::now();
        s.run();
        s.wait();
        let elapsed = start.elapsed();
        // Two pauses between three instructions, none after the last.
        assert!(elapsed >= Duration::from_millis(200), "finished too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "paused after last step: {elapsed:?}");
        assert_eq!(s.snapshot().history.len(), 3);
    }

    #[test]
    fn test_reset_wakes_worker_from_delay() {
        let (s, rx) = session(MAX_STEP_DELAY_MS);
        s.set_message("AB").unwrap();
        s.set_program("0x01 0x02 0x01").unwrap();
        s.run();
        wait_for_history(&rx, 1);

        let start = Instant::now();
        s.reset();
        s.wait();
        let elapsed = start.elapsed();
        assert!(elapsed < Duration::from_millis(500), "worker slept through reset: {elapsed:?}");
        assert_eq!(s.snapshot(), Snapshot::default());
    }

    #[test]
    fn test_wait_joins_latest_run_under_contention() {
        let (s, _rx) = session(0);
        s.load_example(2).unwrap();
        thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..25 {
                        s.reset();
                        s.run();
                    }
                });
            }
        });
        s.wait();
        let snap = s.snapshot();
        assert!(!snap.running);
        assert_eq!(snap.output, vec!["SOS", "SENT: SOS"]);
    }

    #[test]
    fn test_run_starts_from_clean_state() {
        let (s, _rx) = session(0);
        s.load_example(2).unwrap();
        s.run();
        s.wait();
        s.run();
        s.wait();
        assert_eq!(s.snapshot().output, vec!["SOS", "SENT: SOS"]);
    }

    #[test]
    fn test_load_example_resets_state() {
        let (s, _rx) = session(0);
        s.load_example(2).unwrap();
        s.run();
        s.wait();
        s.load_example(3).unwrap();
        assert_eq!(s.snapshot(), Snapshot::default());
        assert_eq!(s.message().to_string(), "TEST");
        assert_eq!(s.tokens().len(), 7);
    }

    #[test]
    fn test_unknown_example() {
        let (s, _rx) = session(0);
        assert_eq!(s.load_example(0), Err(SessionError::UnknownExample(0)));
        assert_eq!(s.load_example(4), Err(SessionError::UnknownExample(4)));
    }

    #[test]
    fn test_set_step_delay_bounds() {
        let (s, _rx) = session(0);
        assert_eq!(s.set_step_delay(2000), Ok(()));
        assert_eq!(s.step_delay(), Duration::from_millis(2000));
        assert_eq!(s.set_step_delay(2001), Err(SessionError::DelayOutOfRange(2001)));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (s, _rx) = session(0);
        s.reset();
        s.reset();
        assert_eq!(s.snapshot(), Snapshot::default());
    }
}
