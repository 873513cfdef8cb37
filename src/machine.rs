use std::fmt;

use thiserror::Error;

use crate::opcode::{Catalog, Note, Opcode};

/// The read-only tape a program walks over, normalized to uppercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    chars: Vec<char>,
}

impl Message {
    pub fn new(text: &str) -> Self {
        Self {
            chars: text.to_uppercase().chars().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<char> {
        self.chars.get(index).copied()
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.chars.iter().try_for_each(|c| write!(f, "{c}"))
    }
}

/// Mutable machine registers: tape pointer, accumulator buffer, output log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MachineState {
    pub pointer: usize,
    pub buffer: String,
    pub output: Vec<String>,
}

/// Recoverable conditions raised by an instruction that had no effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Warning {
    /// TAKE with the pointer past the end of the message.
    #[error("pointer ({pointer}) exceeds the message length ({len} characters); TAKE cannot run")]
    PointerOutOfRange { pointer: usize, len: usize },
    /// NEXT with the pointer already on the last letter.
    #[error("pointer is already at the last position ({pointer}); the message has {len} characters")]
    AlreadyAtEnd { pointer: usize, len: usize },
}

/// What the caller should do after a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Continue,
    ContinueWithWarning(Warning),
    Halt,
}

/// Result of executing one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub state: MachineState,
    pub log: String,
    pub signal: Signal,
}

/// Why a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// A HALT instruction was executed.
    Halted,
    /// The last token was executed without a HALT.
    EndOfProgram,
}

/// A complete, undelayed execution of a program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub state: MachineState,
    pub history: Vec<String>,
    pub warnings: Vec<(usize, Warning)>,
    pub reason: FinishReason,
}

/// Executes tokens against a fixed message and catalog.
///
/// `step` is pure: it never mutates the input state, so the same state can
/// be replayed against different tokens in tests.
#[derive(Debug, Clone)]
pub struct Interpreter {
    catalog: Catalog,
    message: Message,
}

impl Interpreter {
    pub fn new(catalog: Catalog, message: Message) -> Self {
        Self { catalog, message }
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Execute a single token.
    pub fn step(&self, token: &str, state: &MachineState) -> Step {
        let len = self.message.len();
        let mut next = state.clone();
        let mut signal = Signal::Continue;

        let note = match Opcode::from_token(token) {
            Some(Opcode::Nop) => Note::Waiting,
            Some(Opcode::Take) => match self.message.get(state.pointer) {
                Some(letter) => {
                    next.buffer.push(letter);
                    Note::Took {
                        letter,
                        buffer: &next.buffer,
                    }
                }
                None => {
                    signal = Signal::ContinueWithWarning(Warning::PointerOutOfRange {
                        pointer: state.pointer,
                        len,
                    });
                    Note::PointerOutOfRange
                }
            },
            Some(Opcode::Next) => {
                if state.pointer + 1 < len {
                    next.pointer += 1;
                    Note::Moved { pointer: next.pointer }
                } else {
                    signal = Signal::ContinueWithWarning(Warning::AlreadyAtEnd {
                        pointer: state.pointer,
                        len,
                    });
                    Note::AlreadyAtEnd
                }
            }
            Some(Opcode::Print) => {
                next.output.push(state.buffer.clone());
                Note::Printed { buffer: &state.buffer }
            }
            Some(Opcode::Send) => {
                next.output.push(format!("SENT: {}", state.buffer));
                Note::Sent { buffer: &state.buffer }
            }
            Some(Opcode::Clr) => {
                next.buffer.clear();
                Note::Cleared { previous: &state.buffer }
            }
            Some(Opcode::Halt) => {
                signal = Signal::Halt;
                Note::Terminated
            }
            None => Note::Unknown { token },
        };
        let log = format!("[{}] {}", token.to_uppercase(), self.catalog.history_line(note));

        Step {
            state: next,
            log,
            signal,
        }
    }

    /// Run a whole program from a fresh state with no pacing.
    pub fn run_to_end(&self, tokens: &[String]) -> Trace {
        let mut state = MachineState::default();
        let mut history = Vec::with_capacity(tokens.len());
        let mut warnings = Vec::new();
        let mut reason = FinishReason::EndOfProgram;

        for (idx, token) in tokens.iter().enumerate() {
            let step = self.step(token, &state);
            state = step.state;
            history.push(step.log);
            match step.signal {
                Signal::Continue => {}
                Signal::ContinueWithWarning(w) => warnings.push((idx, w)),
                Signal::Halt => {
                    reason = FinishReason::Halted;
                    break;
                }
            }
        }

        Trace {
            state,
            history,
            warnings,
            reason,
        }
    }
}
