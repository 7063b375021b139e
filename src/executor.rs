//! The virtual machine.
//!
//! Executes a compiled program against an input stream. One pass through
//! the outer loop is one cycle: fetch the next line, run the body,
//! auto-print unless compiled quiet, branch back to instruction 0. The
//! machine keeps a one-line look-ahead so the `$` address is already
//! known while the current line's cycle runs.
//!
//! Output is staged in an internal byte queue. The blocking driver drains
//! it to a writer after every instruction; the streaming wrapper drains
//! it into the caller's buffer, and whatever does not fit simply stays
//! queued until the next read. End of input is signalled by a sentinel
//! that never escapes this module.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Read, Write};
use std::mem;

use crate::error::RuntimeError;
use crate::types::{Instruction, Program, RangeGuard, RangeState};

/// Internal outcome signals. `EndOfInput` is how a run normally finishes.
#[derive(Debug)]
pub(crate) enum Fault {
    EndOfInput,
    Io(io::Error),
}

impl From<io::Error> for Fault {
    fn from(e: io::Error) -> Self {
        Fault::Io(e)
    }
}

pub(crate) struct Machine<'p, R: BufRead> {
    prog: &'p [Instruction],
    ranges: Vec<RangeState>,
    input: R,
    /// Look-ahead line, without its newline.
    next_line: String,
    /// The pattern space.
    pattern: String,
    /// The hold space.
    hold: String,
    /// Text queued by `a` and `r`, written at the next line fetch.
    appended: Option<String>,
    /// True while the current cycle runs on the last line of input.
    last_line: bool,
    line_no: usize,
    /// Set by a successful substitution, cleared by `t` and line fetch.
    modified: bool,
    ip: usize,
    /// Output staged for the driver to drain.
    pending: VecDeque<u8>,
}

impl<'p, R: BufRead> Machine<'p, R> {
    pub(crate) fn new(prog: &'p Program, input: R) -> Self {
        Self {
            prog: &prog.ins,
            ranges: vec![RangeState::default(); prog.range_slots],
            input,
            next_line: String::new(),
            pattern: String::new(),
            hold: String::new(),
            appended: None,
            last_line: false,
            line_no: 0,
            modified: false,
            ip: 0,
            pending: VecDeque::new(),
        }
    }

    /// Load the look-ahead line so the first cycle already knows whether
    /// it is running on the last line. Rolls the counters back so the
    /// first `FillNext` sees a fresh machine.
    pub(crate) fn prime(&mut self) -> Result<(), Fault> {
        self.fill_next()?;
        self.ip = 0;
        self.line_no = 0;
        Ok(())
    }

    /// Execute the instruction under the instruction pointer.
    pub(crate) fn step(&mut self) -> Result<(), Fault> {
        let prog = self.prog;
        match &prog[self.ip] {
            Instruction::FillNext => self.fill_next(),
            Instruction::FillNextAppend => self.fill_next_append(),
            Instruction::Print => {
                self.ip += 1;
                self.print_pattern();
                Ok(())
            }
            Instruction::PrintFirstLine => {
                self.ip += 1;
                let first = match self.pattern.find('\n') {
                    Some(idx) => &self.pattern[..idx],
                    None => &self.pattern[..],
                };
                let mut bytes = first.as_bytes().to_vec();
                bytes.push(b'\n');
                self.pending.extend(bytes);
                Ok(())
            }
            Instruction::DeleteFirstLine => {
                match self.pattern.find('\n') {
                    Some(idx) => {
                        // partial cycle restart: keep going without
                        // fetching a new line
                        self.pattern.drain(..=idx);
                        self.ip = 1;
                    }
                    None => {
                        self.pattern.clear();
                        self.ip = 0;
                    }
                }
                Ok(())
            }
            Instruction::Quit => Err(Fault::EndOfInput),
            Instruction::Swap => {
                self.ip += 1;
                mem::swap(&mut self.pattern, &mut self.hold);
                Ok(())
            }
            Instruction::Get => {
                self.ip += 1;
                self.pattern.clone_from(&self.hold);
                Ok(())
            }
            Instruction::GetAppend => {
                self.ip += 1;
                self.pattern.push('\n');
                self.pattern.push_str(&self.hold);
                Ok(())
            }
            Instruction::Hold => {
                self.ip += 1;
                self.hold.clone_from(&self.pattern);
                Ok(())
            }
            Instruction::HoldAppend => {
                self.ip += 1;
                self.hold.push('\n');
                self.hold.push_str(&self.pattern);
                Ok(())
            }
            Instruction::LineNo => {
                self.ip += 1;
                let line = format!("{}\n", self.line_no);
                self.pending.extend(line.into_bytes());
                Ok(())
            }
            Instruction::Branch(target) => {
                self.ip = *target;
                Ok(())
            }
            Instruction::ChangedBranch(target) => {
                if self.modified {
                    self.ip = *target;
                    self.modified = false;
                } else {
                    self.ip += 1;
                }
                Ok(())
            }
            Instruction::SimpleCond(guard) => {
                self.ip = if guard.cond.is_met(self.line_no, self.last_line, &self.pattern) {
                    guard.met
                } else {
                    guard.unmet
                };
                Ok(())
            }
            Instruction::RangeCond(guard) => {
                self.range_cond(guard);
                Ok(())
            }
            Instruction::Change { text, slot } => {
                // end this cycle right away, skipping the auto-print
                self.ip = 0;
                let fire = match slot {
                    None => true,
                    Some(s) => self.ranges[*s].is_last_line(self.line_no),
                };
                if fire {
                    self.pending.extend(text.as_bytes().to_vec());
                }
                Ok(())
            }
            Instruction::Append(text) => {
                self.ip += 1;
                match &mut self.appended {
                    Some(queued) => queued.push_str(text),
                    None => self.appended = Some(text.clone()),
                }
                Ok(())
            }
            Instruction::Insert(text) => {
                self.ip += 1;
                self.pending.extend(text.as_bytes().to_vec());
                Ok(())
            }
            Instruction::Write(name) => {
                self.ip += 1;
                let mut file = OpenOptions::new().create(true).append(true).open(name)?;
                file.write_all(self.pattern.as_bytes())?;
                file.write_all(b"\n")?;
                Ok(())
            }
            Instruction::Subst(subst) => {
                self.ip += 1;
                if let Some(rewritten) = subst.apply(&self.pattern) {
                    self.pattern = rewritten;
                    self.modified = true;
                    if subst.prints() {
                        self.print_pattern();
                    }
                }
                Ok(())
            }
        }
    }

    /// Start a cycle: flush queued appended text, promote the look-ahead
    /// line to the pattern space, refill the look-ahead. Reports
    /// `EndOfInput` once no line remains for the pattern space.
    fn fill_next(&mut self) -> Result<(), Fault> {
        if let Some(text) = self.appended.take() {
            self.pending.extend(text.into_bytes());
        }

        if self.last_line {
            return Err(Fault::EndOfInput);
        }

        self.ip += 1;
        self.pattern = mem::take(&mut self.next_line);
        self.line_no += 1;
        self.modified = false;

        let mut buf = String::new();
        let n = self.input.read_line(&mut buf)?;
        if n == 0 {
            // the refill came up empty, so the line now in the pattern
            // space is the last one
            self.last_line = true;
        } else {
            if buf.ends_with('\n') {
                buf.pop();
                if buf.ends_with('\r') {
                    buf.pop();
                }
            }
            self.next_line = buf;
        }
        Ok(())
    }

    /// `N`: join the next line onto the pattern space. At end of input
    /// the cycle just ends; the joined pattern space is not printed.
    fn fill_next_append(&mut self) -> Result<(), Fault> {
        let first = mem::take(&mut self.pattern);
        self.fill_next()?;
        self.pattern = format!("{}\n{}", first, self.pattern);
        Ok(())
    }

    fn range_cond(&mut self, guard: &RangeGuard) {
        let state = &mut self.ranges[guard.slot];

        // the end line itself is inside the range; switch off on the
        // line after it
        if state.is_on && state.off_line > 0 && state.off_line < self.line_no {
            state.is_on = false;
            state.off_line = 0;
        }

        if !state.is_on {
            if guard
                .start
                .is_met(self.line_no, self.last_line, &self.pattern)
            {
                state.is_on = true;
                self.ip = guard.met;
            } else {
                self.ip = guard.unmet;
            }
        } else {
            if guard
                .end
                .is_met(self.line_no, self.last_line, &self.pattern)
            {
                state.off_line = self.line_no;
            }
            self.ip = guard.met;
        }
    }

    fn print_pattern(&mut self) {
        self.pending.extend(self.pattern.as_bytes().to_vec());
        self.pending.push_back(b'\n');
    }

    /// Move staged output into `buf`, returning how many bytes fit.
    fn take_pending(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = self.pending.pop_front() else {
                break;
            };
            buf[n] = byte;
            n += 1;
        }
        n
    }

    /// Write all staged output to `w`.
    fn drain_to<W: Write>(&mut self, w: &mut W) -> io::Result<()> {
        let (head, tail) = self.pending.as_slices();
        w.write_all(head)?;
        w.write_all(tail)?;
        self.pending.clear();
        Ok(())
    }
}

/// Run `prog` over `input` to completion, writing everything to `output`.
/// On failure the output produced so far is still flushed.
pub(crate) fn run_machine<R: BufRead, W: Write>(
    prog: &Program,
    input: R,
    mut output: W,
) -> Result<(), RuntimeError> {
    let mut machine = Machine::new(prog, input);

    let mut failure = match machine.prime() {
        Err(Fault::Io(e)) => Some(e),
        _ => None,
    };

    while failure.is_none() {
        match machine.step() {
            Ok(()) => {
                if !machine.pending.is_empty() {
                    machine.drain_to(&mut output)?;
                }
            }
            Err(Fault::EndOfInput) => break,
            Err(Fault::Io(e)) => failure = Some(e),
        }
    }

    let drained = machine.drain_to(&mut output);
    let flushed = output.flush();
    if let Some(e) = failure {
        return Err(RuntimeError::Io(e));
    }
    drained?;
    flushed?;
    Ok(())
}

/// Build the streaming reader over `prog` and `input`.
pub(crate) fn wrap_machine<R: BufRead>(
    prog: &Program,
    input: R,
) -> Result<ScriptReader<'_, R>, RuntimeError> {
    let mut machine = Machine::new(prog, input);
    match machine.prime() {
        Ok(()) | Err(Fault::EndOfInput) => {}
        Err(Fault::Io(e)) => return Err(RuntimeError::Io(e)),
    }
    Ok(ScriptReader {
        machine,
        done: false,
        failed: None,
    })
}

/// A byte source that runs the program on demand: each `read` executes
/// instructions until the caller's buffer is full or input is exhausted.
/// Created by [`crate::Engine::wrap`].
pub struct ScriptReader<'p, R: BufRead> {
    machine: Machine<'p, R>,
    done: bool,
    failed: Option<io::Error>,
}

impl<R: BufRead> Read for ScriptReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.failed.take() {
            return Err(e);
        }
        if buf.is_empty() {
            return Ok(0);
        }

        let mut filled = self.machine.take_pending(buf);
        while filled < buf.len() && !self.done {
            match self.machine.step() {
                Ok(()) => filled += self.machine.take_pending(&mut buf[filled..]),
                Err(Fault::EndOfInput) => {
                    // the final fetch may still have flushed appended text
                    self.done = true;
                    filled += self.machine.take_pending(&mut buf[filled..]);
                }
                Err(Fault::Io(e)) => {
                    if filled > 0 {
                        // hand back what we have; the error resurfaces on
                        // the next read
                        self.failed = Some(e);
                        break;
                    }
                    return Err(e);
                }
            }
        }
        Ok(filled)
    }
}
