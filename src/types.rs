//! Data model for compiled programs.
//!
//! A compiled script is a flat vector of [`Instruction`]s with absolute
//! jump targets. Address guards become conditional jumps around the code
//! they guard; an address range additionally owns a slot in the machine's
//! per-run range-state table, since whether a range is active depends on
//! the lines seen so far.

use regex_lite::Regex;

use crate::substitute::Substitution;

/// An address: the `1`, `$`, or `/regex/` part of a command. Checking a
/// condition never changes machine state.
#[derive(Debug)]
pub enum Condition {
    /// Matches one specific line number (1-based).
    Line(usize),
    /// `$` — matches the last line of input.
    LastLine,
    /// `/regex/` — matches when the pattern space matches.
    Rx(Regex),
}

impl Condition {
    pub fn is_met(&self, line_no: usize, last_line: bool, pattern: &str) -> bool {
        match self {
            Condition::Line(n) => line_no == *n,
            Condition::LastLine => last_line,
            Condition::Rx(re) => re.is_match(pattern),
        }
    }
}

/// A single-address guard compiled to a conditional jump. One of the two
/// targets is the guarded body, the other skips it; which is which
/// depends on whether the address was inverted with `!`.
#[derive(Debug)]
pub struct SimpleGuard {
    pub cond: Condition,
    pub met: usize,
    pub unmet: usize,
}

/// A two-address `start,end` guard. `slot` indexes the machine's range
/// state table.
#[derive(Debug)]
pub struct RangeGuard {
    pub start: Condition,
    pub end: Condition,
    pub met: usize,
    pub unmet: usize,
    pub slot: usize,
}

/// Per-run activation state for one address range. Owned by the machine
/// and zeroed every time an engine starts a new input, so a compiled
/// program stays immutable and reusable.
#[derive(Debug, Clone, Copy, Default)]
pub struct RangeState {
    /// True from the line the start address matches until the range ends.
    pub is_on: bool,
    /// Line number the end address matched on; 0 until seen. The range
    /// stays on through this line and turns off on the line after it.
    pub off_line: usize,
}

impl RangeState {
    /// True on the final line of an active range. `c` uses this to emit
    /// its replacement text exactly once per range.
    pub fn is_last_line(&self, line_no: usize) -> bool {
        self.is_on && self.off_line == line_no
    }
}

/// One element of the flat program vector.
#[derive(Debug)]
pub enum Instruction {
    /// Start a cycle: flush queued appended text, move the look-ahead
    /// line into the pattern space, refill the look-ahead.
    FillNext,
    /// `N` — like `FillNext`, but joins the new line onto the pattern
    /// space with a newline.
    FillNextAppend,
    /// `p` — write the pattern space and a newline.
    Print,
    /// `P` — write the pattern space up to its first embedded newline.
    PrintFirstLine,
    /// `D` — drop the first line of the pattern space and restart the
    /// body; fetch a new line instead if no newline remains.
    DeleteFirstLine,
    /// `q` — stop the run.
    Quit,
    /// `x` — exchange pattern and hold space.
    Swap,
    /// `g` — overwrite the pattern space with the hold space.
    Get,
    /// `G` — append the hold space to the pattern space.
    GetAppend,
    /// `h` — overwrite the hold space with the pattern space.
    Hold,
    /// `H` — append the pattern space to the hold space.
    HoldAppend,
    /// `=` — write the current line number.
    LineNo,
    /// Unconditional jump to an absolute instruction index.
    Branch(usize),
    /// `t` — jump iff a substitution has fired this cycle, clearing the
    /// flag either way the branch is taken.
    ChangedBranch(usize),
    SimpleCond(SimpleGuard),
    RangeCond(RangeGuard),
    /// `c` — end the cycle without the automatic print; emit the text
    /// when unguarded, or on the last line of the owning range.
    Change { text: String, slot: Option<usize> },
    /// `a` (and `r`, folded in at compile time) — queue text to be
    /// written after the next successful line fetch.
    Append(String),
    /// `i` — write text immediately.
    Insert(String),
    /// `w` — append the pattern space to the named file.
    Write(String),
    /// `s///`.
    Subst(Substitution),
}

/// A fully compiled script.
#[derive(Debug)]
pub struct Program {
    pub ins: Vec<Instruction>,
    /// Number of range-state slots the machine must allocate.
    pub range_slots: usize,
}
