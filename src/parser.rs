//! Parser / compiler.
//!
//! Consumes the token stream and emits a flat instruction vector with all
//! jumps resolved to absolute indices. Address guards compile to
//! conditional jumps around the code they guard: the guard is emitted
//! first with one target unknown, the body follows, and the open target
//! is patched to the next free index once the body's length is known.
//! Branches to labels are recorded as placeholders and rewritten in a
//! second pass, so forward references cost nothing at run time.
//!
//! The program always begins with `FillNext` and ends with the auto-print
//! tail (`Print` is dropped from the tail, and from `n`/`q`, when
//! compiling quiet). A reserved label containing a space names the tail,
//! which is what an empty branch target resolves to.

use std::collections::HashMap;
use std::fs;

use regex_lite::Regex;

use crate::error::ParseError;
use crate::lexer::{Location, Token, TokenKind};
use crate::substitute::Substitution;
use crate::types::{Condition, Instruction, Program, RangeGuard, SimpleGuard};

/// Branch target meaning "after the last user instruction". The space
/// makes a collision with user labels impossible.
pub const END_OF_PROGRAM_LABEL: &str = "the end";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BranchKind {
    /// `b` — always taken.
    Always,
    /// `t` — taken when the modified flag is set.
    OnChange,
}

/// A branch whose label has not been resolved yet; `ip` holds a
/// placeholder instruction until the second pass.
#[derive(Debug)]
struct PendingBranch {
    ip: usize,
    label: String,
    kind: BranchKind,
    location: Location,
}

pub struct Parser<I: Iterator<Item = Token>> {
    tokens: I,
    quiet: bool,
    ins: Vec<Instruction>,
    branches: Vec<PendingBranch>,
    labels: HashMap<String, usize>,
    block_level: usize,
    range_slots: usize,
    last_loc: Location,
}

impl<I: Iterator<Item = Token>> Parser<I> {
    pub fn new(tokens: I, quiet: bool) -> Self {
        Self {
            tokens,
            quiet,
            ins: Vec::new(),
            branches: Vec::new(),
            labels: HashMap::new(),
            block_level: 0,
            range_slots: 0,
            last_loc: Location::start(),
        }
    }

    pub fn parse(mut self) -> Result<Program, ParseError> {
        self.ins.push(Instruction::FillNext);
        self.top_level()?;
        if self.block_level > 0 {
            return Err(ParseError::new("missing a closing brace", self.last_loc));
        }

        self.labels
            .insert(END_OF_PROGRAM_LABEL.to_string(), self.ins.len());
        if !self.quiet {
            self.ins.push(Instruction::Print);
        }
        self.ins.push(Instruction::Branch(0));

        self.resolve_branches()?;

        Ok(Program {
            ins: self.ins,
            range_slots: self.range_slots,
        })
    }

    fn next_token(&mut self) -> Option<Token> {
        let token = self.tokens.next();
        if let Some(ref t) = token {
            self.last_loc = t.location;
        }
        token
    }

    fn must_next(&mut self) -> Result<Token, ParseError> {
        self.next_token()
            .ok_or_else(|| ParseError::new("unexpected end of script", self.last_loc))
    }

    fn top_level(&mut self) -> Result<(), ParseError> {
        while let Some(token) = self.next_token() {
            match token.kind {
                TokenKind::Eol => {}
                TokenKind::Label(name) => self.define_label(name, token.location)?,
                TokenKind::Num(_) | TokenKind::Dollar | TokenKind::Rx(_) => {
                    let cond = self.condition(token)?;
                    self.compile_cond(cond)?;
                }
                TokenKind::RBrace => {
                    if self.block_level == 0 {
                        return Err(ParseError::new("unexpected `}`", token.location));
                    }
                    self.block_level -= 1;
                    return Ok(());
                }
                _ => self.compile_cmd(token)?,
            }
        }
        Ok(())
    }

    /// Turn an address token into a condition.
    fn condition(&mut self, token: Token) -> Result<Condition, ParseError> {
        match token.kind {
            TokenKind::Num(digits) => {
                let n: usize = digits.parse().map_err(|_| {
                    ParseError::new(format!("bad number <{digits}>"), token.location)
                })?;
                Ok(Condition::Line(n))
            }
            TokenKind::Dollar => Ok(Condition::LastLine),
            TokenKind::Rx(pattern) => {
                let re = Regex::new(&pattern).map_err(|e| {
                    ParseError::new(format!("bad regex: {e}"), token.location)
                })?;
                Ok(Condition::Rx(re))
            }
            _ => Err(ParseError::new("expected an address", token.location)),
        }
    }

    /// Compile a command guarded by a single address. The token after the
    /// address decides the shape: `,` makes a range, `!` inverts the
    /// guard, anything else is the guarded body itself.
    fn compile_cond(&mut self, cond: Condition) -> Result<(), ParseError> {
        let token = self.must_next()?;
        match token.kind {
            TokenKind::Comma => self.compile_range(cond),
            TokenKind::Bang => {
                let body = self.must_next()?;
                let guard_ip = self.ins.len();
                self.ins.push(Instruction::SimpleCond(SimpleGuard {
                    cond,
                    met: 0,
                    unmet: guard_ip + 1,
                }));
                self.compile_block(body)?;
                let after = self.ins.len();
                if let Instruction::SimpleCond(g) = &mut self.ins[guard_ip] {
                    g.met = after;
                }
                Ok(())
            }
            _ => {
                let guard_ip = self.ins.len();
                self.ins.push(Instruction::SimpleCond(SimpleGuard {
                    cond,
                    met: guard_ip + 1,
                    unmet: 0,
                }));
                self.compile_block(token)?;
                let after = self.ins.len();
                if let Instruction::SimpleCond(g) = &mut self.ins[guard_ip] {
                    g.unmet = after;
                }
                Ok(())
            }
        }
    }

    /// Compile a two-address range; the comma is already consumed.
    fn compile_range(&mut self, start: Condition) -> Result<(), ParseError> {
        let token = self.must_next()?;
        let end = match token.kind {
            TokenKind::Num(_) | TokenKind::Dollar | TokenKind::Rx(_) => self.condition(token)?,
            _ => {
                return Err(ParseError::new(
                    "expected a second address after `,`",
                    token.location,
                ));
            }
        };

        let slot = self.range_slots;
        self.range_slots += 1;

        let token = self.must_next()?;
        match token.kind {
            TokenKind::Bang => {
                let body = self.must_next()?;
                let guard_ip = self.ins.len();
                self.ins.push(Instruction::RangeCond(RangeGuard {
                    start,
                    end,
                    met: 0,
                    unmet: guard_ip + 1,
                    slot,
                }));
                self.compile_range_body(body, slot)?;
                let after = self.ins.len();
                if let Instruction::RangeCond(g) = &mut self.ins[guard_ip] {
                    g.met = after;
                }
                Ok(())
            }
            _ => {
                let guard_ip = self.ins.len();
                self.ins.push(Instruction::RangeCond(RangeGuard {
                    start,
                    end,
                    met: guard_ip + 1,
                    unmet: 0,
                    slot,
                }));
                self.compile_range_body(token, slot)?;
                let after = self.ins.len();
                if let Instruction::RangeCond(g) = &mut self.ins[guard_ip] {
                    g.unmet = after;
                }
                Ok(())
            }
        }
    }

    /// A `c\` directly under a range is bound to that range so it can
    /// emit its text exactly once, on the range's last line.
    fn compile_range_body(&mut self, token: Token, slot: usize) -> Result<(), ParseError> {
        if let TokenKind::Change(text) = token.kind {
            self.ins.push(Instruction::Change {
                text,
                slot: Some(slot),
            });
            Ok(())
        } else {
            self.compile_block(token)
        }
    }

    /// A guarded body: either a `{ ... }` block or a single command.
    fn compile_block(&mut self, token: Token) -> Result<(), ParseError> {
        match token.kind {
            TokenKind::LBrace => {
                self.block_level += 1;
                self.top_level()
            }
            TokenKind::Eol => Err(ParseError::new("expected a command", token.location)),
            _ => self.compile_cmd(token),
        }
    }

    fn compile_cmd(&mut self, token: Token) -> Result<(), ParseError> {
        let location = token.location;
        match token.kind {
            TokenKind::Cmd(c) => self.compile_simple(c, location),
            TokenKind::BranchCmd { cmd, label } => {
                let label = if label.is_empty() {
                    END_OF_PROGRAM_LABEL.to_string()
                } else {
                    label
                };
                let kind = if cmd == 'b' {
                    BranchKind::Always
                } else {
                    BranchKind::OnChange
                };
                self.branches.push(PendingBranch {
                    ip: self.ins.len(),
                    label,
                    kind,
                    location,
                });
                // placeholder, overwritten during resolution
                self.ins.push(Instruction::Branch(0));
                Ok(())
            }
            TokenKind::Subst {
                pattern,
                replacement,
                flags,
            } => {
                let subst = Substitution::new(&pattern, &replacement, &flags)
                    .map_err(|message| ParseError::new(message, location))?;
                self.ins.push(Instruction::Subst(subst));
                Ok(())
            }
            TokenKind::Text { cmd: 'a', body } => {
                self.ins.push(Instruction::Append(body));
                Ok(())
            }
            TokenKind::Text { cmd: 'i', body } => {
                self.ins.push(Instruction::Insert(body));
                Ok(())
            }
            TokenKind::Change(text) => {
                self.ins.push(Instruction::Change { text, slot: None });
                Ok(())
            }
            TokenKind::FileCmd { cmd: 'r', name } => {
                // read once at compile time; a missing file is a compile
                // error, not a runtime surprise
                let contents = fs::read_to_string(&name).map_err(|e| {
                    ParseError::new(format!("cannot read {name}: {e}"), location)
                })?;
                self.ins.push(Instruction::Append(contents));
                Ok(())
            }
            TokenKind::FileCmd { name, .. } => {
                self.ins.push(Instruction::Write(name));
                Ok(())
            }
            _ => Err(ParseError::new("unexpected token", location)),
        }
    }

    fn compile_simple(&mut self, c: char, location: Location) -> Result<(), ParseError> {
        match c {
            '=' => self.ins.push(Instruction::LineNo),
            'd' => self.ins.push(Instruction::Branch(0)),
            'D' => self.ins.push(Instruction::DeleteFirstLine),
            'g' => self.ins.push(Instruction::Get),
            'G' => self.ins.push(Instruction::GetAppend),
            'h' => self.ins.push(Instruction::Hold),
            'H' => self.ins.push(Instruction::HoldAppend),
            'n' => {
                if !self.quiet {
                    self.ins.push(Instruction::Print);
                }
                self.ins.push(Instruction::FillNext);
            }
            'N' => self.ins.push(Instruction::FillNextAppend),
            'p' => self.ins.push(Instruction::Print),
            'P' => self.ins.push(Instruction::PrintFirstLine),
            'q' => {
                if !self.quiet {
                    self.ins.push(Instruction::Print);
                }
                self.ins.push(Instruction::Quit);
            }
            'x' => self.ins.push(Instruction::Swap),
            other => {
                return Err(ParseError::new(
                    format!("unknown command `{other}`"),
                    location,
                ));
            }
        }
        Ok(())
    }

    fn define_label(&mut self, name: String, location: Location) -> Result<(), ParseError> {
        if name.is_empty() {
            return Err(ParseError::new("bad label name", location));
        }
        self.labels.insert(name, self.ins.len());
        Ok(())
    }

    fn resolve_branches(&mut self) -> Result<(), ParseError> {
        for branch in &self.branches {
            let Some(&target) = self.labels.get(&branch.label) else {
                return Err(ParseError::new(
                    format!("unknown label `{}`", branch.label),
                    branch.location,
                ));
            };
            self.ins[branch.ip] = match branch.kind {
                BranchKind::Always => Instruction::Branch(target),
                BranchKind::OnChange => Instruction::ChangedBranch(target),
            };
        }
        Ok(())
    }
}
