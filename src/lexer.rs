//! Script lexer.
//!
//! Turns script source into a stream of located tokens. The lexer strips
//! comments, folds `;`/newline/comment into a single end-of-line token,
//! reads `s` commands as one structured token, and merges the multi-line
//! bodies of `a\`, `i\`, and `c\`.
//!
//! During compilation the lexer runs on its own thread and feeds the
//! parser through a bounded channel; its error (if any) is handed back
//! out-of-band and checked before the parser's own, so a malformed token
//! never produces a misleading parse diagnostic.

use std::fmt;
use std::io::Read;
use std::sync::mpsc::SyncSender;

use crate::error::LexError;

/// Capacity of the lexer-to-parser token channel.
pub const TOKEN_BUFFER: usize = 128;

/// Line/column position in the script source. Diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub col: usize,
}

impl Location {
    pub fn start() -> Self {
        Self { line: 1, col: 1 }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A run of digits forming a line-number address.
    Num(String),
    /// `/regex/` address, delimiters stripped.
    Rx(String),
    /// `$` — the last-line address.
    Dollar,
    Comma,
    Bang,
    LBrace,
    RBrace,
    /// `;`, a literal newline, or a comment.
    Eol,
    /// `:name`.
    Label(String),
    /// A one-letter command with no operand.
    Cmd(char),
    /// `b` or `t`; an empty label means the end of the program.
    BranchCmd { cmd: char, label: String },
    /// `s` with its two delimited fields and modifier string.
    Subst {
        pattern: String,
        replacement: String,
        flags: String,
    },
    /// `a\` or `i\` body, newline-terminated.
    Text { cmd: char, body: String },
    /// `c\` body, kept distinct so the parser can bind it to an address
    /// range.
    Change(String),
    /// `r` or `w` with a filename.
    FileCmd { cmd: char, name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub location: Location,
    pub kind: TokenKind,
}

/// Lexer state over the script source.
pub(crate) struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    col: usize,
}

impl Lexer {
    pub(crate) fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if let Some(c) = ch {
            self.pos += 1;
            if c == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
        ch
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn loc(&self) -> Location {
        Location {
            line: self.line,
            col: self.col,
        }
    }

    /// Skip spaces and tabs, but not newlines (those are tokens).
    fn skip_blank(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\r')) {
            self.advance();
        }
    }

    /// Consume the rest of the current line, not including its newline.
    fn rest_of_line(&mut self) -> String {
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            out.push(ch);
            self.advance();
        }
        out
    }

    fn eat_newline(&mut self) {
        if self.peek() == Some('\n') {
            self.advance();
        }
    }

    pub(crate) fn next_token(&mut self) -> Result<Option<Token>, LexError> {
        self.skip_blank();

        let location = self.loc();
        let Some(ch) = self.peek() else {
            return Ok(None);
        };

        let kind = match ch {
            '\n' | ';' => {
                self.advance();
                TokenKind::Eol
            }
            '#' => {
                // comment runs to end of line and reads as one EOL
                self.rest_of_line();
                self.eat_newline();
                TokenKind::Eol
            }
            ',' => {
                self.advance();
                TokenKind::Comma
            }
            '!' => {
                self.advance();
                TokenKind::Bang
            }
            '{' => {
                self.advance();
                TokenKind::LBrace
            }
            '}' => {
                self.advance();
                TokenKind::RBrace
            }
            '$' => {
                self.advance();
                TokenKind::Dollar
            }
            '/' => {
                self.advance();
                TokenKind::Rx(self.read_delimited('/')?)
            }
            ':' => {
                self.advance();
                TokenKind::Label(self.read_identifier())
            }
            'b' | 't' => {
                self.advance();
                TokenKind::BranchCmd {
                    cmd: ch,
                    label: self.read_identifier(),
                }
            }
            's' => {
                self.advance();
                self.read_substitution()?
            }
            'a' | 'i' | 'c' => {
                self.advance();
                let body = self.read_text_body(ch)?;
                if ch == 'c' {
                    TokenKind::Change(body)
                } else {
                    TokenKind::Text { cmd: ch, body }
                }
            }
            'r' | 'w' => {
                self.advance();
                self.read_file_command(ch)?
            }
            c if c.is_ascii_digit() => {
                let mut digits = String::new();
                while let Some(d) = self.peek() {
                    if !d.is_ascii_digit() {
                        break;
                    }
                    digits.push(d);
                    self.advance();
                }
                TokenKind::Num(digits)
            }
            other => {
                self.advance();
                TokenKind::Cmd(other)
            }
        };

        Ok(Some(Token { location, kind }))
    }

    /// Read up to the delimiter, which may be escaped with a backslash.
    /// The escape stays in the output so the regex engine sees it. A
    /// newline or end of script before the delimiter is an error.
    fn read_delimited(&mut self, delimiter: char) -> Result<String, LexError> {
        let mut out = String::new();
        let mut prev = '\0';
        loop {
            let Some(ch) = self.peek() else {
                return Err(LexError::new(
                    format!("end-of-line while looking for {delimiter}"),
                    self.loc(),
                ));
            };
            if ch == '\n' {
                return Err(LexError::new(
                    format!("end-of-line while looking for {delimiter}"),
                    self.loc(),
                ));
            }
            self.advance();
            if ch == delimiter && prev != '\\' {
                return Ok(out);
            }
            out.push(ch);
            prev = ch;
        }
    }

    /// Skip blanks, then read a name: anything up to whitespace or `;`.
    /// Used for labels and branch targets; an empty result is legal here
    /// (`b` alone branches to the end of the program).
    fn read_identifier(&mut self) -> String {
        self.skip_blank();
        let mut out = String::new();
        while let Some(ch) = self.peek() {
            if ch == ';' || ch.is_whitespace() {
                break;
            }
            out.push(ch);
            self.advance();
        }
        out
    }

    fn read_substitution(&mut self) -> Result<TokenKind, LexError> {
        let delimiter = match self.peek() {
            Some(d) if d != '\n' => {
                self.advance();
                d
            }
            _ => {
                return Err(LexError::new("missing delimiter for s command", self.loc()));
            }
        };

        let pattern = self.read_delimited(delimiter)?;
        let replacement = self.read_delimited(delimiter)?;

        // modifiers are letters and digits only; `}` and separators stay
        // in the stream
        let mut flags = String::new();
        while let Some(ch) = self.peek() {
            if !ch.is_ascii_alphanumeric() {
                break;
            }
            flags.push(ch);
            self.advance();
        }

        Ok(TokenKind::Subst {
            pattern,
            replacement,
            flags,
        })
    }

    /// Read the body of `a\`, `i\`, or `c\`: the rest of the current line
    /// after the backslash, then further lines while each ends with an
    /// unescaped backslash continuation. The body keeps its internal
    /// newlines and always ends with one.
    fn read_text_body(&mut self, cmd: char) -> Result<String, LexError> {
        self.skip_blank();
        if self.peek() != Some('\\') {
            return Err(LexError::new(format!("expected \\ after {cmd}"), self.loc()));
        }
        self.advance();

        let first = self.rest_of_line();
        self.eat_newline();
        let mut chunk = first.trim_start_matches([' ', '\t']).to_string();

        let mut lines: Vec<String> = Vec::new();
        let mut more = true;
        if !chunk.is_empty() {
            more = strip_continuation(&mut chunk);
            lines.push(chunk);
        }
        while more && !self.is_at_end() {
            let mut line = self.rest_of_line();
            self.eat_newline();
            more = strip_continuation(&mut line);
            lines.push(line);
        }

        let mut body = lines.join("\n");
        body.push('\n');
        Ok(body)
    }

    fn read_file_command(&mut self, cmd: char) -> Result<TokenKind, LexError> {
        let location = self.loc();
        let name = self.rest_of_line().trim().to_string();
        if name.is_empty() {
            return Err(LexError::new(format!("missing filename for {cmd}"), location));
        }
        Ok(TokenKind::FileCmd { cmd, name })
    }
}

/// If `line` ends with an unescaped backslash, remove it and report that
/// the body continues on the next line.
fn strip_continuation(line: &mut String) -> bool {
    let trailing = line.chars().rev().take_while(|&c| c == '\\').count();
    if trailing % 2 == 1 {
        line.pop();
        true
    } else {
        false
    }
}

/// Read the whole script from `src` and lex it into `tx`. Runs on its own
/// thread during compilation; returns the first lex error, if any. A
/// closed receiver just means the parser gave up early, which is not an
/// error here.
pub fn lex<R: Read>(mut src: R, tx: SyncSender<Token>) -> Result<(), LexError> {
    let mut text = String::new();
    if let Err(e) = src.read_to_string(&mut text) {
        return Err(LexError::new(
            format!("error reading script: {e}"),
            Location::start(),
        ));
    }

    let mut lexer = Lexer::new(&text);
    loop {
        match lexer.next_token()? {
            Some(token) => {
                if tx.send(token).is_err() {
                    return Ok(());
                }
            }
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(src);
        let mut out = Vec::new();
        while let Some(token) = lexer.next_token().expect("lexes") {
            out.push(token.kind);
        }
        out
    }

    #[test]
    fn test_address_range_tokens() {
        assert_eq!(
            kinds("1,3d"),
            vec![
                TokenKind::Num("1".into()),
                TokenKind::Comma,
                TokenKind::Num("3".into()),
                TokenKind::Cmd('d'),
            ]
        );
    }

    #[test]
    fn test_regex_address() {
        assert_eq!(
            kinds("/foo/d"),
            vec![TokenKind::Rx("foo".into()), TokenKind::Cmd('d')]
        );
    }

    #[test]
    fn test_escaped_delimiter_keeps_escape() {
        assert_eq!(kinds("/a\\/b/p")[0], TokenKind::Rx("a\\/b".into()));
    }

    #[test]
    fn test_dollar_and_bang() {
        assert_eq!(
            kinds("$ !G"),
            vec![TokenKind::Dollar, TokenKind::Bang, TokenKind::Cmd('G')]
        );
    }

    #[test]
    fn test_semicolon_and_newline_are_eol() {
        assert_eq!(
            kinds("p;p\np"),
            vec![
                TokenKind::Cmd('p'),
                TokenKind::Eol,
                TokenKind::Cmd('p'),
                TokenKind::Eol,
                TokenKind::Cmd('p'),
            ]
        );
    }

    #[test]
    fn test_comment_reads_as_eol() {
        assert_eq!(
            kinds("p # print it\nd"),
            vec![TokenKind::Cmd('p'), TokenKind::Eol, TokenKind::Cmd('d')]
        );
    }

    #[test]
    fn test_substitution_token() {
        assert_eq!(
            kinds("s/foo/bar/g"),
            vec![TokenKind::Subst {
                pattern: "foo".into(),
                replacement: "bar".into(),
                flags: "g".into(),
            }]
        );
    }

    #[test]
    fn test_substitution_custom_delimiter() {
        assert_eq!(
            kinds("s:a:b:"),
            vec![TokenKind::Subst {
                pattern: "a".into(),
                replacement: "b".into(),
                flags: String::new(),
            }]
        );
    }

    #[test]
    fn test_substitution_flags_stop_at_brace() {
        assert_eq!(
            kinds("s/a/b/g}"),
            vec![
                TokenKind::Subst {
                    pattern: "a".into(),
                    replacement: "b".into(),
                    flags: "g".into(),
                },
                TokenKind::RBrace,
            ]
        );
    }

    #[test]
    fn test_unterminated_regex_is_error() {
        let mut lexer = Lexer::new("/foo\np");
        let err = loop {
            match lexer.next_token() {
                Ok(_) => {}
                Err(e) => break e,
            }
        };
        assert!(err.message.contains("end-of-line while looking for /"));
        assert_eq!(err.location.line, 1);
    }

    #[test]
    fn test_label_definition() {
        assert_eq!(kinds(":loop"), vec![TokenKind::Label("loop".into())]);
    }

    #[test]
    fn test_branch_with_label() {
        assert_eq!(
            kinds("b loop"),
            vec![TokenKind::BranchCmd {
                cmd: 'b',
                label: "loop".into(),
            }]
        );
    }

    #[test]
    fn test_branch_without_label() {
        assert_eq!(
            kinds("b\nd"),
            vec![
                TokenKind::BranchCmd {
                    cmd: 'b',
                    label: String::new(),
                },
                TokenKind::Eol,
                TokenKind::Cmd('d'),
            ]
        );
    }

    #[test]
    fn test_conditional_branch() {
        assert_eq!(
            kinds("t end;d"),
            vec![
                TokenKind::BranchCmd {
                    cmd: 't',
                    label: "end".into(),
                },
                TokenKind::Eol,
                TokenKind::Cmd('d'),
            ]
        );
    }

    #[test]
    fn test_append_one_line_body() {
        assert_eq!(
            kinds("a\\ hello"),
            vec![TokenKind::Text {
                cmd: 'a',
                body: "hello\n".into(),
            }]
        );
    }

    #[test]
    fn test_append_classic_body_on_next_line() {
        assert_eq!(
            kinds("a\\\nhello"),
            vec![TokenKind::Text {
                cmd: 'a',
                body: "hello\n".into(),
            }]
        );
    }

    #[test]
    fn test_append_continuation_lines() {
        assert_eq!(
            kinds("a\\\none\\\ntwo"),
            vec![TokenKind::Text {
                cmd: 'a',
                body: "one\ntwo\n".into(),
            }]
        );
    }

    #[test]
    fn test_change_body_is_distinct_kind() {
        assert_eq!(kinds("c\\ swapped"), vec![TokenKind::Change("swapped\n".into())]);
    }

    #[test]
    fn test_text_without_backslash_is_error() {
        let mut lexer = Lexer::new("a hello");
        assert!(lexer.next_token().is_err());
    }

    #[test]
    fn test_file_commands() {
        assert_eq!(
            kinds("r in.txt\nw out.txt"),
            vec![
                TokenKind::FileCmd {
                    cmd: 'r',
                    name: "in.txt".into(),
                },
                TokenKind::Eol,
                TokenKind::FileCmd {
                    cmd: 'w',
                    name: "out.txt".into(),
                },
            ]
        );
    }

    #[test]
    fn test_token_locations_advance() {
        let mut lexer = Lexer::new("p\n  d");
        let first = lexer.next_token().unwrap().unwrap();
        assert_eq!(first.location, Location { line: 1, col: 1 });
        let eol = lexer.next_token().unwrap().unwrap();
        assert_eq!(eol.kind, TokenKind::Eol);
        let second = lexer.next_token().unwrap().unwrap();
        assert_eq!(second.location, Location { line: 2, col: 3 });
    }
}
