//! just-sed - a stream-editor engine
//!
//! Compiles a sed-style script into a flat instruction program and runs
//! it over line-oriented input. The script language covers the classic
//! command set (`= a b c d D g G h H i n N p P q r s t w x`, blocks,
//! address ranges, `!` inversion, `$`, `/regex/` addresses); the regex
//! dialect and `$1..$9` replacement syntax are those of the underlying
//! engine, not the historical backslash forms.
//!
//! Compilation runs the lexer and parser concurrently over a bounded
//! token channel. The compiled [`Engine`] is immutable and reusable:
//! every run starts from fresh machine state.
//!
//! ```
//! let engine = just_sed::compile("s/world/rust/".as_bytes()).unwrap();
//! let out = engine.run_string("hello world\n").unwrap();
//! assert_eq!(out, "hello rust\n");
//! ```

pub mod error;
pub mod executor;
pub mod lexer;
pub mod parser;
pub mod substitute;
pub mod types;

use std::io::{BufReader, Read, Write};
use std::sync::mpsc;
use std::thread;

pub use error::{CompileError, LexError, ParseError, RuntimeError};
pub use executor::ScriptReader;

use parser::Parser;
use types::Program;

/// A compiled script, reusable across inputs.
#[derive(Debug)]
pub struct Engine {
    prog: Program,
}

/// Compile a script. Every cycle ends with an automatic print of the
/// pattern space.
pub fn compile<R: Read + Send>(script: R) -> Result<Engine, CompileError> {
    compile_mode(script, false)
}

/// Compile a script in quiet mode: no automatic printing, and `n` and
/// `q` lose their implicit print. Output then comes only from explicit
/// printing commands.
pub fn compile_quiet<R: Read + Send>(script: R) -> Result<Engine, CompileError> {
    compile_mode(script, true)
}

fn compile_mode<R: Read + Send>(script: R, quiet: bool) -> Result<Engine, CompileError> {
    let (tx, rx) = mpsc::sync_channel(lexer::TOKEN_BUFFER);

    let (lexed, parsed) = thread::scope(|scope| {
        let lexer = scope.spawn(move || lexer::lex(script, tx));
        // the parser drops the receiver when it finishes, which unblocks
        // a lexer still trying to send after an early parse failure
        let parsed = Parser::new(rx.into_iter(), quiet).parse();
        (lexer.join().expect("lexer thread panicked"), parsed)
    });

    // a lex error outranks whatever the parser made of the truncated
    // token stream
    lexed?;
    let prog = parsed?;

    log::debug!(
        "compiled {} instructions, {} address ranges",
        prog.ins.len(),
        prog.range_slots
    );
    Ok(Engine { prog })
}

impl Engine {
    /// Run the program over `input`, writing all output to `output`.
    pub fn run<R: Read, W: Write>(&self, input: R, output: W) -> Result<(), RuntimeError> {
        executor::run_machine(&self.prog, BufReader::new(input), output)
    }

    /// Streaming variant: returns a reader producing the program's
    /// output as the caller pulls it.
    pub fn wrap<R: Read>(
        &self,
        input: R,
    ) -> Result<ScriptReader<'_, BufReader<R>>, RuntimeError> {
        executor::wrap_machine(&self.prog, BufReader::new(input))
    }

    /// Convenience wrapper for in-memory input and output.
    pub fn run_string(&self, input: &str) -> Result<String, RuntimeError> {
        let mut out = Vec::new();
        self.run(input.as_bytes(), &mut out)?;
        Ok(String::from_utf8(out)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runprog(prog: &str, input: &str) -> String {
        let engine = compile(prog.as_bytes())
            .unwrap_or_else(|e| panic!("couldn't compile <{prog}>: {e}"));
        engine
            .run_string(input)
            .unwrap_or_else(|e| panic!("couldn't run <{prog}>: {e}"))
    }

    fn runprog_quiet(prog: &str, input: &str) -> String {
        let engine = compile_quiet(prog.as_bytes())
            .unwrap_or_else(|e| panic!("couldn't compile <{prog}>: {e}"));
        engine
            .run_string(input)
            .unwrap_or_else(|e| panic!("couldn't run <{prog}>: {e}"))
    }

    #[test]
    fn test_commify() {
        let prog = "
# a program to commify numbers
:loop
s/(.*\\d)(\\d\\d\\d)/$1,$2/
t loop
";
        assert_eq!(runprog(prog, "12345\n"), "12,345\n");
        assert_eq!(
            runprog(prog, "12345678910\nthe best 1234.56\n"),
            "12,345,678,910\nthe best 1,234.56\n"
        );
    }

    #[test]
    fn test_delete_everything() {
        assert_eq!(runprog("d", "12345\n12345"), "");
    }

    #[test]
    fn test_substitution_flags() {
        let prog = "
s:(\\d)(\\d)(\\d):$1\\t$2\\t$3:  # put tabs between 3 digits
s/[a-z]/X/3g                # X out lowercase letters, from the 3rd on
";
        assert_eq!(
            runprog(prog, "a 234 is the Way\n12345 ONE two three\n"),
            "a 2\t3\t4 iX XXX WXX\n1\t2\t345 ONE twX XXXXX\n"
        );
    }

    #[test]
    fn test_double_space_except_last_line() {
        assert_eq!(
            runprog("$ !G", "one\ntwo\nthree\n"),
            "one\n\ntwo\n\nthree\n"
        );
    }

    #[test]
    fn test_remove_tags() {
        let prog = "
# remove all the tags from an xml/html document
/</{
  :loop
  s/<[^<]*>//g
  /</ {
    N
    b loop
  }
  /^\\s*$/d  # skip the line if it was all tags
}";
        let input = "<html><body>\n\
                     <table\n\
                     border=2><tr><td valign=top\n\
                     align=right>1.</td>\n\
                     <td>Line 1 Column 2</\n\
                     td>\n\
                     </table>\n\
                     </body></html>";
        assert_eq!(runprog(prog, input), "1.\nLine 1 Column 2\n");
    }

    #[test]
    fn test_squeeze_blank_lines() {
        let prog = "
# Write non-empty lines.
/./ {
    p
    d
    }
# Write a single empty line, then look for more empty lines.
/^$/    p
# Get next line, discard the held <newline> (empty line),
# and look for more empty lines.
:Empty
/^$/    {
    N
    s/(?s).//
    b Empty
    }
# Write the non-empty line before going back to search
# for the first in a set of empty lines.
    p
    d
";
        assert_eq!(
            runprog(prog, "one\n\n\n\ntwo\n\n\n\nthree\n"),
            "one\n\ntwo\n\nthree\n"
        );
    }

    #[test]
    fn test_empty_script_is_identity() {
        assert_eq!(runprog("", "a\nb\nc\n"), "a\nb\nc\n");
    }

    #[test]
    fn test_empty_quiet_script_is_silent() {
        assert_eq!(runprog_quiet("", "a\nb\nc\n"), "");
    }

    #[test]
    fn test_engine_is_reusable_across_inputs() {
        let engine = compile("1,2d".as_bytes()).expect("compiles");
        assert_eq!(engine.run_string("a\nb\nc\n").expect("runs"), "c\n");
        // the range state must reset, so the second input loses its own
        // first two lines again
        assert_eq!(engine.run_string("d\ne\nf\n").expect("runs"), "f\n");
    }

    #[test]
    fn test_read_command_appends_file_contents() {
        use std::io::Write as _;
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("extra.txt");
        let mut f = std::fs::File::create(&path).expect("create");
        writeln!(f, "appended").expect("write");
        drop(f);

        let prog = format!("1r {}", path.display());
        assert_eq!(runprog(&prog, "line\nend\n"), "line\nappended\nend\n");
    }

    #[test]
    fn test_read_command_missing_file_is_compile_error() {
        let err = compile("r /definitely/not/here".as_bytes()).expect_err("should fail");
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[test]
    fn test_lex_error_beats_parse_error() {
        // the parser also fails here (the script stops mid-range), but
        // the lex diagnostic for the unterminated regex must win
        let err = compile("1,/x".as_bytes()).expect_err("should fail");
        match err {
            CompileError::Lex(e) => {
                assert!(e.message.contains("end-of-line while looking for"))
            }
            other => panic!("expected lex error, got {other}"),
        }
    }

    #[test]
    fn test_wrap_streams_the_same_bytes_as_run() {
        use std::io::Read as _;
        let engine = compile("s/b/B/".as_bytes()).expect("compiles");
        let mut wrapped = engine.wrap("abc\nbcd\n".as_bytes()).expect("wraps");
        let mut streamed = String::new();
        wrapped.read_to_string(&mut streamed).expect("reads");
        assert_eq!(streamed, engine.run_string("abc\nbcd\n").expect("runs"));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// h;g copies the pattern space out and straight back in.
            #[test]
            fn hold_then_get_is_identity(input in "[ab\n]{0,40}") {
                prop_assert_eq!(runprog("h\ng", &input), runprog("", &input));
            }

            /// Two exchanges cancel out.
            #[test]
            fn double_swap_is_identity(input in "[ab\n]{0,40}") {
                prop_assert_eq!(runprog("x\nx", &input), runprog("", &input));
            }

            /// Buffer shuffles alone never produce output in quiet mode.
            #[test]
            fn quiet_buffer_shuffles_are_silent(
                cmds in prop::collection::vec(
                    prop::sample::select(vec!['h', 'H', 'g', 'G', 'x']),
                    0..8,
                ),
                input in "[ab\n]{0,40}",
            ) {
                let script: String = cmds
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                prop_assert_eq!(runprog_quiet(&script, &input), "");
            }

            /// A trailing `d` suppresses exactly the auto-print, so any
            /// script of prints and buffer shuffles behaves like its
            /// quiet compilation.
            #[test]
            fn trailing_delete_equals_quiet_mode(
                cmds in prop::collection::vec(
                    prop::sample::select(vec!['p', 'h', 'H', 'g', 'G', 'x']),
                    0..8,
                ),
                input in "[ab\n]{0,40}",
            ) {
                let script: String = cmds
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join("\n");
                let with_delete = format!("{script}\nd");
                prop_assert_eq!(
                    runprog(&with_delete, &input),
                    runprog_quiet(&script, &input)
                );
            }
        }
    }
}
