//! The `s///` command.
//!
//! Compiled once at parse time: the pattern goes to the regex engine and
//! the modifier string is folded into a match selector. Replacement
//! templates use the engine's own `$1..$9` back-reference syntax, not the
//! classic `\1..\9`; this is intentional and not translated.

use regex_lite::Regex;

/// A compiled substitution.
#[derive(Debug)]
pub struct Substitution {
    pattern: Regex,
    replacement: String,
    /// 0-based index of the first match to replace.
    which: usize,
    /// Replace every match from `which` onward.
    global: bool,
    /// Print the pattern space after a successful replacement.
    print: bool,
}

/// Translate the usual escapes in a replacement before it is handed to
/// the regex engine's template expansion, which itself only knows `$`.
/// Unrecognized escapes are kept verbatim.
fn unescape_replacement(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

impl Substitution {
    /// Build from the three lexed `s` fields. The modifier string accepts
    /// `g`, `p`, and one occurrence number; anything else is rejected.
    pub fn new(pattern: &str, replacement: &str, mods: &str) -> Result<Self, String> {
        let pattern = Regex::new(pattern).map_err(|e| format!("bad regex: {e}"))?;

        let mut subst = Substitution {
            pattern,
            replacement: unescape_replacement(replacement),
            which: 0,
            global: false,
            print: false,
        };

        let mut digits = String::new();
        for ch in mods.chars() {
            match ch {
                'p' => subst.print = true,
                'g' => subst.global = true,
                '0'..='9' => digits.push(ch),
                other => return Err(format!("Bad regexp modifier <{other}>")),
            }
        }

        if !digits.is_empty() {
            let n: usize = digits
                .parse()
                .map_err(|_| format!("Bad number <{digits}> on substitution"))?;
            if n == 0 {
                return Err("Bad number <0> on substitution".to_string());
            }
            subst.which = n - 1;
        }

        Ok(subst)
    }

    /// Apply to `src`. Returns the rewritten string, or `None` when the
    /// selected matches are not present (the command is then a no-op and
    /// the modified flag stays untouched).
    pub fn apply(&self, src: &str) -> Option<String> {
        let caps: Vec<_> = self.pattern.captures_iter(src).collect();

        let mut end = caps.len();
        if self.which >= end {
            return None;
        }
        if !self.global {
            end = self.which + 1;
        }

        let mut out = String::with_capacity(src.len());
        let mut tail = 0;
        for c in &caps[self.which..end] {
            let m = c.get(0).unwrap();
            out.push_str(&src[tail..m.start()]);
            c.expand(&self.replacement, &mut out);
            tail = m.end();
        }
        out.push_str(&src[tail..]);
        Some(out)
    }

    pub fn prints(&self) -> bool {
        self.print
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subst(pattern: &str, replacement: &str, mods: &str) -> Substitution {
        Substitution::new(pattern, replacement, mods).expect("compiles")
    }

    #[test]
    fn test_replaces_first_match_by_default() {
        let s = subst("o", "0", "");
        assert_eq!(s.apply("foo boo").as_deref(), Some("f0o boo"));
    }

    #[test]
    fn test_global_replaces_all() {
        let s = subst("o", "0", "g");
        assert_eq!(s.apply("foo boo").as_deref(), Some("f00 b00"));
    }

    #[test]
    fn test_nth_occurrence_only() {
        let s = subst("a", "X", "2");
        assert_eq!(s.apply("aaa").as_deref(), Some("aXa"));
    }

    #[test]
    fn test_nth_and_global_replaces_from_nth() {
        let s = subst("[a-z]", "X", "3g");
        assert_eq!(s.apply("a 234 is the Way").as_deref(), Some("a 234 iX XXX WXX"));
    }

    #[test]
    fn test_no_match_is_none() {
        let s = subst("z", "X", "");
        assert_eq!(s.apply("abc"), None);
    }

    #[test]
    fn test_nth_beyond_matches_is_none() {
        let s = subst("a", "X", "5");
        assert_eq!(s.apply("aaa"), None);
    }

    #[test]
    fn test_backreference_expansion() {
        let s = subst(r"(\w+) (\w+)", "$2 $1", "");
        assert_eq!(s.apply("hello world").as_deref(), Some("world hello"));
    }

    #[test]
    fn test_tab_escape_in_replacement() {
        let s = subst(r"(\d)(\d)", "$1\\t$2", "");
        assert_eq!(s.apply("12").as_deref(), Some("1\t2"));
    }

    #[test]
    fn test_print_flag() {
        assert!(subst("a", "b", "p").prints());
        assert!(!subst("a", "b", "g").prints());
    }

    #[test]
    fn test_bad_modifier_rejected() {
        let err = Substitution::new("a", "b", "q").unwrap_err();
        assert_eq!(err, "Bad regexp modifier <q>");
    }

    #[test]
    fn test_zero_occurrence_rejected() {
        assert!(Substitution::new("a", "b", "0").is_err());
    }

    #[test]
    fn test_bad_pattern_rejected() {
        assert!(Substitution::new("(", "b", "").is_err());
    }

    #[test]
    fn test_dot_all_matches_newline() {
        let s = subst("(?s).", "", "");
        assert_eq!(s.apply("\nab").as_deref(), Some("ab"));
    }
}
