//! Lexing and preprocessing of kernel source text.
//!
//! Output keeps one line per input line so diagnostics raised on the
//! preprocessed text point at the original source lines. Only the
//! conditional directives driven by `-D` defines are understood; macros are
//! recorded, never expanded.

use super::program::Diagnostics;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum TokenKind {
    Ident,
    Number,
    Punct,
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub line: usize,
}

impl Token {
    pub fn is(&self, text: &str) -> bool {
        self.text == text
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Split `text` into tokens. Punctuation is single characters.
pub(super) fn lex(text: &str) -> Vec<Token> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let kind = if c == '\n' {
            line += 1;
            i += 1;
            continue;
        } else if c.is_whitespace() {
            i += 1;
            continue;
        } else if is_ident_start(c) {
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            TokenKind::Ident
        } else if c.is_ascii_digit() {
            while i < chars.len() && (is_ident_char(chars[i]) || chars[i] == '.') {
                i += 1;
            }
            TokenKind::Number
        } else if c == '"' || c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != c && chars[i] != '\n' {
                i += if chars[i] == '\\' { 2 } else { 1 };
            }
            i = (i + 1).min(chars.len());
            TokenKind::Literal
        } else {
            i += 1;
            TokenKind::Punct
        };

        tokens.push(Token {
            kind,
            text: chars[start..i].iter().collect(),
            line,
        });
    }

    tokens
}

/// Replace comments with whitespace, keeping newlines.
pub(super) fn strip_comments(source: &str, diag: &mut Diagnostics) -> String {
    enum State {
        Code,
        Line,
        Block(usize),
        Quoted(char),
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut line = 1;
    let mut chars = source.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\n' {
            line += 1;
        }

        match state {
            State::Code => match (c, chars.peek()) {
                ('/', Some('/')) => {
                    chars.next();
                    out.push(' ');
                    state = State::Line;
                }
                ('/', Some('*')) => {
                    chars.next();
                    out.push(' ');
                    state = State::Block(line);
                }
                ('"', _) | ('\'', _) => {
                    out.push(c);
                    state = State::Quoted(c);
                }
                _ => out.push(c),
            },
            State::Line => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                }
            }
            State::Block(_) => {
                if c == '\n' {
                    out.push('\n');
                } else if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                }
            }
            State::Quoted(quote) => {
                out.push(c);
                if c == quote || c == '\n' {
                    state = State::Code;
                }
            }
        }
    }

    if let State::Block(start) = state {
        diag.error(start, "unterminated /* comment");
    }

    out
}

struct Conditional {
    line: usize,
    parent_active: bool,
    active: bool,
    seen_else: bool,
}

pub(super) struct Preprocessed {
    pub text: String,
    /// Macros defined at the end of the source.
    pub defines: HashMap<String, String>,
}

/// Resolve `#ifdef`/`#ifndef`/`#else`/`#endif` against `predefined` and the
/// source's own `#define`s. Inactive lines and directives become blank lines.
pub(super) fn preprocess(
    source: &str,
    predefined: &[(String, String)],
    diag: &mut Diagnostics,
) -> Preprocessed {
    let mut defines: HashMap<String, String> = predefined.iter().cloned().collect();
    let mut stack: Vec<Conditional> = Vec::new();
    let mut out: Vec<&str> = Vec::new();

    for (index, text) in source.split('\n').enumerate() {
        let line = index + 1;
        let active = stack.last().map_or(true, |c| c.active);

        let Some(directive) = text.trim_start().strip_prefix('#') else {
            out.push(if active { text } else { "" });
            continue;
        };
        out.push("");

        let directive = directive.trim();
        let name_len = directive
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(directive.len());
        let (name, rest) = directive.split_at(name_len);
        let rest = rest.trim();
        let ident = rest
            .split_whitespace()
            .next()
            .filter(|s| s.starts_with(is_ident_start) && s.chars().all(is_ident_char));

        match name {
            "ifdef" | "ifndef" => {
                let value = match ident {
                    Some(ident) => defines.contains_key(ident) == (name == "ifdef"),
                    None => {
                        diag.error(line, format!("macro name missing in #{}", name));
                        false
                    }
                };
                stack.push(Conditional {
                    line,
                    parent_active: active,
                    active: active && value,
                    seen_else: false,
                });
            }
            "else" => match stack.last_mut() {
                Some(cond) if cond.seen_else => diag.error(line, "#else after #else"),
                Some(cond) => {
                    cond.seen_else = true;
                    cond.active = cond.parent_active && !cond.active;
                }
                None => diag.error(line, "#else without #ifdef"),
            },
            "endif" => {
                if stack.pop().is_none() {
                    diag.error(line, "#endif without #ifdef");
                }
            }
            _ if !active => {}
            "define" => match ident {
                Some(ident) => {
                    let value = rest[ident.len()..].trim();
                    let value = if value.is_empty() { "1" } else { value };
                    defines.insert(ident.to_string(), value.to_string());
                }
                None => diag.error(line, "macro name must be an identifier"),
            },
            "undef" => {
                if let Some(ident) = ident {
                    defines.remove(ident);
                }
            }
            "error" => diag.error(line, rest),
            "pragma" | "" => {}
            other => diag.error(line, format!("unsupported preprocessing directive '#{}'", other)),
        }
    }

    for cond in stack.iter().rev() {
        diag.error(cond.line, "unterminated conditional directive");
    }

    Preprocessed {
        text: out.join("\n"),
        defines,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, defines: &[(&str, &str)]) -> (Preprocessed, Diagnostics) {
        let mut diag = Diagnostics::new("test.cl");
        let defines: Vec<(String, String)> = defines
            .iter()
            .map(|(n, v)| (n.to_string(), v.to_string()))
            .collect();
        let stripped = strip_comments(source, &mut diag);
        let out = preprocess(&stripped, &defines, &mut diag);
        (out, diag)
    }

    #[test]
    fn test_lex_kernel_header() {
        let tokens = lex("__kernel void add(__global const float* a, int n) {}");
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(
            texts,
            [
                "__kernel", "void", "add", "(", "__global", "const", "float", "*", "a", ",", "int",
                "n", ")", "{", "}"
            ]
        );
        assert_eq!(tokens[2].kind, TokenKind::Ident);
    }

    #[test]
    fn test_strip_comments_keeps_lines() {
        let mut diag = Diagnostics::new("c.cl");
        let out = strip_comments("a // x\n/* y\n z */ b\n\"/* kept */\"", &mut diag);
        assert_eq!(out.lines().count(), 4);
        assert!(out.contains("\"/* kept */\""));
        assert!(!out.contains('x'));
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn test_unterminated_comment() {
        let mut diag = Diagnostics::new("c.cl");
        strip_comments("int a;\n/* open", &mut diag);
        assert_eq!(diag.error_count(), 1);
        assert!(diag.log().contains("c.cl:2: error: unterminated /* comment"));
    }

    #[test]
    fn test_conditionals_and_defines() {
        let source = "#ifdef BLOCK_SIZE\nyes\n#else\nno\n#endif\n#ifndef MISSING\nalso\n#endif";
        let (out, diag) = run(source, &[("BLOCK_SIZE", "2")]);
        assert_eq!(diag.error_count(), 0);
        let lines: Vec<&str> = out.text.split('\n').collect();
        assert_eq!(lines[1], "yes");
        assert_eq!(lines[3], "");
        assert_eq!(lines[6], "also");
    }

    #[test]
    fn test_source_defines_recorded_not_expanded() {
        let (out, diag) = run("#define REAL float\n#define FAST\nREAL x;\n#undef FAST", &[]);
        assert_eq!(diag.error_count(), 0);
        assert_eq!(out.text.split('\n').nth(2), Some("REAL x;"));
        assert_eq!(out.defines.get("REAL").map(String::as_str), Some("float"));
        assert!(!out.defines.contains_key("FAST"));
    }

    #[test]
    fn test_nested_inactive_branch() {
        let source = "#ifdef MISSING\n#ifndef ALSO_MISSING\na\n#else\nb\n#endif\n#else\nc\n#endif";
        let (out, diag) = run(source, &[]);
        assert_eq!(diag.error_count(), 0);
        assert!(!out.text.contains('a'));
        assert!(!out.text.contains('b'));
        assert!(out.text.contains('c'));
    }

    #[test]
    fn test_error_directive_and_unbalanced() {
        let (_, diag) = run("#ifdef BLOCK_SIZE\n#error \"stop here\"\n", &[("BLOCK_SIZE", "2")]);
        assert_eq!(diag.error_count(), 2);
        assert!(diag.log().contains("test.cl:2: error: \"stop here\""));
        assert!(diag.log().contains("test.cl:1: error: unterminated conditional directive"));

        let (_, diag) = run("#endif", &[]);
        assert!(diag.log().contains("#endif without #ifdef"));
    }

    #[test]
    fn test_inactive_directives_ignored() {
        let (_, diag) = run("#ifdef MISSING\n#error never\n#include <x.h>\n#endif", &[]);
        assert_eq!(diag.error_count(), 0);
    }

    #[test]
    fn test_unsupported_directives() {
        let (_, diag) = run("#if 1\n#include <x.h>\n#pragma unroll", &[]);
        assert_eq!(diag.error_count(), 2);
        let log = diag.log();
        assert!(log.contains("test.cl:1: error: unsupported preprocessing directive '#if'"));
        assert!(log.contains("test.cl:2: error: unsupported preprocessing directive '#include'"));
    }
}
