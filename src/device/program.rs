//! Program building.
//!
//! The host compiler is a front end: it resolves `-D` conditionals, checks
//! bracket balance, parses every `__kernel` definition and classifies its
//! parameters. Each kernel is then linked against a native body from the
//! [`KernelLibrary`]. Problems are reported in a clang-style build log.

use super::kernel::{KernelFn, KernelLibrary};
use super::preprocess::{self, Token, TokenKind};
use super::Status;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_PROGRAM_ID: AtomicU64 = AtomicU64::new(1);

/// Parsed compiler options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    pub defines: Vec<(String, String)>,
    /// `-cl-*` flags, accepted and recorded.
    pub cl_flags: Vec<String>,
}

impl BuildOptions {
    /// Parse an option string such as `"-D BLOCK_SIZE=2 -cl-fast-relaxed-math"`.
    pub fn parse(options: &str) -> Result<Self> {
        let invalid = |msg: String| Error::submission(Status::InvalidBuildOptions, msg);
        let mut parsed = BuildOptions::default();
        let mut tokens = options.split_whitespace();

        while let Some(token) = tokens.next() {
            let define = if token == "-D" {
                tokens
                    .next()
                    .ok_or_else(|| invalid("missing argument to '-D'".to_string()))?
            } else if let Some(define) = token.strip_prefix("-D") {
                define
            } else if token.starts_with("-cl-") {
                parsed.cl_flags.push(token.to_string());
                continue;
            } else {
                return Err(invalid(format!("unknown build option '{}'", token)));
            };

            let define = parse_define(define)
                .ok_or_else(|| invalid(format!("invalid macro definition '{}'", define)))?;
            parsed.defines.push(define);
        }

        Ok(parsed)
    }
}

fn parse_define(text: &str) -> Option<(String, String)> {
    let (name, value) = text.split_once('=').unwrap_or((text, "1"));
    let valid = name.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    valid.then(|| (name.to_string(), value.to_string()))
}

/// Build log collector.
pub(super) struct Diagnostics {
    source_id: String,
    lines: Vec<String>,
    errors: usize,
}

impl Diagnostics {
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            lines: Vec::new(),
            errors: 0,
        }
    }

    pub fn error<S: Into<String>>(&mut self, line: usize, msg: S) {
        self.errors += 1;
        self.lines
            .push(format!("{}:{}: error: {}", self.source_id, line, msg.into()));
    }

    pub fn warning<S: Into<String>>(&mut self, line: usize, msg: S) {
        self.lines
            .push(format!("{}:{}: warning: {}", self.source_id, line, msg.into()));
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn log(&self) -> String {
        let mut log = self.lines.join("\n");
        if self.errors > 0 {
            if !log.is_empty() {
                log.push('\n');
            }
            let plural = if self.errors == 1 { "" } else { "s" };
            log.push_str(&format!("{} error{} generated.", self.errors, plural));
        }
        log
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressSpace {
    Global,
    Constant,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Pointer into an address space. `read_only` is set for `const`
    /// pointees and for `__constant`.
    Pointer { space: AddressSpace, read_only: bool },
    /// By-value parameter of `size` bytes.
    Scalar { size: usize },
}

/// One declared kernel parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub type_name: String,
    pub kind: ParamKind,
}

impl Param {
    pub fn address_space(&self) -> Option<AddressSpace> {
        match self.kind {
            ParamKind::Pointer { space, .. } => Some(space),
            ParamKind::Scalar { .. } => None,
        }
    }
}

/// A `__kernel` definition found in the program source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub line: usize,
}

/// A built program: kernel declarations linked to native bodies.
pub struct Program {
    id: u64,
    source_id: String,
    options: BuildOptions,
    defines: HashMap<String, String>,
    kernels: Vec<KernelDecl>,
    bodies: HashMap<String, Arc<KernelFn>>,
    build_log: String,
}

impl Program {
    pub fn build(
        source_id: &str,
        source: &str,
        options: &str,
        library: &KernelLibrary,
    ) -> Result<Program> {
        let options = BuildOptions::parse(options)?;
        let mut diag = Diagnostics::new(source_id);

        let stripped = preprocess::strip_comments(source, &mut diag);
        let preprocessed = preprocess::preprocess(&stripped, &options.defines, &mut diag);
        let tokens = preprocess::lex(&preprocessed.text);

        let kernels = if check_brackets(&tokens, &mut diag) {
            parse_kernels(&tokens, &mut diag)
        } else {
            Vec::new()
        };

        if kernels.is_empty() && diag.error_count() == 0 {
            diag.warning(1, "program declares no kernels");
        }

        let mut bodies = HashMap::new();
        for decl in &kernels {
            match library.get(&decl.name) {
                Some(body) => {
                    bodies.insert(decl.name.clone(), body);
                }
                None => diag.error(
                    decl.line,
                    format!("undefined kernel body for '{}' in kernel library", decl.name),
                ),
            }
        }

        if diag.error_count() > 0 {
            return Err(Error::build(source_id, diag.log()));
        }

        Ok(Program {
            id: NEXT_PROGRAM_ID.fetch_add(1, Ordering::Relaxed),
            source_id: source_id.to_string(),
            options,
            defines: preprocessed.defines,
            kernels,
            bodies,
            build_log: diag.log(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn options(&self) -> &BuildOptions {
        &self.options
    }

    /// Kernel names in declaration order.
    pub fn kernel_names(&self) -> impl Iterator<Item = &str> {
        self.kernels.iter().map(|k| k.name.as_str())
    }

    pub fn declaration(&self, name: &str) -> Option<&KernelDecl> {
        self.kernels.iter().find(|k| k.name == name)
    }

    /// Macros in effect at the end of the source.
    pub fn defines(&self) -> &HashMap<String, String> {
        &self.defines
    }

    /// Warnings from a successful build; empty when there were none.
    pub fn build_log(&self) -> &str {
        &self.build_log
    }

    pub(crate) fn body(&self, name: &str) -> Option<Arc<KernelFn>> {
        self.bodies.get(name).cloned()
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("id", &self.id)
            .field("source_id", &self.source_id)
            .field("kernels", &self.kernels.iter().map(|k| &k.name).collect::<Vec<_>>())
            .finish()
    }
}

fn check_brackets(tokens: &[Token], diag: &mut Diagnostics) -> bool {
    let mut stack: Vec<&Token> = Vec::new();

    for tok in tokens.iter().filter(|t| t.kind == TokenKind::Punct) {
        let open = match tok.text.as_str() {
            "(" | "[" | "{" => {
                stack.push(tok);
                continue;
            }
            ")" => "(",
            "]" => "[",
            "}" => "{",
            _ => continue,
        };

        match stack.pop() {
            Some(top) if top.text == open => {}
            Some(top) => {
                let msg = format!(
                    "expected '{}' to match '{}' on line {}",
                    closer(&top.text),
                    top.text,
                    top.line
                );
                diag.error(tok.line, msg);
                return false;
            }
            None => {
                diag.error(tok.line, format!("extraneous closing '{}'", tok.text));
                return false;
            }
        }
    }

    if let Some(top) = stack.pop() {
        diag.error(top.line, format!("unterminated '{}'", top.text));
        return false;
    }
    true
}

fn closer(open: &str) -> &'static str {
    match open {
        "(" => ")",
        "[" => "]",
        _ => "}",
    }
}

fn is_kernel_qualifier(tok: &Token) -> bool {
    tok.kind == TokenKind::Ident && (tok.is("__kernel") || tok.is("kernel"))
}

/// Find every kernel definition. Prototypes ending in `;` are skipped.
fn parse_kernels(tokens: &[Token], diag: &mut Diagnostics) -> Vec<KernelDecl> {
    let mut kernels: Vec<KernelDecl> = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        if !is_kernel_qualifier(&tokens[i]) {
            i += 1;
            continue;
        }
        let line = tokens[i].line;
        i += 1;

        match tokens.get(i) {
            Some(t) if t.is("void") => i += 1,
            Some(t) => {
                diag.error(t.line, "kernel functions must have a 'void' return type");
                continue;
            }
            None => {
                diag.error(line, "expected kernel declaration");
                break;
            }
        }

        let name = match tokens.get(i) {
            Some(t) if t.kind == TokenKind::Ident => t.text.clone(),
            _ => {
                diag.error(line, "expected kernel name");
                continue;
            }
        };
        i += 1;

        if !tokens.get(i).map_or(false, |t| t.is("(")) {
            diag.error(line, format!("expected '(' after kernel name '{}'", name));
            continue;
        }
        let Some(close) = matching(tokens, i) else {
            break;
        };
        let params = parse_params(&tokens[i + 1..close], &name, line, diag);
        i = close + 1;

        match tokens.get(i) {
            Some(t) if t.is("{") => {
                if kernels.iter().any(|k| k.name == name) {
                    diag.error(line, format!("redefinition of '{}'", name));
                } else if let Some(params) = params {
                    kernels.push(KernelDecl { name, params, line });
                }
            }
            Some(t) if t.is(";") => {}
            _ => diag.error(
                line,
                format!("expected function body after kernel declarator '{}'", name),
            ),
        }
    }

    kernels
}

fn matching(tokens: &[Token], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (j, tok) in tokens.iter().enumerate().skip(open) {
        if tok.is("(") {
            depth += 1;
        } else if tok.is(")") {
            depth -= 1;
            if depth == 0 {
                return Some(j);
            }
        }
    }
    None
}

const IGNORED_QUALIFIERS: [&str; 3] = ["volatile", "restrict", "__restrict"];

fn parse_params(
    tokens: &[Token],
    kernel: &str,
    line: usize,
    diag: &mut Diagnostics,
) -> Option<Vec<Param>> {
    if tokens.is_empty() || (tokens.len() == 1 && tokens[0].is("void")) {
        return Some(Vec::new());
    }

    let mut params = Vec::new();
    let mut ok = true;
    for (index, group) in tokens.split(|t| t.is(",")).enumerate() {
        match parse_param(group) {
            Ok(param) => {
                if params.iter().any(|p: &Param| p.name == param.name) {
                    let msg = format!("redefinition of parameter '{}' in '{}'", param.name, kernel);
                    diag.error(line, msg);
                    ok = false;
                }
                params.push(param);
            }
            Err(msg) => {
                let at = group.first().map_or(line, |t| t.line);
                diag.error(at, format!("parameter {} of kernel '{}': {}", index, kernel, msg));
                ok = false;
            }
        }
    }

    ok.then_some(params)
}

fn parse_param(tokens: &[Token]) -> std::result::Result<Param, String> {
    let mut space = None;
    let mut is_const = false;
    let mut unsigned = false;
    let mut pointers = 0;
    let mut words: Vec<&str> = Vec::new();

    for tok in tokens {
        let text = tok.text.as_str();
        match text {
            "__global" | "global" => space = Some(AddressSpace::Global),
            "__constant" | "constant" => space = Some(AddressSpace::Constant),
            "__local" | "local" => space = Some(AddressSpace::Local),
            "const" => is_const = true,
            "unsigned" => unsigned = true,
            "*" => pointers += 1,
            _ if IGNORED_QUALIFIERS.contains(&text) => {}
            _ if tok.kind == TokenKind::Ident => words.push(text),
            _ => return Err(format!("unexpected token '{}'", text)),
        }
    }

    // the last identifier names the parameter, the rest spell its type
    let name = match words.pop() {
        Some(name) if !words.is_empty() || unsigned => name.to_string(),
        _ => return Err("kernel parameters must have a type and a name".to_string()),
    };
    if tokens.last().map_or(false, |t| t.is("*")) {
        return Err(format!("unexpected '*' after parameter name '{}'", name));
    }

    let base = match words.as_slice() {
        [] => "int".to_string(),
        [single] => single.to_string(),
        _ => return Err(format!("unexpected identifier '{}'", words[1])),
    };
    let type_name = if unsigned { format!("u{}", base) } else { base };

    let kind = match (pointers, space) {
        (0, None) => ParamKind::Scalar {
            size: scalar_size(&type_name)?,
        },
        (0, Some(_)) => {
            return Err(format!("'{}' must be a pointer to use an address space qualifier", name))
        }
        (1, Some(space)) => {
            if type_name != "void" {
                scalar_size(&type_name)?;
            }
            ParamKind::Pointer {
                space,
                read_only: is_const || space == AddressSpace::Constant,
            }
        }
        (1, None) => {
            return Err(format!(
                "pointer '{}' must point to __global, __constant or __local memory",
                name
            ))
        }
        _ => return Err(format!("pointer-to-pointer parameter '{}' is not allowed", name)),
    };

    let display = match kind {
        ParamKind::Pointer { .. } => format!("{}*", type_name),
        ParamKind::Scalar { .. } => type_name,
    };

    Ok(Param {
        name,
        type_name: display,
        kind,
    })
}

/// Size in bytes of a by-value kernel parameter type, including vector
/// types. Three-element vectors occupy four elements.
fn scalar_size(type_name: &str) -> std::result::Result<usize, String> {
    const BASE: [(&str, usize); 11] = [
        ("char", 1),
        ("uchar", 1),
        ("short", 2),
        ("ushort", 2),
        ("int", 4),
        ("uint", 4),
        ("long", 8),
        ("ulong", 8),
        ("half", 2),
        ("float", 4),
        ("double", 8),
    ];
    let split = type_name
        .find(|c: char| c.is_ascii_digit())
        .unwrap_or(type_name.len());
    let (base, width) = type_name.split_at(split);
    let lanes = match width {
        "" => 1,
        "2" => 2,
        "3" | "4" => 4,
        "8" => 8,
        "16" => 16,
        _ => return Err(format!("unknown type name '{}'", type_name)),
    };

    BASE.iter()
        .find(|(name, _)| *name == base)
        .map(|(_, size)| size * lanes)
        .ok_or_else(|| format!("unknown type name '{}'", type_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn library() -> KernelLibrary {
        KernelLibrary::new()
            .with("add", |_, _| {})
            .with("scale", |_, _| {})
            .with("reduce", |_, _| {})
    }

    const ADD: &str = r#"
// element-wise sum
__kernel void add(__global const float* a,
                  __global const float* b,
                  __global float* out)
{
    int i = get_global_id(0);
    out[i] = a[i] + b[i];
}
"#;

    #[test]
    fn test_parse_options() {
        let options = BuildOptions::parse("-D BLOCK_SIZE=2 -DFAST -cl-mad-enable").unwrap();
        assert_eq!(
            options.defines,
            vec![
                ("BLOCK_SIZE".to_string(), "2".to_string()),
                ("FAST".to_string(), "1".to_string())
            ]
        );
        assert_eq!(options.cl_flags, vec!["-cl-mad-enable".to_string()]);
    }

    #[test]
    fn test_parse_options_rejects_unknown() {
        let err = BuildOptions::parse("-O3").unwrap_err();
        assert_eq!(err.status(), Some(Status::InvalidBuildOptions));
        assert!(BuildOptions::parse("-I include").is_err());
        assert!(BuildOptions::parse("-D").is_err());
        assert!(BuildOptions::parse("-D 2X=1").is_err());
    }

    #[test]
    fn test_build_parses_kernel() {
        let program = Program::build("add.cl", ADD, "-D BLOCK_SIZE=2", &library()).unwrap();
        assert_eq!(program.kernel_names().collect::<Vec<_>>(), ["add"]);
        assert_eq!(program.defines().get("BLOCK_SIZE").map(String::as_str), Some("2"));
        assert!(program.build_log().is_empty());

        let decl = program.declaration("add").unwrap();
        assert_eq!(decl.line, 3);
        assert_eq!(decl.params.len(), 3);
        assert_eq!(decl.params[0].type_name, "float*");
        assert_eq!(
            decl.params[0].kind,
            ParamKind::Pointer {
                space: AddressSpace::Global,
                read_only: true
            }
        );
        assert_eq!(
            decl.params[2].kind,
            ParamKind::Pointer {
                space: AddressSpace::Global,
                read_only: false
            }
        );
    }

    #[test]
    fn test_scalar_and_local_params() {
        let source = "__kernel void scale(__global float* x, const float factor, \
                      __local float* tmp, uint4 v, unsigned n) {}";
        let program = Program::build("s.cl", source, "", &library()).unwrap();
        let params = &program.declaration("scale").unwrap().params;

        assert_eq!(params[1].kind, ParamKind::Scalar { size: 4 });
        assert_eq!(params[2].address_space(), Some(AddressSpace::Local));
        assert_eq!(params[3].kind, ParamKind::Scalar { size: 16 });
        assert_eq!(params[4].type_name, "uint");
    }

    #[test]
    fn test_prototypes_and_conditional_kernels() {
        let source = r#"
__kernel void add(__global float* a);
#ifdef BLOCK_SIZE
__kernel void reduce(__global float* a, __local float* s) { }
#else
__kernel void missing(__global float* a) { }
#endif
__kernel void add(__global float* a) { }
"#;
        let program = Program::build("p.cl", source, "-D BLOCK_SIZE=2", &library()).unwrap();
        assert_eq!(program.kernel_names().collect::<Vec<_>>(), ["reduce", "add"]);
    }

    #[test]
    fn test_malformed_source_reports_log() {
        let source = "__kernel void add(__global float* a {\n  a[0] = 1;\n}\n";
        let err = Program::build("bad.cl", source, "", &library()).unwrap_err();
        let log = err.build_log().unwrap();
        assert!(log.starts_with("bad.cl:1: error:"), "{}", log);
        assert!(log.ends_with("1 error generated."));
    }

    #[test]
    fn test_unknown_type_and_missing_body() {
        let source = "__kernel void add(__global float* a, widget w) {}\n\
                      __kernel void nobody(int n) {}";
        let err = Program::build("t.cl", source, "", &library()).unwrap_err();
        let log = err.build_log().unwrap();
        assert!(log.contains("t.cl:1: error: parameter 1 of kernel 'add': unknown type name"));
        assert!(log.contains("t.cl:2: error: undefined kernel body for 'nobody'"));
        assert!(log.ends_with("2 errors generated."));
    }

    #[test]
    fn test_invalid_kernel_signatures() {
        let cases = [
            "__kernel int add(int n) {}",
            "__kernel void add(float* a) {}",
            "__kernel void add(__global int n) {}",
            "__kernel void add(__global float** a) {}",
            "__kernel void add(size_t n) {}",
            "__kernel void add(int n, int n) {}",
        ];
        for source in cases {
            assert!(Program::build("x.cl", source, "", &library()).is_err(), "{}", source);
        }
    }

    #[test]
    fn test_empty_program_warns() {
        let program = Program::build("e.cl", "// nothing here\n", "", &library()).unwrap();
        assert_eq!(program.build_log(), "e.cl:1: warning: program declares no kernels");
    }

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(scalar_size("char"), Ok(1));
        assert_eq!(scalar_size("float3"), Ok(16));
        assert_eq!(scalar_size("double16"), Ok(128));
        assert!(scalar_size("float5").is_err());
        assert!(scalar_size("size_t").is_err());
    }
}
