use core::{fmt, mem::size_of};
use std::sync::Arc;

use crate::DeviceRepr;

/// A kernel implemented in Rust, invoked once per work item.
pub type NativeKernel = Arc<dyn Fn(&WorkItem, &KernelArgs<'_>) -> Result<(), KernelFault> + Send + Sync>;

/// What went wrong inside a native kernel.
/// A fault aborts the launch and is reported by the next blocking queue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelFault {
    MissingArg(usize),
    NotABuffer(usize),
    NotAValue(usize),
    OutOfBounds { arg: usize, index: usize, len: usize },
    ReadOnly(usize),
    SizeMismatch { arg: usize, expected: usize, actual: usize },
    Custom(&'static str),
}

impl fmt::Display for KernelFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelFault::MissingArg(arg) => write!(f, "argument {arg} does not exist"),
            KernelFault::NotABuffer(arg) => write!(f, "argument {arg} is not a buffer"),
            KernelFault::NotAValue(arg) => write!(f, "argument {arg} is not a by-value argument"),
            KernelFault::OutOfBounds { arg, index, len } => {
                write!(f, "index {index} out of bounds for argument {arg} with {len} elements")
            }
            KernelFault::ReadOnly(arg) => write!(f, "store into read-only argument {arg}"),
            KernelFault::SizeMismatch {
                arg,
                expected,
                actual,
            } => write!(
                f,
                "argument {arg} holds {actual} bytes, but {expected} bytes were requested"
            ),
            KernelFault::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for KernelFault {}

/// The position of one work item in the launch's index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkItem {
    pub(crate) dims: usize,
    pub(crate) global_id: [usize; 3],
    pub(crate) global_size: [usize; 3],
    pub(crate) global_offset: [usize; 3],
    pub(crate) local_id: [usize; 3],
    pub(crate) local_size: [usize; 3],
    pub(crate) group_id: [usize; 3],
}

impl WorkItem {
    #[inline]
    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Like `get_global_id`, dimensions past the third are 0.
    #[inline]
    pub fn global_id(&self, dim: usize) -> usize {
        self.global_id.get(dim).copied().unwrap_or(0)
    }

    #[inline]
    pub fn global_size(&self, dim: usize) -> usize {
        self.global_size.get(dim).copied().unwrap_or(1)
    }

    #[inline]
    pub fn global_offset(&self, dim: usize) -> usize {
        self.global_offset.get(dim).copied().unwrap_or(0)
    }

    #[inline]
    pub fn local_id(&self, dim: usize) -> usize {
        self.local_id.get(dim).copied().unwrap_or(0)
    }

    #[inline]
    pub fn local_size(&self, dim: usize) -> usize {
        self.local_size.get(dim).copied().unwrap_or(1)
    }

    #[inline]
    pub fn group_id(&self, dim: usize) -> usize {
        self.group_id.get(dim).copied().unwrap_or(0)
    }

    /// Row-major index of this item, ignoring the global offset.
    pub fn linear_id(&self) -> usize {
        let [x, y, z] = core::array::from_fn::<_, 3, _>(|d| self.global_id[d] - self.global_offset[d]);
        x + y * self.global_size[0] + z * self.global_size[0] * self.global_size[1]
    }
}

#[derive(Debug)]
pub(crate) enum ResolvedArg {
    Buffer {
        ptr: *mut u8,
        len: usize,
        writable: bool,
    },
    Value(Vec<u8>),
}

/// Typed access to the arguments of a running native kernel.
///
/// Buffer arguments are addressed by element index. Every access is bounds
/// checked and turned into a [`KernelFault`] instead of touching memory
/// outside the argument's storage.
pub struct KernelArgs<'a> {
    args: &'a [ResolvedArg],
}

impl<'a> KernelArgs<'a> {
    /// # Safety
    /// Every buffer pointer in `args` must be valid for reads of `len` bytes
    /// (and writes, if `writable`) while the returned value lives.
    #[inline]
    pub(crate) unsafe fn new(args: &'a [ResolvedArg]) -> Self {
        KernelArgs { args }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.args.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    fn buffer(&self, arg: usize) -> Result<(*mut u8, usize, bool), KernelFault> {
        match self.args.get(arg) {
            Some(ResolvedArg::Buffer { ptr, len, writable }) => Ok((*ptr, *len, *writable)),
            Some(ResolvedArg::Value(_)) => Err(KernelFault::NotABuffer(arg)),
            None => Err(KernelFault::MissingArg(arg)),
        }
    }

    fn offset_of<T>(arg: usize, index: usize, len: usize) -> Result<usize, KernelFault> {
        let elements = len / size_of::<T>();
        if index >= elements {
            return Err(KernelFault::OutOfBounds {
                arg,
                index,
                len: elements,
            });
        }
        Ok(index * size_of::<T>())
    }

    /// Number of `T` elements buffer argument `arg` can hold.
    pub fn elements<T: DeviceRepr>(&self, arg: usize) -> Result<usize, KernelFault> {
        let (_, len, _) = self.buffer(arg)?;
        Ok(len / size_of::<T>())
    }

    pub fn load<T: DeviceRepr>(&self, arg: usize, index: usize) -> Result<T, KernelFault> {
        let (ptr, len, _) = self.buffer(arg)?;
        let offset = Self::offset_of::<T>(arg, index, len)?;
        // SAFETY: offset + size_of::<T>() <= len and T is plain data
        Ok(unsafe { ptr.add(offset).cast::<T>().read_unaligned() })
    }

    pub fn store<T: DeviceRepr>(&self, arg: usize, index: usize, value: T) -> Result<(), KernelFault> {
        let (ptr, len, writable) = self.buffer(arg)?;
        if !writable {
            return Err(KernelFault::ReadOnly(arg));
        }
        let offset = Self::offset_of::<T>(arg, index, len)?;
        // SAFETY: see load, the storage was created device writable
        unsafe { ptr.add(offset).cast::<T>().write_unaligned(value) };
        Ok(())
    }

    /// Reads a by-value argument, its byte size has to match `T` exactly.
    pub fn value<T: DeviceRepr>(&self, arg: usize) -> Result<T, KernelFault> {
        match self.args.get(arg) {
            Some(ResolvedArg::Value(bytes)) => {
                if bytes.len() != size_of::<T>() {
                    return Err(KernelFault::SizeMismatch {
                        arg,
                        expected: size_of::<T>(),
                        actual: bytes.len(),
                    });
                }
                Ok(unsafe { bytes.as_ptr().cast::<T>().read_unaligned() })
            }
            Some(ResolvedArg::Buffer { .. }) => Err(KernelFault::NotAValue(arg)),
            None => Err(KernelFault::MissingArg(arg)),
        }
    }
}

/// A `__kernel` function found in program source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Declaration {
    pub name: String,
    pub arity: usize,
    pub line: usize,
}

#[derive(Debug, Clone, Copy)]
struct Token<'s> {
    text: &'s str,
    line: usize,
}

/// Splits kernel source into identifiers, numbers and single character
/// punctuation. Comments, string and char literals are dropped.
fn tokenize(src: &str) -> Result<Vec<Token<'_>>, String> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let next = bytes.get(i + 1).copied();

        match c {
            b'\n' => {
                line += 1;
                i += 1;
            }
            b'/' if next == Some(b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if next == Some(b'*') => {
                let start = line;
                i += 2;
                loop {
                    match bytes.get(i) {
                        None => return Err(format!("<source>:{start}: error: unterminated /* comment")),
                        Some(b'*') if bytes.get(i + 1) == Some(&b'/') => {
                            i += 2;
                            break;
                        }
                        Some(b'\n') => line += 1,
                        _ => (),
                    }
                    i += 1;
                }
            }
            b'"' | b'\'' => {
                let start = line;
                i += 1;
                loop {
                    match bytes.get(i) {
                        None | Some(b'\n') => {
                            return Err(format!("<source>:{start}: error: missing terminating {} character", c as char));
                        }
                        Some(b'\\') => i += 1,
                        Some(q) if *q == c => {
                            i += 1;
                            break;
                        }
                        _ => (),
                    }
                    i += 1;
                }
            }
            c if c.is_ascii_alphanumeric() || c == b'_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_' || bytes[i] == b'.') {
                    // '.' only continues numeric literals
                    if bytes[i] == b'.' && !bytes[start].is_ascii_digit() {
                        break;
                    }
                    i += 1;
                }
                tokens.push(Token {
                    text: &src[start..i],
                    line,
                });
            }
            c if c.is_ascii_punctuation() => {
                tokens.push(Token {
                    text: &src[i..i + 1],
                    line,
                });
                i += 1;
            }
            _ => i += 1,
        }
    }
    Ok(tokens)
}

fn check_balanced(tokens: &[Token<'_>], diagnostics: &mut Vec<String>) {
    let mut open: Vec<Token<'_>> = Vec::new();

    for tok in tokens {
        let expected_open = match tok.text {
            "(" | "{" | "[" => {
                open.push(*tok);
                continue;
            }
            ")" => "(",
            "}" => "{",
            "]" => "[",
            _ => continue,
        };
        match open.pop() {
            Some(o) if o.text == expected_open => (),
            Some(o) => {
                diagnostics.push(format!(
                    "<source>:{}: error: expected closing bracket for '{}' opened on line {}, found '{}'",
                    tok.line, o.text, o.line, tok.text
                ));
                return;
            }
            None => {
                diagnostics.push(format!("<source>:{}: error: extraneous closing '{}'", tok.line, tok.text));
                return;
            }
        }
    }

    for o in open {
        diagnostics.push(format!("<source>:{}: error: unmatched '{}'", o.line, o.text));
    }
}

fn is_ident(text: &str) -> bool {
    text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
}

/// Counts the parameters between the parentheses opening at `tokens[open]`.
fn arity(tokens: &[Token<'_>], open: usize) -> usize {
    let mut depth = 0usize;
    let mut commas = 0;
    let mut saw_token = false;
    let mut only_void = true;

    for tok in &tokens[open..] {
        match tok.text {
            "(" | "[" | "{" => depth += 1,
            ")" | "]" | "}" => {
                depth -= 1;
                if depth == 0 {
                    break;
                }
            }
            "," if depth == 1 => commas += 1,
            _ => (),
        }
        if depth >= 1 && tok.text != "(" {
            saw_token = true;
            only_void &= tok.text == "void";
        }
    }

    if !saw_token || (only_void && commas == 0) {
        0
    } else {
        commas + 1
    }
}

/// Finds every kernel function in `src`.
/// Returns the diagnostics that make up the build log on failure.
pub(crate) fn scan_kernels(src: &str) -> Result<Vec<Declaration>, Vec<String>> {
    let tokens = tokenize(src).map_err(|diag| vec![diag])?;

    let mut diagnostics = Vec::new();
    check_balanced(&tokens, &mut diagnostics);
    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }

    let mut declarations = Vec::new();
    for (idx, tok) in tokens.iter().enumerate() {
        if tok.text != "__kernel" && tok.text != "kernel" {
            continue;
        }

        let Some(void_pos) = tokens[idx + 1..]
            .iter()
            .take_while(|t| t.text != "{" && t.text != ";")
            .position(|t| t.text == "void")
            .map(|pos| idx + 1 + pos)
        else {
            diagnostics.push(format!("<source>:{}: error: kernel functions must return void", tok.line));
            continue;
        };

        match (tokens.get(void_pos + 1), tokens.get(void_pos + 2)) {
            (Some(name), Some(paren)) if is_ident(name.text) && paren.text == "(" => {
                declarations.push(Declaration {
                    name: name.text.to_string(),
                    arity: arity(&tokens, void_pos + 2),
                    line: name.line,
                })
            }
            _ => diagnostics.push(format!(
                "<source>:{}: error: expected kernel function name after 'void'",
                tok.line
            )),
        }
    }

    if !diagnostics.is_empty() {
        return Err(diagnostics);
    }
    if declarations.is_empty() {
        return Err(vec!["<source>: error: no __kernel function found in program".to_string()]);
    }
    Ok(declarations)
}
