use std::path::PathBuf;

use crate::{
    diag::Diagnostics,
    index::{simple_index, IndexVec},
};

pub mod ast;
pub mod bind;
pub mod intern;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod scope;
pub mod token;
pub mod types;

/// A half-open byte range into the file set. Offsets are global: each file
/// occupies `[base, base + len]` within one address space so a span alone
/// identifies its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    /// The "no position" span.
    pub const NONE: Span = Span {
        start: u32::MAX,
        end: u32::MAX,
    };

    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    pub fn is_none(self) -> bool {
        self.start == u32::MAX
    }

    /// The smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        if self.is_none() {
            return other;
        }
        if other.is_none() {
            return self;
        }
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

simple_index! {
    /// Identifies a file within a [`FileSet`]
    pub struct FileId;
}

#[derive(Debug)]
pub enum SourceFileOrigin {
    Memory,
    File(PathBuf),
}

impl core::fmt::Display for SourceFileOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceFileOrigin::Memory => f.write_str("<memory>"),
            SourceFileOrigin::File(path) => f.write_fmt(format_args!("{}", path.display())),
        }
    }
}

#[derive(Debug)]
pub struct SourceFile {
    pub origin: SourceFileOrigin,
    pub contents: String,
    /// Global offset of this file's first byte.
    pub base: u32,
    /// File-relative offsets of the first byte of each line.
    line_starts: Vec<u32>,
}

impl SourceFile {
    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[(span.start - self.base) as usize..(span.end - self.base) as usize]
    }

    pub fn end(&self) -> u32 {
        self.base + self.contents.len() as u32
    }

    /// 1-based line and column for a global offset within this file.
    pub fn line_col(&self, offset: u32) -> (u32, u32) {
        let rel = offset - self.base;
        let line = match self.line_starts.binary_search(&rel) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (line as u32 + 1, rel - self.line_starts[line] + 1)
    }
}

/// A resolved source position.
#[derive(Debug, Clone)]
pub struct Position {
    pub file: String,
    pub line: u32,
    pub col: u32,
    pub offset: u32,
}

/// The set of source files of one compilation, mapping global offsets back
/// to `{file, line, col}`.
#[derive(Debug, Default)]
pub struct FileSet {
    pub files: IndexVec<FileId, SourceFile>,
    next_base: u32,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, origin: SourceFileOrigin, contents: String) -> FileId {
        let base = self.next_base;
        // +1 so that a span at one file's end never aliases the next file's
        // first byte.
        self.next_base = base + contents.len() as u32 + 1;

        let mut line_starts = vec![0];
        for (i, b) in contents.bytes().enumerate() {
            if b == b'\n' {
                line_starts.push(i as u32 + 1);
            }
        }

        self.files.push(SourceFile {
            origin,
            contents,
            base,
            line_starts,
        })
    }

    pub fn get(&self, id: FileId) -> &SourceFile {
        &self.files[id]
    }

    pub fn position(&self, span: Span) -> Option<Position> {
        if span.is_none() {
            return None;
        }

        let file = self
            .files
            .iter()
            .find(|f| f.base <= span.start && span.start <= f.end())?;
        let (line, col) = file.line_col(span.start);

        Some(Position {
            file: file.origin.to_string(),
            line,
            col,
            offset: span.start - file.base,
        })
    }
}

/// Shared front-end state: the AST arena, the scope and binding arenas, the
/// type interner and the diagnostics sink. The parser, type resolver and
/// binder all operate on one `Compilation`; source file contents live in a
/// separately-owned [`FileSet`] so the scanner can borrow them while the
/// compilation is being mutated.
pub struct Compilation {
    pub ast: ast::Ast,
    pub scopes: scope::Scopes,
    pub types: types::TypeInterner,
    pub diags: Diagnostics,
}

impl Compilation {
    pub fn new() -> Self {
        let mut types = types::TypeInterner::new();
        let scopes = scope::Scopes::new(&mut types);

        Self {
            ast: ast::Ast::new(),
            scopes,
            types,
            diags: Diagnostics::new(),
        }
    }
}

impl Default for Compilation {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_set_positions() {
        let mut files = FileSet::new();
        let a = files.add(SourceFileOrigin::Memory, "one\ntwo\n".to_owned());
        let b = files.add(SourceFileOrigin::Memory, "three".to_owned());

        let base_b = files.get(b).base;
        assert!(base_b > files.get(a).end() - 1);

        let p = files.position(Span::new(4, 7)).unwrap();
        assert_eq!((p.line, p.col, p.offset), (2, 1, 4));

        let p = files.position(Span::new(base_b + 2, base_b + 3)).unwrap();
        assert_eq!((p.line, p.col, p.offset), (1, 3, 2));

        assert!(files.position(Span::NONE).is_none());
    }
}
