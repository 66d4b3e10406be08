//! Post-parse binder. After all files of a package have been parsed, the
//! binder fetches imports in parallel through the [`Importer`] contract,
//! binds them into their file scopes, resolves each file's residual
//! `unresolved` identifiers against the now-complete package scope, and
//! propagates previously-unresolved types through their back-reference sets
//! so late-bound and cross-file types settle.

use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use crate::{
    diag::{codes, ErrorKind},
    frontend::{
        ast::{NodeId, Package},
        intern::Symbol,
        scope::{EntKind, ScopeId},
        Compilation,
    },
};

/// An imported package as seen by the binder. Foreign-module loading is out
/// of scope for the core; this is the surface an embedder's importer fills
/// in.
#[derive(Debug)]
pub struct ImportedPkg {
    pub name: String,
}

pub type PkgRef = Arc<ImportedPkg>;

/// Shared import cache, keyed by import path. In/out: the importer consults
/// it for hits and inserts its own entry before returning.
pub type ImportMap = HashMap<String, PkgRef>;

/// Fetches the package for an import path. Importers may be called from
/// multiple threads at once; the binder joins all fetches (an unordered
/// barrier) before name resolution begins.
pub trait Importer: Sync {
    fn import(&self, imports: &Mutex<ImportMap>, path: &str) -> Result<PkgRef, String>;
}

/// Binds a parsed package. Returns false when any import failed or any
/// identifier stayed undefined; the AST remains safe to inspect either way.
pub fn bind(comp: &mut Compilation, pkg: &Package, importer: Option<&dyn Importer>) -> bool {
    let import_ok = bind_imports(comp, pkg, importer);

    // Name resolution is skipped after an import failure; resolving against
    // a file scope with missing imports would only manufacture noise.
    if !import_ok {
        return false;
    }

    let errors_before = comp.diags.error_count();

    for file in &pkg.files {
        for &ident in &file.unresolved {
            let Some(name) = comp.ast.ident_name(ident) else {
                continue;
            };

            match comp.scopes.lookup(file.scope, name) {
                Some(ent) => {
                    comp.ast.set_ident_ent(ident, ent);
                    comp.scopes.ent_mut(ent).nreads += 1;

                    if let Some(old) = comp.ast.ty(ident) {
                        if comp.types.is_unresolved(old) {
                            comp.repropagate_unresolved(old);
                        }
                    }
                }
                None => {
                    let span = comp.ast.span(ident);
                    comp.diags
                        .error(ErrorKind::Reference, span, format!("{name} undefined"));
                    if let Some(candidate) = nearest_name(comp, file.scope, name) {
                        comp.diags.info(
                            span,
                            format!("did you mean {candidate}?"),
                            Some(codes::E_SUGGESTION),
                        );
                    }
                }
            }
        }
    }

    comp.diags.error_count() == errors_before
}

/// A visible name close to the miss, for a hint beside the undefined
/// error. Closeness is a bounded edit distance scaled to the name length.
fn nearest_name(comp: &Compilation, from: ScopeId, name: Symbol) -> Option<Symbol> {
    let wanted = name.value();
    let limit = 1 + wanted.len() / 4;

    let mut best: Option<(usize, Symbol)> = None;
    let mut scope = Some(from);
    while let Some(s) = scope {
        for &ent_id in comp.scopes.scope(s).decls() {
            let candidate = comp.scopes.ent(ent_id).name;
            if candidate == name {
                continue;
            }
            if let Some(d) = edit_distance(wanted, candidate.value(), limit) {
                if best.map_or(true, |(bd, _)| d < bd) {
                    best = Some((d, candidate));
                }
            }
        }
        scope = comp.scopes.scope(s).outer;
    }

    best.map(|(_, candidate)| candidate)
}

/// Levenshtein distance, or `None` once it exceeds `limit`.
fn edit_distance(a: &str, b: &str, limit: usize) -> Option<usize> {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.len().abs_diff(b.len()) > limit {
        return None;
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for i in 1..=a.len() {
        let mut row = vec![i];
        for j in 1..=b.len() {
            let substitute = prev[j - 1] + usize::from(a[i - 1] != b[j - 1]);
            row.push(substitute.min(prev[j] + 1).min(row[j - 1] + 1));
        }
        prev = row;
    }

    (prev[b.len()] <= limit).then_some(prev[b.len()])
}

struct ImportJob {
    node: NodeId,
    path: String,
    local: Option<NodeId>,
    file_scope: ScopeId,
}

fn bind_imports(comp: &mut Compilation, pkg: &Package, importer: Option<&dyn Importer>) -> bool {
    let mut jobs = Vec::new();
    for file in &pkg.files {
        for &import in &file.imports {
            let (path, local) = match comp.ast.kind(import) {
                crate::frontend::ast::NodeKind::Import { path, local } => (*path, *local),
                _ => continue,
            };
            jobs.push(ImportJob {
                node: import,
                path: path.value().to_owned(),
                local,
                file_scope: file.scope,
            });
        }
    }

    if jobs.is_empty() {
        return true;
    }

    // Fetch every import concurrently and join the lot; a failure is
    // recorded but does not cancel the remaining fetches.
    let results: Vec<Result<PkgRef, String>> = match importer {
        None => jobs
            .iter()
            .map(|_| Err("no importer provided".to_owned()))
            .collect(),
        Some(importer) => {
            let cache = Mutex::new(ImportMap::new());
            std::thread::scope(|scope| {
                let handles: Vec<_> = jobs
                    .iter()
                    .map(|job| {
                        let cache = &cache;
                        let path = job.path.as_str();
                        scope.spawn(move || importer.import(cache, path))
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|h| {
                        h.join()
                            .unwrap_or_else(|_| Err("importer panicked".to_owned()))
                    })
                    .collect()
            })
        }
    };

    let mut ok = true;
    for (job, result) in jobs.iter().zip(results) {
        let span = comp.ast.span(job.node);

        let pkg_ref = match result {
            Ok(p) => p,
            Err(e) => {
                ok = false;
                comp.diags.error_with_code(
                    ErrorKind::Import,
                    span,
                    format!("could not import {:?}: {e}", job.path),
                    codes::E_BIND,
                );
                continue;
            }
        };

        let local_name = job.local.and_then(|l| comp.ast.ident_name(l));
        let bind_name = match local_name.map(|s| s.value()) {
            Some("_") => continue,
            Some(".") => {
                // Merging an imported scope into the file scope is not
                // implemented; fail loudly rather than import nothing.
                ok = false;
                comp.diags.error_with_code(
                    ErrorKind::Import,
                    span,
                    "dot-imports are not supported".to_owned(),
                    codes::E_BIND,
                );
                continue;
            }
            Some(name) => Symbol::new(name),
            None => Symbol::new(&pkg_ref.name),
        };

        match comp.scopes.declare(
            job.file_scope,
            bind_name,
            EntKind::Import,
            Some(job.node),
            None,
        ) {
            Ok(ent) => {
                if let Some(l) = job.local {
                    comp.ast.set_ident_ent(l, ent);
                }
            }
            Err(_) => {
                comp.diags.error(
                    ErrorKind::Declaration,
                    span,
                    format!("{bind_name} redeclared"),
                );
            }
        }
    }

    ok
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::{
        ast::NodeKind,
        intern::Symbol,
        parser::Parser,
        scanner::ScanMode,
        scope::ScopeKind,
        types::Type,
        FileSet, SourceFileOrigin,
    };

    fn parse_package(sources: &[&str]) -> (Compilation, Package) {
        let mut files = FileSet::new();
        let ids: Vec<_> = sources
            .iter()
            .map(|src| files.add(SourceFileOrigin::Memory, (*src).to_owned()))
            .collect();

        let mut comp = Compilation::new();
        let pkg_scope = comp
            .scopes
            .alloc(Some(comp.scopes.universe), ScopeKind::Package, None);

        let parsed: Vec<_> = ids
            .iter()
            .map(|&id| Parser::parse_file(&mut comp, files.get(id), pkg_scope, ScanMode::Normal))
            .collect();

        let package = Package {
            name: Symbol::new("t"),
            scope: pkg_scope,
            files: parsed,
        };
        (comp, package)
    }

    fn ty_of(comp: &Compilation, pkg: &Package, name: &str) -> String {
        let ent = comp
            .scopes
            .lookup(pkg.scope, Symbol::new(name))
            .unwrap_or_else(|| panic!("{name} not declared"));
        let ty = comp.scopes.ent(ent).ty.expect("ent has no type");
        comp.types.display(ty)
    }

    struct StubImporter;

    impl Importer for StubImporter {
        fn import(&self, imports: &Mutex<ImportMap>, path: &str) -> Result<PkgRef, String> {
            if path.contains("missing") {
                return Err("not found".to_owned());
            }

            let mut cache = imports.lock().unwrap();
            if let Some(cached) = cache.get(path) {
                return Ok(cached.clone());
            }

            let name = path.rsplit('/').next().unwrap_or(path).to_owned();
            let pkg = Arc::new(ImportedPkg { name });
            cache.insert(path.to_owned(), pkg.clone());
            Ok(pkg)
        }
    }

    #[test]
    fn late_bound_tuple_type() {
        let (mut comp, pkg) =
            parse_package(&["xs2 = (1, late_str); v = xs2.1; late_str = \"hello\""]);

        assert!(bind(&mut comp, &pkg, None));
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        assert_eq!(ty_of(&comp, &pkg, "xs2"), "(int, str<5>)");
        assert_eq!(ty_of(&comp, &pkg, "v"), "str<5>");
    }

    #[test]
    fn forward_template_reference() {
        let (mut comp, pkg) = parse_package(&[
            "fun foo { _ = T1<int,f32>(1, 2.0) }\ntype T1<A,B> { a A; b B }",
        ]);

        assert!(bind(&mut comp, &pkg, None));
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        // The call site's type is the instantiated struct {a:int; b:f32},
        // and the arguments keep their own types (the float defaults to
        // f64).
        let call = comp
            .ast
            .nodes
            .ids()
            .find(|&n| matches!(comp.ast.kind(n), NodeKind::Call { .. }))
            .expect("no call node");

        let call_ty = comp.ast.ty(call).expect("call not resolved");
        match comp.types.get(comp.types.canonical(call_ty)) {
            Type::Struct { name, fields } => {
                assert_eq!(name.map(|s| s.value()), Some("T1"));
                assert_eq!(fields.len(), 2);
                assert_eq!(fields[0].0.value(), "a");
                assert_eq!(comp.types.display(fields[0].1), "int");
                assert_eq!(fields[1].0.value(), "b");
                assert_eq!(comp.types.display(fields[1].1), "f32");
            }
            t => panic!("expected struct instance, got {t:?}"),
        }

        let (a0, a1) = match comp.ast.kind(call) {
            NodeKind::Call { args, .. } => (args[0], args[1]),
            _ => unreachable!(),
        };
        assert_eq!(comp.types.display(comp.ast.ty(a0).unwrap()), "int");
        assert_eq!(comp.types.display(comp.ast.ty(a1).unwrap()), "f64");
    }

    #[test]
    fn template_instances_are_hash_consed() {
        let (mut comp, pkg) = parse_package(&[
            "type P<A> { v A }\na = P<i64>(1)\nb = P<i64>(2)\nc = P<f64>(0.5)",
        ]);
        assert!(bind(&mut comp, &pkg, None));

        let a = comp.scopes.lookup(pkg.scope, Symbol::new("a")).unwrap();
        let b = comp.scopes.lookup(pkg.scope, Symbol::new("b")).unwrap();
        let c = comp.scopes.lookup(pkg.scope, Symbol::new("c")).unwrap();

        let (at, bt, ct) = (
            comp.scopes.ent(a).ty.unwrap(),
            comp.scopes.ent(b).ty.unwrap(),
            comp.scopes.ent(c).ty.unwrap(),
        );
        assert_eq!(at, bt);
        assert_ne!(at, ct);
    }

    #[test]
    fn cross_file_references() {
        let (mut comp, pkg) = parse_package(&[
            "v = helper()",
            "fun helper() i32 { 3 }",
        ]);

        assert!(bind(&mut comp, &pkg, None));
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());
        assert_eq!(ty_of(&comp, &pkg, "v"), "i32");
    }

    #[test]
    fn undefined_identifier_reports() {
        let (mut comp, pkg) = parse_package(&["x = missing_thing"]);

        assert!(!bind(&mut comp, &pkg, None));
        assert!(
            comp.diags
                .messages()
                .iter()
                .any(|m| *m == "missing_thing undefined"),
            "{:?}",
            comp.diags.messages()
        );
    }

    #[test]
    fn undefined_identifier_suggests_near_miss() {
        let (mut comp, pkg) = parse_package(&["fun helper() i32 { 3 }\nv = helpr()"]);

        assert!(!bind(&mut comp, &pkg, None));
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| *m == "helpr undefined"));

        let hint = comp
            .diags
            .iter()
            .find(|d| d.code == Some(codes::E_SUGGESTION))
            .expect("missing suggestion hint");
        assert_eq!(hint.message, "did you mean helper?");
        assert_eq!(hint.severity, crate::diag::Severity::Info);
    }

    #[test]
    fn no_suggestion_for_distant_names() {
        let (mut comp, pkg) = parse_package(&["x = missing_thing"]);
        assert!(!bind(&mut comp, &pkg, None));
        assert!(!comp
            .diags
            .iter()
            .any(|d| d.code == Some(codes::E_SUGGESTION)));
    }

    #[test]
    fn imports_bind_into_file_scope() {
        let (mut comp, pkg) = parse_package(&[
            "import x \"lib/a\"\nimport \"lib/b\"\nimport _ \"lib/effects\"",
        ]);

        assert!(bind(&mut comp, &pkg, Some(&StubImporter)));
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        let file_scope = pkg.files[0].scope;
        let x = comp
            .scopes
            .lookup_in(file_scope, Symbol::new("x"))
            .expect("aliased import not bound");
        assert_eq!(comp.scopes.ent(x).kind, EntKind::Import);

        // Unaliased imports bind under the package's own name; `_` binds
        // nothing.
        assert!(comp.scopes.lookup_in(file_scope, Symbol::new("b")).is_some());
        assert!(comp
            .scopes
            .lookup_in(file_scope, Symbol::new("effects"))
            .is_none());
    }

    #[test]
    fn failed_import_skips_name_resolution() {
        let (mut comp, pkg) = parse_package(&[
            "import \"lib/missing\"\nimport \"lib/ok\"\nq = undefined_thing",
        ]);

        assert!(!bind(&mut comp, &pkg, Some(&StubImporter)));

        let messages = comp.diags.messages();
        assert!(
            messages.iter().any(|m| m.contains("could not import")),
            "{messages:?}"
        );
        // Resolution was skipped, so no "undefined" diagnostics pile on.
        assert!(!messages.iter().any(|m| m.contains("undefined")));

        let import_diag = comp
            .diags
            .iter()
            .find(|d| d.kind == Some(ErrorKind::Import))
            .expect("missing import diagnostic");
        assert_eq!(import_diag.code, Some(codes::E_BIND));

        // The healthy import was still fetched and bound.
        assert!(comp
            .scopes
            .lookup_in(pkg.files[0].scope, Symbol::new("ok"))
            .is_some());
    }

    #[test]
    fn dot_import_fails_loudly() {
        let (mut comp, pkg) = parse_package(&["import . \"lib/a\""]);

        assert!(!bind(&mut comp, &pkg, Some(&StubImporter)));
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("dot-imports are not supported")));
    }

    #[test]
    fn missing_importer_fails_imports() {
        let (mut comp, pkg) = parse_package(&["import \"lib/a\""]);
        assert!(!bind(&mut comp, &pkg, None));
        assert!(comp
            .diags
            .messages()
            .iter()
            .any(|m| m.contains("no importer provided")));
    }

    #[test]
    fn import_cache_is_shared_across_fetches() {
        let (mut comp, pkg) = parse_package(&[
            "import a \"lib/shared\"",
            "import b \"lib/shared\"",
        ]);

        assert!(bind(&mut comp, &pkg, Some(&StubImporter)));
        assert_eq!(comp.diags.error_count(), 0, "{:?}", comp.diags.messages());

        assert!(comp
            .scopes
            .lookup_in(pkg.files[0].scope, Symbol::new("a"))
            .is_some());
        assert!(comp
            .scopes
            .lookup_in(pkg.files[1].scope, Symbol::new("b"))
            .is_some());
    }
}
