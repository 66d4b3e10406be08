use std::path::PathBuf;

use clap::{error::ErrorKind, CommandFactory, Parser as ClapParser};

use rillc::frontend::{
    ast::{self, Package},
    intern::Symbol,
    parser::Parser,
    scanner::{ScanMode, Scanner},
    scope::ScopeKind,
    token::Tok,
    Compilation, FileSet, SourceFileOrigin,
};

#[derive(Debug, ClapParser)]
#[command(version, about = "Rill compiler front end", long_about = None)]
pub struct Args {
    #[arg(short = 'e', value_enum)]
    emit: Option<EmitFormat>,

    /// Keep comments while scanning (visible with `-e tokens`)
    #[arg(long)]
    comments: bool,

    source_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmitFormat {
    #[value(name = "tokens")]
    Tokens,
    #[value(name = "ast")]
    Ast,
    #[value(name = "types")]
    Types,
}

fn main() {
    let args = Args::parse();

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Source file '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    let scan_mode = if args.comments {
        ScanMode::KeepComments
    } else {
        ScanMode::Normal
    };

    let mut files = FileSet::new();
    let mut file_ids = Vec::new();
    for path in &args.source_files {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                eprintln!("error: could not read {}: {e}", path.display());
                std::process::exit(1);
            }
        };
        file_ids.push(files.add(SourceFileOrigin::File(path.clone()), contents));
    }

    if args.emit == Some(EmitFormat::Tokens) {
        for &id in &file_ids {
            let mut scanner = Scanner::new(files.get(id), scan_mode);
            while scanner.tok != Tok::Eof {
                let pos = files
                    .position(scanner.span)
                    .map(|p| format!("{}:{}:{}", p.file, p.line, p.col))
                    .unwrap_or_default();
                println!("{pos}\t{:?}\t{:?}", scanner.tok, scanner.lexeme());
                scanner.next();
            }
        }
        return;
    }

    let mut comp = Compilation::new();
    let pkg_scope = comp
        .scopes
        .alloc(Some(comp.scopes.universe), ScopeKind::Package, None);

    let parsed: Vec<_> = file_ids
        .iter()
        .map(|&id| Parser::parse_file(&mut comp, files.get(id), pkg_scope, scan_mode))
        .collect();

    let package = Package {
        name: Symbol::new("main"),
        scope: pkg_scope,
        files: parsed,
    };

    rillc::frontend::bind::bind(&mut comp, &package, None);

    match args.emit {
        Some(EmitFormat::Ast) => {
            for file in &package.files {
                print!("{}", ast::dump_file(&comp, file));
            }
        }
        Some(EmitFormat::Types) => {
            for ent_id in comp.scopes.scope(pkg_scope).decls() {
                let ent = comp.scopes.ent(*ent_id);
                let ty = ent
                    .ty
                    .map(|t| comp.types.display(t))
                    .unwrap_or_else(|| "?".to_owned());
                println!("{}\t{}", ent.name, ty);
            }
        }
        _ => {}
    }

    comp.diags.render(&files);
    if comp.diags.has_errors() {
        std::process::exit(1);
    }
}
