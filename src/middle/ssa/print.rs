//! Human-readable SSA dump. Stable across runs but not a wire format.

use colored::Colorize;
use itertools::Itertools;

use crate::middle::ssa::{BlockKind, Fun, Op};

pub fn pretty_print_fun(fun: &Fun) {
    println!(
        "{} {}{}",
        "fun".magenta(),
        fun.name.value().blue(),
        format!(" (nargs {})", fun.nargs).dimmed()
    );

    for &b in &fun.blocks {
        let block = fun.block(b);
        let kind = match block.kind {
            BlockKind::Invalid => "invalid",
            BlockKind::Plain => "plain",
            BlockKind::If => "if",
            BlockKind::Ret => "ret",
            BlockKind::First => "first",
        };

        let preds = block.preds.iter().map(|p| format!("b{}", p.0)).join(", ");
        let header = if preds.is_empty() {
            format!("b{} [{kind}]", b.0)
        } else {
            format!("b{} [{kind}] <- {preds}", b.0)
        };
        println!("{}", header.bright_red());

        for &v in &block.values {
            let value = fun.value(v);
            if value.op == Op::Invalid {
                continue;
            }

            let args = value.args.iter().map(|a| format!("v{}", a.0)).join(", ");
            let mut line = format!("    v{} = {} {}", v.0, value.op.name().cyan(), args);
            if value.op.is_const() {
                line.push_str(&format!(" [{}]", value.aux_int).purple().to_string());
            }
            if let Some(aux) = value.aux {
                line.push_str(&format!(" {{{aux}}}"));
            }
            line.push_str(&format!(" (uses {})", value.uses).dimmed().to_string());
            println!("{line}");
        }

        if let Some(c) = block.control {
            println!("    {} v{}", "control".yellow(), c.0);
        }
        if !block.succs.is_empty() {
            let succs = block.succs.iter().map(|s| format!("b{}", s.0)).join(", ");
            println!("    {} {}", "->".yellow(), succs);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::Config,
        frontend::{
            intern::Symbol,
            types::{PrimKind, TypeInterner},
            Span,
        },
        middle::ssa::BlockKind,
    };

    #[test]
    fn dump_does_not_panic_on_a_small_fun() {
        let types = TypeInterner::new();
        let int = types.prim(PrimKind::Int);
        let mut fun = Fun::new(
            Arc::new(Config::for_testing()),
            Symbol::new("demo"),
            types.prim(PrimKind::Void),
            1,
        );

        let a = fun.const_val(&types, int, 40);
        let b = fun.const_val(&types, int, 2);
        let sum = fun.new_value_args(fun.entry, Op::Add, int, Span::NONE, &[a, b]);

        let ret = fun.new_block(BlockKind::Ret);
        fun.add_edge_to(fun.entry, ret);
        fun.set_control(ret, Some(sum));

        pretty_print_fun(&fun);
    }
}
