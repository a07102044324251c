//! SMT-LIB 2 rendering.
//!
//! Axioms are asserted one by one and the conjectures are asserted negated,
//! so `unsat` means every conjecture follows from the axioms.

use std::fmt;

use super::{Binder, Formula, Symbols, Term, Theory};

/// Display adapter rendering a theory as an SMT-LIB script
pub struct SmtLib<'a>(pub &'a Theory);

impl fmt::Display for SmtLib<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let theory = self.0;
        let symbols = &theory.symbols;

        writeln!(f, "; {}", theory.name)?;
        for sort in &symbols.sorts {
            writeln!(f, "(declare-sort {} 0)", sort)?;
        }
        for func in &symbols.functions {
            let args: Vec<&str> = func.args.iter().map(|s| symbols.sort_name(*s)).collect();
            writeln!(
                f,
                "(declare-fun {} ({}) {})",
                func.name,
                args.join(" "),
                symbols.sort_name(func.result)
            )?;
        }
        for pred in &symbols.predicates {
            let args: Vec<&str> = pred.args.iter().map(|s| symbols.sort_name(*s)).collect();
            writeln!(f, "(declare-fun {} ({}) Bool)", pred.name, args.join(" "))?;
        }
        for axiom in &theory.axioms {
            writeln!(f, "(assert {})", Render(symbols, axiom))?;
        }
        writeln!(f, "(assert {})", Render(symbols, &theory.negated_goal()))?;
        writeln!(f, "(check-sat)")
    }
}

struct Render<'a>(&'a Symbols, &'a Formula);

struct RenderTerm<'a>(&'a Symbols, &'a Term);

impl fmt::Display for RenderTerm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Term::Var(name) => write!(f, "{}", name),
            Term::App(func, args) if args.is_empty() => {
                write!(f, "{}", self.0.function(*func).name)
            }
            Term::App(func, args) => {
                write!(f, "({}", self.0.function(*func).name)?;
                for arg in args {
                    write!(f, " {}", RenderTerm(self.0, arg))?;
                }
                write!(f, ")")
            }
        }
    }
}

impl fmt::Display for Render<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbols = self.0;
        match self.1 {
            Formula::True => write!(f, "true"),
            Formula::False => write!(f, "false"),
            Formula::Atom(pred, args) if args.is_empty() => {
                write!(f, "{}", symbols.predicate(*pred).name)
            }
            Formula::Atom(pred, args) => {
                write!(f, "({}", symbols.predicate(*pred).name)?;
                for arg in args {
                    write!(f, " {}", RenderTerm(symbols, arg))?;
                }
                write!(f, ")")
            }
            Formula::Eq(a, b) => write!(
                f,
                "(= {} {})",
                RenderTerm(symbols, a),
                RenderTerm(symbols, b)
            ),
            Formula::Not(inner) => write!(f, "(not {})", Render(symbols, inner)),
            Formula::And(parts) => junction(f, symbols, "and", "true", parts),
            Formula::Or(parts) => junction(f, symbols, "or", "false", parts),
            Formula::Implies(a, b) => {
                write!(f, "(=> {} {})", Render(symbols, a), Render(symbols, b))
            }
            Formula::Iff(a, b) => write!(f, "(= {} {})", Render(symbols, a), Render(symbols, b)),
            Formula::ForAll(vars, body) => quantifier(f, symbols, "forall", vars, body),
            Formula::Exists(vars, body) => quantifier(f, symbols, "exists", vars, body),
        }
    }
}

fn junction(
    f: &mut fmt::Formatter<'_>,
    symbols: &Symbols,
    op: &str,
    unit: &str,
    parts: &[Formula],
) -> fmt::Result {
    match parts {
        [] => write!(f, "{}", unit),
        [only] => write!(f, "{}", Render(symbols, only)),
        _ => {
            write!(f, "({}", op)?;
            for part in parts {
                write!(f, " {}", Render(symbols, part))?;
            }
            write!(f, ")")
        }
    }
}

fn quantifier(
    f: &mut fmt::Formatter<'_>,
    symbols: &Symbols,
    op: &str,
    vars: &[Binder],
    body: &Formula,
) -> fmt::Result {
    if vars.is_empty() {
        return write!(f, "{}", Render(symbols, body));
    }
    write!(f, "({} (", op)?;
    for (i, (name, sort)) in vars.iter().enumerate() {
        if i > 0 {
            write!(f, " ")?;
        }
        write!(f, "({} {})", name, symbols.sort_name(*sort))?;
    }
    write!(f, ") {})", Render(symbols, body))
}
