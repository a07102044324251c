//! SPASS DFG rendering.

use std::fmt;

use super::{Formula, Symbols, Term, Theory};

/// Display adapter rendering a theory as a DFG problem
pub struct Dfg<'a>(pub &'a Theory);

impl fmt::Display for Dfg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let theory = self.0;
        let symbols = &theory.symbols;

        writeln!(f, "begin_problem({}).", problem_name(&theory.name))?;
        writeln!(f)?;
        writeln!(f, "list_of_descriptions.")?;
        writeln!(f, "name({{*{}*}}).", theory.name)?;
        writeln!(f, "author({{*dsverify*}}).")?;
        writeln!(f, "status(unknown).")?;
        writeln!(f, "description({{*data store invariant preservation*}}).")?;
        writeln!(f, "end_of_list.")?;
        writeln!(f)?;

        writeln!(f, "list_of_symbols.")?;
        if !symbols.functions.is_empty() {
            let decls: Vec<String> = symbols
                .functions
                .iter()
                .map(|s| format!("({},{})", s.name, s.args.len()))
                .collect();
            writeln!(f, "functions[{}].", decls.join(", "))?;
        }
        if !symbols.predicates.is_empty() {
            let decls: Vec<String> = symbols
                .predicates
                .iter()
                .map(|s| format!("({},{})", s.name, s.args.len()))
                .collect();
            writeln!(f, "predicates[{}].", decls.join(", "))?;
        }
        if !symbols.sorts.is_empty() {
            writeln!(f, "sorts[{}].", symbols.sorts.join(", "))?;
        }
        writeln!(f, "end_of_list.")?;
        writeln!(f)?;

        writeln!(f, "list_of_declarations.")?;
        for pred in symbols.predicates.iter().filter(|p| !p.args.is_empty()) {
            let sorts: Vec<&str> = pred.args.iter().map(|s| symbols.sort_name(*s)).collect();
            writeln!(f, "predicate({}, {}).", pred.name, sorts.join(", "))?;
        }
        for func in &symbols.functions {
            let vars: Vec<String> = (1..=func.args.len()).map(|i| format!("X{}", i)).collect();
            let binders: Vec<String> = func
                .args
                .iter()
                .zip(&vars)
                .map(|(s, v)| format!("{}({})", symbols.sort_name(*s), v))
                .collect();
            let result = format!(
                "{}({}({}))",
                symbols.sort_name(func.result),
                func.name,
                vars.join(",")
            );
            if binders.is_empty() {
                writeln!(f, "{}.", result)?;
            } else {
                writeln!(f, "forall([{}], {}).", binders.join(", "), result)?;
            }
        }
        writeln!(f, "end_of_list.")?;
        writeln!(f)?;

        writeln!(f, "list_of_formulae(axioms).")?;
        for axiom in &theory.axioms {
            writeln!(f, "formula({}).", Render(symbols, axiom))?;
        }
        writeln!(f, "end_of_list.")?;
        writeln!(f)?;

        writeln!(f, "list_of_formulae(conjectures).")?;
        for conjecture in &theory.conjectures {
            writeln!(f, "formula({}).", Render(symbols, conjecture))?;
        }
        writeln!(f, "end_of_list.")?;
        writeln!(f)?;
        writeln!(f, "end_problem.")
    }
}

fn problem_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.starts_with(|c: char| c.is_ascii_alphabetic()) {
        cleaned
    } else {
        format!("p{}", cleaned)
    }
}

struct Render<'a>(&'a Symbols, &'a Formula);

struct RenderTerm<'a>(&'a Symbols, &'a Term);

impl fmt::Display for RenderTerm<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.1 {
            Term::Var(name) => write!(f, "{}", name),
            Term::App(func, args) => {
                write!(f, "{}", self.0.function(*func).name)?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}", RenderTerm(self.0, arg))?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
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
            Formula::Atom(pred, args) => {
                write!(f, "{}", symbols.predicate(*pred).name)?;
                if !args.is_empty() {
                    write!(f, "(")?;
                    for (i, arg) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ",")?;
                        }
                        write!(f, "{}", RenderTerm(symbols, arg))?;
                    }
                    write!(f, ")")?;
                }
                Ok(())
            }
            Formula::Eq(a, b) => write!(
                f,
                "equal({},{})",
                RenderTerm(symbols, a),
                RenderTerm(symbols, b)
            ),
            Formula::Not(inner) => write!(f, "not({})", Render(symbols, inner)),
            Formula::And(parts) => junction(f, symbols, "and", "true", parts),
            Formula::Or(parts) => junction(f, symbols, "or", "false", parts),
            Formula::Implies(a, b) => write!(
                f,
                "implies({},{})",
                Render(symbols, a),
                Render(symbols, b)
            ),
            Formula::Iff(a, b) => write!(f, "equiv({},{})", Render(symbols, a), Render(symbols, b)),
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
            write!(f, "{}(", op)?;
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    write!(f, ",")?;
                }
                write!(f, "{}", Render(symbols, part))?;
            }
            write!(f, ")")
        }
    }
}

fn quantifier(
    f: &mut fmt::Formatter<'_>,
    symbols: &Symbols,
    op: &str,
    vars: &[super::Binder],
    body: &Formula,
) -> fmt::Result {
    if vars.is_empty() {
        return write!(f, "{}", Render(symbols, body));
    }
    write!(f, "{}([", op)?;
    for (i, (name, sort)) in vars.iter().enumerate() {
        if i > 0 {
            write!(f, ",")?;
        }
        write!(f, "{}({})", symbols.sort_name(*sort), name)?;
    }
    write!(f, "],{})", Render(symbols, body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fol::{Formula, Symbols, Term, Theory};

    #[test]
    fn test_dfg_sections() {
        let mut symbols = Symbols::new();
        let obj = symbols.add_sort("Obj");
        let tup = symbols.add_sort("tuple");
        let left = symbols.add_function("left", vec![tup], obj);
        let p = symbols.add_predicate("exists", vec![obj]);
        let flag = symbols.add_predicate("flag", vec![]);

        let mut theory = Theory::new("create twice", symbols);
        theory.axioms.push(Formula::forall(
            vec![("V1".into(), tup)],
            Formula::atom(p, vec![Term::app(left, vec![Term::var("V1")])]),
        ));
        theory.conjectures.push(Formula::implies(
            Formula::atom(flag, vec![]),
            Formula::exists(vec![("V2".into(), obj)], Formula::atom(p, vec![Term::var("V2")])),
        ));

        let text = theory.to_dfg();
        assert!(text.starts_with("begin_problem(create_twice)."));
        assert!(text.contains("functions[(left,1)]."));
        assert!(text.contains("predicates[(exists_2,1), (flag,0)]."));
        assert!(text.contains("sorts[obj, tuple]."));
        assert!(text.contains("predicate(exists_2, obj)."));
        assert!(text.contains("forall([tuple(X1)], obj(left(X1)))."));
        assert!(text.contains("formula(forall([tuple(V1)],exists_2(left(V1))))."));
        assert!(text.contains("formula(implies(flag,exists([obj(V2)],exists_2(V2))))."));
        assert!(text.trim_end().ends_with("end_problem."));
    }
}
