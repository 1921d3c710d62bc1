//! Expression rewrites applied to aggregate columns: windowing over a
//! coarser grouping, and restricting to a combinator group's rows.

use crate::sql::Expr;

const SELF_COMBINING: &[&str] = &["sum", "min", "max", "sumOrNull", "minOrNull", "maxOrNull"];

/// Re-aggregates `expr` over the given partition so it can sit in a select
/// grouped more finely than the level it belongs to.
///
/// `sum`/`min`/`max` combine with themselves, counts are summed, and any
/// other aggregate goes through its `-State`/`-Merge` pair.
pub(crate) fn window_aggregate(expr: &Expr, partition_by: &[Expr]) -> Expr {
    match expr {
        Expr::Function { name, params, args } => {
            let outer = if name.starts_with("count") {
                Expr::function("sum", vec![expr.clone()])
            } else if SELF_COMBINING.contains(&name.as_str()) {
                Expr::function(name.clone(), vec![expr.clone()])
            } else {
                Expr::parametric(
                    format!("{name}Merge"),
                    params.clone(),
                    vec![Expr::parametric(format!("{name}State"), params.clone(), args.clone())],
                )
            };
            Expr::window(outer, partition_by.to_vec(), Vec::new())
        }
        Expr::Infix { left, op, right } => Expr::infix(
            window_aggregate(left, partition_by),
            op.clone(),
            window_aggregate(right, partition_by),
        ),
        Expr::Paren(inner) => Expr::paren(window_aggregate(inner, partition_by)),
        other => other.clone(),
    }
}

/// Restricts every aggregate in `expr` to rows matching `condition`.
pub(crate) fn apply_condition(expr: &Expr, condition: &Expr) -> Expr {
    match expr {
        Expr::Function { .. } => add_condition(expr, condition),
        Expr::Window {
            function,
            partition_by,
            order_by,
        } => Expr::Window {
            function: Box::new(apply_in_window(function, condition)),
            partition_by: partition_by.clone(),
            order_by: order_by.clone(),
        },
        Expr::Infix { left, op, right } => Expr::infix(
            apply_condition(left, condition),
            op.clone(),
            apply_condition(right, condition),
        ),
        Expr::Paren(inner) => Expr::paren(apply_condition(inner, condition)),
        other => other.clone(),
    }
}

/// The window function of a re-aggregated column wraps the real aggregate;
/// only that inner aggregate sees rows.
fn apply_in_window(function: &Expr, condition: &Expr) -> Expr {
    match function {
        Expr::Function { name, params, args } if matches!(args.as_slice(), [Expr::Function { .. }]) => {
            Expr::Function {
                name: name.clone(),
                params: params.clone(),
                args: vec![add_condition(&args[0], condition)],
            }
        }
        other => add_condition(other, condition),
    }
}

fn add_condition(function: &Expr, condition: &Expr) -> Expr {
    let Expr::Function { name, params, args } = function else {
        return function.clone();
    };

    if function.is_count_star() || (name == "count" && args.is_empty()) {
        return Expr::function("countIf", vec![condition.clone()]);
    }

    // already conditional: tighten the existing predicate
    if has_if_combinator(name) {
        if let Some((last, rest)) = args.split_last() {
            let mut args = rest.to_vec();
            args.push(Expr::and(last.clone(), condition.clone()));
            return Expr::parametric(name.clone(), params.clone(), args);
        }
    }

    let mut args = args.clone();
    args.push(condition.clone());
    Expr::parametric(conditional_name(name), params.clone(), args)
}

const COMBINATOR_SUFFIXES: [&str; 3] = ["OrNullState", "State", "OrNull"];

/// `countIf`, `avgIfOrNull`, `uniqIfState`; not `multiIf` or a name that
/// merely contains `If`.
fn has_if_combinator(name: &str) -> bool {
    let core = COMBINATOR_SUFFIXES
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .unwrap_or(name);
    core.len() > "If".len() && core.ends_with("If") && core != "multiIf"
}

/// Inserts the `-If` combinator before `-OrNull`/`-State` suffixes.
fn conditional_name(name: &str) -> String {
    for suffix in COMBINATOR_SUFFIXES {
        if let Some(core) = name.strip_suffix(suffix) {
            if !core.is_empty() {
                return format!("{core}If{suffix}");
            }
        }
    }
    format!("{name}If")
}
