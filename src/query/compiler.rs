//! A small fact-matching query language.
//!
//! A query is one or more clauses joined by `&&`. A clause is either a fact
//! path (`platform.name`) or a comparison against a literal
//! (`platform.name == "debian"`, `kernel.version != 5`).

use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use super::{CodeBundle, CompareOp, Expr, Node, QueryCompiler};
use crate::error::ScanError;
use crate::models::{DataType, Value};

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleCompiler;

impl SimpleCompiler {
    pub fn new() -> Self {
        Self
    }
}

impl QueryCompiler for SimpleCompiler {
    fn compile(&self, mql: &str) -> Result<CodeBundle, ScanError> {
        let clauses: Vec<&str> = mql.split("&&").map(str::trim).collect();
        if clauses.iter().all(|c| c.is_empty()) {
            return Err(ScanError::compile(mql, "query is empty"));
        }

        let mut nodes = BTreeMap::new();
        let mut datapoints = BTreeSet::new();
        let mut entrypoints = Vec::new();
        let mut normalized = Vec::with_capacity(clauses.len());

        for clause in clauses {
            if clause.is_empty() {
                return Err(ScanError::compile(mql, "empty clause next to '&&'"));
            }

            let expr = parse_clause(clause).map_err(|msg| ScanError::compile(mql, msg))?;
            let text = normalize(&expr);
            let checksum = checksum_of(&text);

            if let Expr::Compare { path, .. } = &expr {
                let lookup = Expr::Lookup { path: path.clone() };
                let lookup_sum = checksum_of(&normalize(&lookup));
                nodes.insert(
                    lookup_sum.clone(),
                    Node {
                        expr: lookup,
                        data_type: DataType::Unset,
                    },
                );
                datapoints.insert(lookup_sum);
            }

            let data_type = match expr {
                Expr::Lookup { .. } => DataType::Unset,
                Expr::Compare { .. } => DataType::Bool,
            };
            nodes.insert(checksum.clone(), Node { expr, data_type });
            if !entrypoints.contains(&checksum) {
                entrypoints.push(checksum);
            }
            normalized.push(text);
        }

        // a bare path that is also compared elsewhere is reported, not hidden
        datapoints.retain(|c| !entrypoints.contains(c));

        let source = normalized.join(" && ");
        let id = checksum_of(&format!("code:{}", source));
        trace!(code_id = %id, "compiled query");

        Ok(CodeBundle::new(
            id,
            mql.trim().to_string(),
            nodes,
            datapoints.into_iter().collect(),
            entrypoints,
        ))
    }
}

fn checksum_of(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

fn normalize(expr: &Expr) -> String {
    match expr {
        Expr::Lookup { path } => path.clone(),
        Expr::Compare { path, op, literal } => {
            let op = match op {
                CompareOp::Eq => "==",
                CompareOp::Ne => "!=",
            };
            format!("{} {} {}", path, op, literal)
        }
    }
}

fn parse_clause(clause: &str) -> Result<Expr, String> {
    for (token, op) in [("==", CompareOp::Eq), ("!=", CompareOp::Ne)] {
        if let Some((lhs, rhs)) = clause.split_once(token) {
            let path = parse_path(lhs.trim())?;
            let literal = parse_literal(rhs.trim())?;
            return Ok(Expr::Compare { path, op, literal });
        }
    }

    Ok(Expr::Lookup {
        path: parse_path(clause)?,
    })
}

fn parse_path(raw: &str) -> Result<String, String> {
    let valid = !raw.is_empty()
        && raw.split('.').all(|seg| {
            !seg.is_empty()
                && seg
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        });

    if valid {
        Ok(raw.to_string())
    } else {
        Err(format!("invalid fact path '{}'", raw))
    }
}

fn parse_literal(raw: &str) -> Result<Value, String> {
    if raw.is_empty() {
        return Err("missing literal after comparison".to_string());
    }

    for quote in ['"', '\''] {
        if raw.starts_with(quote) {
            return raw
                .strip_prefix(quote)
                .and_then(|s| s.strip_suffix(quote))
                .map(Value::from)
                .ok_or_else(|| format!("unterminated string literal {}", raw));
        }
    }

    let value = match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "null" => Value::Nil,
        _ => {
            if let Ok(n) = raw.parse::<i64>() {
                Value::Int(n)
            } else if let Ok(n) = raw.parse::<f64>() {
                Value::Float(n)
            } else if raw.chars().any(char::is_whitespace) {
                return Err(format!("unexpected token in literal '{}'", raw));
            } else {
                Value::from(raw)
            }
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_path_is_entrypoint() {
        let code = SimpleCompiler.compile("platform.name").unwrap();
        assert_eq!(code.entrypoint_checksums().len(), 1);
        assert!(code.datapoint_checksums().is_empty());
        assert_eq!(
            code.declared_type(&code.entrypoint_checksums()[0]),
            DataType::Unset
        );
    }

    #[test]
    fn test_comparison_adds_datapoint() {
        let code = SimpleCompiler
            .compile(r#"platform.name == "debian" && arch != 'arm64'"#)
            .unwrap();
        assert_eq!(code.entrypoint_checksums().len(), 2);
        assert_eq!(code.datapoint_checksums().len(), 2);
        for ep in code.entrypoint_checksums() {
            assert_eq!(code.declared_type(ep), DataType::Bool);
        }
        assert_eq!(code.all_checksums().count(), 4);
    }

    #[test]
    fn test_equal_source_gives_equal_ids() {
        let a = SimpleCompiler.compile("platform.name == \"debian\"").unwrap();
        let b = SimpleCompiler.compile("  platform.name ==   'debian'  ").unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.entrypoint_checksums(), b.entrypoint_checksums());

        let c = SimpleCompiler.compile("platform.name == \"ubuntu\"").unwrap();
        assert_ne!(a.id, c.id);
    }

    #[test]
    fn test_shared_path_is_not_duplicated() {
        let code = SimpleCompiler
            .compile("platform.name && platform.name == debian")
            .unwrap();
        assert_eq!(code.entrypoint_checksums().len(), 2);
        assert!(code.datapoint_checksums().is_empty());
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse_literal("42"), Ok(Value::Int(42)));
        assert_eq!(parse_literal("1.5"), Ok(Value::Float(1.5)));
        assert_eq!(parse_literal("true"), Ok(Value::Bool(true)));
        assert_eq!(parse_literal("null"), Ok(Value::Nil));
        assert_eq!(parse_literal("debian"), Ok(Value::from("debian")));
        assert!(parse_literal("\"open").is_err());
        assert!(parse_literal("two words").is_err());
    }

    #[test]
    fn test_compile_errors() {
        for bad in ["", "&&", "platform..name", "a == ", "os name", "a && && b"] {
            let err = SimpleCompiler.compile(bad).unwrap_err();
            assert!(
                matches!(err, ScanError::Compile { .. }),
                "expected compile error for {:?}",
                bad
            );
        }
    }
}
