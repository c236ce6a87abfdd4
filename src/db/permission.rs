//! Permission checker (C7): decides whether a connection may perform a
//! given operation against a given resource, grounded in
//! `multi_db/permission/checker.py`'s exact-then-glob lookup and
//! `default_policy` fallback.

use crate::error::{DbError, DbResult};
use crate::models::{AllowedOp, ConnectionConfig, OperationKind, ResourceRule};
use regex::Regex;

/// Translate a `*`/`?` glob into an anchored regex, mirroring the
/// Python implementation's `pattern.replace('*', '.*').replace('?', '.')`.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let mut out = String::with_capacity(pattern.len() * 2 + 2);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            c if regex_syntax::is_meta_character(c) => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push('$');
    Regex::new(&out).ok()
}

fn rule_covers(rule: &ResourceRule, op: OperationKind) -> bool {
    rule.allowed_ops.iter().any(|allowed| allowed.covers(op))
}

/// Look up the rule matching `resource`, exact match first, then the
/// first glob pattern (in map-iteration order) that matches.
fn find_matching_rule<'a>(
    rules: &'a std::collections::HashMap<String, ResourceRule>,
    resource: &str,
) -> Option<&'a ResourceRule> {
    if let Some(rule) = rules.get(resource) {
        return Some(rule);
    }
    rules.iter().find_map(|(pattern, rule)| {
        if pattern.contains('*') || pattern.contains('?') {
            glob_to_regex(pattern).filter(|re| re.is_match(resource)).map(|_| rule)
        } else {
            None
        }
    })
}

/// Check whether `connection` may perform `op` against `resource`
/// (spec.md §4.7). READ is always allowed once the connection itself is
/// usable; writes additionally require `writable` plus a matching rule
/// or an `allow_all` default policy.
pub fn check(connection: &ConnectionConfig, resource: &str, op: OperationKind) -> DbResult<()> {
    if op == OperationKind::Read {
        return Ok(());
    }

    if !connection.writable {
        return Err(DbError::permission(
            &connection.id,
            resource,
            op.as_str(),
            "connection is not writable",
        ));
    }

    let write_permissions = connection.write_permissions.clone().unwrap_or_default();
    let resource_class = connection.resource_class();
    let empty = std::collections::HashMap::new();
    let rules = write_permissions.rules.get(&resource_class).unwrap_or(&empty);

    if let Some(rule) = find_matching_rule(rules, resource) {
        if rule_covers(rule, op) {
            return Ok(());
        }
    }

    if write_permissions.default_policy == crate::models::DefaultPolicy::AllowAll {
        return Ok(());
    }

    Err(DbError::permission(
        &connection.id,
        resource,
        op.as_str(),
        "no matching permission rule",
    ))
}

/// The full set of operations allowed against `resource` under
/// `connection`, for introspection tools (spec.md §4.7: "dual query").
pub fn allowed_operations(connection: &ConnectionConfig, resource: &str) -> Vec<OperationKind> {
    let mut allowed = vec![OperationKind::Read];
    if !connection.writable {
        return allowed;
    }

    let write_permissions = connection.write_permissions.clone().unwrap_or_default();
    let resource_class = connection.resource_class();
    let empty = std::collections::HashMap::new();
    let rules = write_permissions.rules.get(&resource_class).unwrap_or(&empty);

    let mut add_all_writes = || {
        for op in [OperationKind::Insert, OperationKind::Update, OperationKind::Delete] {
            if !allowed.contains(&op) {
                allowed.push(op);
            }
        }
    };

    if let Some(rule) = find_matching_rule(rules, resource) {
        for op in [OperationKind::Insert, OperationKind::Update, OperationKind::Delete] {
            if rule_covers(rule, op) && !allowed.contains(&op) {
                allowed.push(op);
            }
        }
    }

    if write_permissions.default_policy == crate::models::DefaultPolicy::AllowAll {
        add_all_writes();
    }

    allowed
}

mod regex_syntax {
    pub fn is_meta_character(c: char) -> bool {
        matches!(
            c,
            '.' | '^' | '$' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '|' | '\\'
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::models::{DatabaseType, DefaultPolicy, ResourceClass, WritePermissions};
    use std::collections::{HashMap, HashSet};

    fn connection(writable: bool, write_permissions: Option<WritePermissions>) -> ConnectionConfig {
        ConnectionConfig::new(
            "analytics",
            DatabaseType::Postgres,
            "postgres://localhost/app",
            writable,
            None,
            write_permissions,
            PoolOptions::default(),
        )
        .unwrap()
    }

    #[test]
    fn read_is_always_allowed() {
        let conn = connection(false, None);
        assert!(check(&conn, "users", OperationKind::Read).is_ok());
    }

    #[test]
    fn write_denied_when_not_writable() {
        let conn = connection(false, None);
        assert!(check(&conn, "users", OperationKind::Insert).is_err());
    }

    #[test]
    fn exact_resource_match_allows_listed_op() {
        let mut rule_ops = HashSet::new();
        rule_ops.insert(AllowedOp::Insert);
        let mut tables = HashMap::new();
        tables.insert("users".to_string(), ResourceRule { allowed_ops: rule_ops });
        let mut rules = HashMap::new();
        rules.insert(ResourceClass::Tables, tables);
        let conn = connection(
            true,
            Some(WritePermissions {
                default_policy: DefaultPolicy::ReadOnly,
                rules,
            }),
        );
        assert!(check(&conn, "users", OperationKind::Insert).is_ok());
        assert!(check(&conn, "users", OperationKind::Delete).is_err());
    }

    #[test]
    fn glob_pattern_matches_resource() {
        let mut rule_ops = HashSet::new();
        rule_ops.insert(AllowedOp::All);
        let mut tables = HashMap::new();
        tables.insert("staging_*".to_string(), ResourceRule { allowed_ops: rule_ops });
        let mut rules = HashMap::new();
        rules.insert(ResourceClass::Tables, tables);
        let conn = connection(
            true,
            Some(WritePermissions {
                default_policy: DefaultPolicy::ReadOnly,
                rules,
            }),
        );
        assert!(check(&conn, "staging_events", OperationKind::Update).is_ok());
        assert!(check(&conn, "production_events", OperationKind::Update).is_err());
    }

    #[test]
    fn allow_all_default_policy_permits_unmatched_resource() {
        let conn = connection(
            true,
            Some(WritePermissions {
                default_policy: DefaultPolicy::AllowAll,
                rules: HashMap::new(),
            }),
        );
        assert!(check(&conn, "anything", OperationKind::Delete).is_ok());
    }

    #[test]
    fn allowed_operations_reports_read_only_when_not_writable() {
        let conn = connection(false, None);
        assert_eq!(allowed_operations(&conn, "users"), vec![OperationKind::Read]);
    }
}
