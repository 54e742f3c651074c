//! Table and column name reconciliation between the source and target catalogs.
//!
//! Both functions are pure: the same inputs always produce the same result,
//! which lets the validation engine reuse them to rebuild the exact mapping the
//! migration used.

use serde::{Deserialize, Serialize};

use crate::core::TableSchema;

/// Resolve a source table name against the target catalog.
///
/// Matching order, first hit wins:
/// 1. exact match
/// 2. case-insensitive match
/// 3. snake_case converted to PascalCase (`order_items` -> `OrderItems`), exact
/// 4. the PascalCase form, case-insensitive
///
/// A case-insensitive rule that matches more than one catalog name is
/// ambiguous and resolves to `None` without falling through to later rules.
/// No fuzzy matching is attempted; anything else is `None`.
pub fn resolve_target_table<'a, S: AsRef<str>>(
    source_table: &str,
    target_tables: &'a [S],
) -> Option<&'a str> {
    let find_exact = |name: &str| {
        target_tables
            .iter()
            .map(AsRef::as_ref)
            .find(|candidate| *candidate == name)
    };
    let find_folded = |name: &str| -> Match<'a> {
        let folded = name.to_lowercase();
        let mut hits = target_tables
            .iter()
            .map(AsRef::as_ref)
            .filter(|candidate| candidate.to_lowercase() == folded);
        match (hits.next(), hits.next()) {
            (None, _) => Match::None,
            (Some(hit), None) => Match::Unique(hit),
            (Some(_), Some(_)) => Match::Ambiguous,
        }
    };

    if let Some(hit) = find_exact(source_table) {
        return Some(hit);
    }
    match find_folded(source_table) {
        Match::Unique(hit) => return Some(hit),
        Match::Ambiguous => return None,
        Match::None => {}
    }

    let pascal = to_pascal_case(source_table);
    if let Some(hit) = find_exact(&pascal) {
        return Some(hit);
    }
    match find_folded(&pascal) {
        Match::Unique(hit) => Some(hit),
        Match::Ambiguous | Match::None => None,
    }
}

enum Match<'a> {
    None,
    Unique(&'a str),
    Ambiguous,
}

/// Convert an underscore-delimited name to concatenated capitalized words.
///
/// Each word gets an upper-cased first character and a lower-cased rest, so
/// `order_items` and `ORDER_ITEMS` both become `OrderItems`.
pub fn to_pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split('_') {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(&chars.as_str().to_lowercase());
        }
    }
    out
}

/// Positional pairing of source columns to target columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// `(source_index, target_index)` pairs in source column order.
    pub pairs: Vec<(usize, usize)>,
}

impl ColumnMapping {
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// The pairs re-ordered by target column position.
    pub fn by_target_order(&self) -> Vec<(usize, usize)> {
        let mut ordered = self.pairs.clone();
        ordered.sort_by_key(|&(_, target_idx)| target_idx);
        ordered
    }
}

/// Match columns by name: exact first, then case-insensitive.
///
/// Columns present on only one side are dropped. A target column is claimed by
/// at most one source column, so the mapping never exceeds the smaller of the
/// two column counts.
pub fn build_column_mapping(source: &TableSchema, target: &TableSchema) -> ColumnMapping {
    let mut claimed = vec![false; target.column_names.len()];
    let mut pairs = Vec::with_capacity(source.column_names.len().min(target.column_names.len()));

    for (source_idx, source_name) in source.column_names.iter().enumerate() {
        let exact = target
            .column_names
            .iter()
            .enumerate()
            .find(|(idx, name)| !claimed[*idx] && *name == source_name)
            .map(|(idx, _)| idx);

        let matched = exact.or_else(|| {
            let folded = source_name.to_lowercase();
            target
                .column_names
                .iter()
                .enumerate()
                .find(|(idx, name)| !claimed[*idx] && name.to_lowercase() == folded)
                .map(|(idx, _)| idx)
        });

        if let Some(target_idx) = matched {
            claimed[target_idx] = true;
            pairs.push((source_idx, target_idx));
        }
    }

    ColumnMapping { pairs }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ColumnDescriptor;

    fn schema(name: &str, columns: &[&str]) -> TableSchema {
        TableSchema::new(
            name,
            columns
                .iter()
                .map(|c| ColumnDescriptor::new(*c, "text"))
                .collect(),
        )
    }

    #[test]
    fn test_pascal_case() {
        assert_eq!(to_pascal_case("order_items"), "OrderItems");
        assert_eq!(to_pascal_case("orders"), "Orders");
        assert_eq!(to_pascal_case("USER_ROLES"), "UserRoles");
        assert_eq!(to_pascal_case("a__b"), "AB");
        assert_eq!(to_pascal_case(""), "");
    }

    #[test]
    fn test_exact_match_wins() {
        let catalog = ["Orders", "orders"];
        assert_eq!(resolve_target_table("orders", &catalog), Some("orders"));
    }

    #[test]
    fn test_case_insensitive_match() {
        let catalog = ["ORDERS", "users"];
        assert_eq!(resolve_target_table("orders", &catalog), Some("ORDERS"));
    }

    #[test]
    fn test_case_insensitive_beats_pascal() {
        // "order_items" folds to "ORDER_ITEMS" before PascalCase is tried
        let catalog = ["OrderItems", "ORDER_ITEMS"];
        assert_eq!(
            resolve_target_table("order_items", &catalog),
            Some("ORDER_ITEMS")
        );
    }

    #[test]
    fn test_pascal_case_match() {
        let catalog = vec!["Customers".to_string(), "OrderItems".to_string()];
        assert_eq!(
            resolve_target_table("order_items", &catalog),
            Some("OrderItems")
        );
    }

    #[test]
    fn test_pascal_case_insensitive_match() {
        let catalog = ["Orderitems"];
        assert_eq!(
            resolve_target_table("order_items", &catalog),
            Some("Orderitems")
        );
    }

    #[test]
    fn test_not_found_is_never_guessed() {
        let catalog = ["Orders", "OrderItem"];
        assert_eq!(resolve_target_table("order_items", &catalog), None);
        assert_eq!(resolve_target_table("ordrs", &catalog), None);
    }

    #[test]
    fn test_ambiguous_case_insensitive_match_is_not_found() {
        let catalog = ["ORDERS", "Orders"];
        assert_eq!(resolve_target_table("orders", &catalog), None);

        // ambiguity stops resolution, PascalCase is not tried afterwards
        let catalog = ["ORDER_ITEMS", "Order_Items", "OrderItems"];
        assert_eq!(resolve_target_table("order_items", &catalog), None);

        let catalog = ["ORDERITEMS", "Orderitems"];
        assert_eq!(resolve_target_table("order_items", &catalog), None);
    }

    #[test]
    fn test_exact_pascal_match_is_not_ambiguous() {
        let catalog = ["OrderItems", "ORDERITEMS"];
        assert_eq!(
            resolve_target_table("order_items", &catalog),
            Some("OrderItems")
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let catalog = ["Users", "users_archive", "UserRoles"];
        for name in ["users", "user_roles", "missing"] {
            assert_eq!(
                resolve_target_table(name, &catalog),
                resolve_target_table(name, &catalog)
            );
        }
    }

    #[test]
    fn test_column_mapping_exact_then_folded() {
        let source = schema("orders", &["id", "Total", "note", "legacy_flag"]);
        let target = schema("Orders", &["ID", "id", "total", "note", "created_at"]);
        let mapping = build_column_mapping(&source, &target);
        assert_eq!(mapping.pairs, vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn test_column_mapping_has_no_convention_conversion() {
        let source = schema("t", &["created_at"]);
        let target = schema("T", &["CreatedAt"]);
        assert!(build_column_mapping(&source, &target).is_empty());
    }

    #[test]
    fn test_column_mapping_subset_property() {
        let source = schema("t", &["a", "A", "b", "c"]);
        let target = schema("t", &["a", "B"]);
        let mapping = build_column_mapping(&source, &target);
        assert!(mapping.len() <= source.len().min(target.len()));
        for (s, t) in &mapping.pairs {
            assert_eq!(
                source.column_names[*s].to_lowercase(),
                target.column_names[*t].to_lowercase()
            );
        }
        // "A" cannot claim target "a" a second time
        assert_eq!(mapping.pairs, vec![(0, 0), (2, 1)]);
    }

    #[test]
    fn test_by_target_order() {
        let source = schema("t", &["b", "a"]);
        let target = schema("t", &["a", "b"]);
        let mapping = build_column_mapping(&source, &target);
        assert_eq!(mapping.pairs, vec![(0, 1), (1, 0)]);
        assert_eq!(mapping.by_target_order(), vec![(1, 0), (0, 1)]);
    }
}
