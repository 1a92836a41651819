//! Textual schema rendering
//!
//! Turns introspected table shapes into the DDL-like text handed to an LLM
//! as context. Large catalogs are capped: the first `cap` tables render in
//! full and the remainder is listed by name only, clearly marked, so the
//! output stays inside a prompt token budget.

use crate::models::structs::TableInfo;

fn render_table(table: &TableInfo, out: &mut String) {
    let qualified = match &table.schema {
        Some(schema) => format!("{}.{}", schema, table.name),
        None => table.name.clone(),
    };
    out.push_str(&format!("CREATE TABLE {} (\n", qualified));
    let last = table.columns.len().saturating_sub(1);
    for (idx, col) in table.columns.iter().enumerate() {
        out.push_str(&format!("  {} {}", col.name, col.data_type));
        if !col.nullable {
            out.push_str(" NOT NULL");
        }
        if col.primary_key {
            out.push_str(" PRIMARY KEY");
        }
        if idx != last {
            out.push(',');
        }
        if let Some(comment) = &col.comment
            && !comment.is_empty()
        {
            out.push_str(&format!(" -- {}", comment));
        }
        out.push('\n');
    }
    out.push_str(");");
    if let Some(rows) = table.approx_rows {
        out.push_str(&format!(" -- ~{} rows", rows));
    }
    out.push('\n');
}

/// Render every table up to `cap` in full, then a names-only manifest of
/// whatever was cut. Input order is preserved (adapters list tables in a
/// stable sorted order).
pub fn render_ddl(tables: &[TableInfo], cap: usize) -> String {
    let mut out = String::new();
    let shown = tables.len().min(cap.max(1));
    for (idx, table) in tables.iter().take(shown).enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        render_table(table, &mut out);
    }
    if tables.len() > shown {
        let rest: Vec<&str> = tables[shown..].iter().map(|t| t.name.as_str()).collect();
        out.push_str(&format!(
            "\n-- schema truncated: {} additional tables listed by name only:\n-- {}\n",
            rest.len(),
            rest.join(", ")
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::structs::ColumnInfo;

    fn table(name: &str) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            schema: Some("public".to_string()),
            columns: vec![
                ColumnInfo {
                    name: "id".into(),
                    data_type: "bigint".into(),
                    nullable: false,
                    primary_key: true,
                    comment: None,
                },
                ColumnInfo {
                    name: "label".into(),
                    data_type: "text".into(),
                    nullable: true,
                    primary_key: false,
                    comment: Some("display name".into()),
                },
            ],
            approx_rows: Some(1200),
        }
    }

    #[test]
    fn test_renders_columns_and_estimates() {
        let ddl = render_ddl(&[table("users")], 40);
        assert!(ddl.contains("CREATE TABLE public.users ("));
        assert!(ddl.contains("id bigint NOT NULL PRIMARY KEY"));
        assert!(ddl.contains("label text"));
        assert!(ddl.contains("-- display name"));
        assert!(ddl.contains("~1200 rows"));
        assert!(!ddl.contains("truncated"));
    }

    #[test]
    fn test_caps_large_catalogs_with_manifest() {
        let tables: Vec<TableInfo> = (0..6).map(|i| table(&format!("t{i}"))).collect();
        let ddl = render_ddl(&tables, 4);
        assert!(ddl.contains("CREATE TABLE public.t3"));
        assert!(!ddl.contains("CREATE TABLE public.t4"));
        assert!(ddl.contains("schema truncated: 2 additional tables"));
        assert!(ddl.contains("t4, t5"));
    }

    #[test]
    fn test_unknown_row_count_renders_no_estimate() {
        let mut t = table("events");
        t.approx_rows = None;
        let ddl = render_ddl(&[t], 40);
        assert!(!ddl.contains("rows"));
    }
}
