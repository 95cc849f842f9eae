//! Declarative schema catalog.
//!
//! A single JSON document is the contract shared by the SQL, vector, and
//! graph engines and by the migrator: entities (tables), their fields, an
//! allow-list, and join rules. Loaded once, read-only during a request.
//!
//! Table names follow the source framework's `tab<DocType>` convention;
//! the catalog maps between table names and canonical doctype names, and
//! between doctypes and graph labels (snake_case node properties,
//! UPPER_CASE relationship types).

use crate::types::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One field of an entity.
///
/// Accepts either a bare column name (the generator's compact form) or a
/// detailed object carrying the semantic type and, for select fields, the
/// exact permitted options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnDef {
    Name(String),
    Detailed {
        name: String,
        #[serde(default = "default_fieldtype")]
        fieldtype: String,
        #[serde(default)]
        options: Vec<String>,
        #[serde(default = "default_nullable")]
        nullable: bool,
    },
}

fn default_fieldtype() -> String {
    "Data".to_string()
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    pub fn name(&self) -> &str {
        match self {
            ColumnDef::Name(n) => n,
            ColumnDef::Detailed { name, .. } => name,
        }
    }

    pub fn fieldtype(&self) -> &str {
        match self {
            ColumnDef::Name(_) => "Data",
            ColumnDef::Detailed { fieldtype, .. } => fieldtype,
        }
    }

    pub fn options(&self) -> &[String] {
        match self {
            ColumnDef::Name(_) => &[],
            ColumnDef::Detailed { options, .. } => options,
        }
    }
}

/// One entity (table) entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    /// Canonical doctype name; derived from the table name when absent
    #[serde(default)]
    pub doctype: Option<String>,

    #[serde(default)]
    pub columns: Vec<ColumnDef>,

    #[serde(default)]
    pub description: String,

    /// Preferred human-readable field for this entity
    #[serde(default)]
    pub display_field: Option<String>,
}

/// Declared join between two tables (becomes a directed graph edge).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinRule {
    pub left_table: String,
    pub left_key: String,
    pub right_table: String,
    pub right_key: String,

    #[serde(default)]
    pub why: String,

    /// Explicit relationship name; generated from the keys when absent
    #[serde(default)]
    pub rel: Option<String>,
}

/// A join resolved against the catalog: doctypes, labels, relationship name.
#[derive(Debug, Clone)]
pub struct ResolvedJoin {
    pub left_table: String,
    pub left_doctype: String,
    pub left_key: String,
    pub right_table: String,
    pub right_doctype: String,
    pub right_key: String,
    pub rel: String,
    pub why: String,
}

/// The loaded catalog.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SchemaCatalog {
    #[serde(default)]
    pub tables: BTreeMap<String, TableInfo>,

    #[serde(default)]
    pub allowed_joins: Vec<JoinRule>,

    #[serde(default)]
    pub aliases: BTreeMap<String, String>,

    /// Tables a generated query may reference, in declaration order
    #[serde(default)]
    pub allowlist: Vec<String>,
}

/// Strip the framework's `tab` prefix.
pub fn canonical_doctype(table: &str) -> &str {
    table.strip_prefix("tab").unwrap_or(table)
}

/// Map a doctype to a valid graph label (no spaces/symbols/leading digits).
pub fn safe_label(doctype: &str) -> String {
    let mut label: String = doctype
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect();
    label = label.trim_matches('_').to_string();
    if label.is_empty() {
        label = "Doc".to_string();
    }
    if label.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        label = format!("_{label}");
    }
    label
}

/// Map an arbitrary name to a valid relationship type (UPPER_CASE).
pub fn safe_rel(rel: &str) -> String {
    let mut out: String = rel
        .chars()
        .map(|c| if c.is_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    // collapse runs of underscores
    while out.contains("__") {
        out = out.replace("__", "_");
    }
    out = out.trim_matches('_').to_string();
    if out.chars().next().is_some_and(|c| c.is_ascii_digit()) {
        out = format!("R_{out}");
    }
    out
}

impl SchemaCatalog {
    /// Load the catalog from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if the file is missing or malformed.
    pub fn load(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).into_owned();
        let raw = std::fs::read_to_string(&expanded)?;
        Self::from_str(&raw)
    }

    pub fn from_str(raw: &str) -> Result<Self> {
        serde_json::from_str(raw)
            .map_err(|e| AssistantError::SchemaError(format!("invalid schema catalog: {e}")))
    }

    /// Allow-listed tables that actually exist in the catalog, in order.
    pub fn allowlisted_tables(&self) -> Vec<&str> {
        self.allowlist
            .iter()
            .filter(|t| self.tables.contains_key(t.as_str()))
            .map(|t| t.as_str())
            .collect()
    }

    /// Canonical doctypes for the allow-listed tables.
    pub fn allowlisted_doctypes(&self) -> Vec<String> {
        self.allowlisted_tables()
            .into_iter()
            .map(|t| self.doctype_of(t))
            .collect()
    }

    /// Canonical doctype of a table entry.
    pub fn doctype_of(&self, table: &str) -> String {
        self.tables
            .get(table)
            .and_then(|t| t.doctype.clone())
            .unwrap_or_else(|| canonical_doctype(table).to_string())
    }

    /// Table name backing a doctype, if the doctype is known.
    pub fn table_of(&self, doctype: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|(t, info)| {
                info.doctype.as_deref() == Some(doctype) || canonical_doctype(t) == doctype
            })
            .map(|(t, _)| t.as_str())
    }

    /// Whether a table (or its doctype name) is allow-listed.
    pub fn is_allowed(&self, table_or_doctype: &str) -> bool {
        self.allowlist.iter().any(|t| {
            t == table_or_doctype || canonical_doctype(t) == canonical_doctype(table_or_doctype)
        })
    }

    /// Graph label for a table, honoring aliases.
    pub fn label_for_table(&self, table: &str) -> String {
        let name = self
            .aliases
            .get(table)
            .map(|a| a.as_str())
            .unwrap_or_else(|| canonical_doctype(table));
        safe_label(name)
    }

    pub fn label_for_doctype(&self, doctype: &str) -> String {
        match self.table_of(doctype) {
            Some(table) => self.label_for_table(table),
            None => safe_label(doctype),
        }
    }

    /// Relationship name for a join rule.
    pub fn rel_name(&self, join: &JoinRule) -> String {
        match &join.rel {
            Some(rel) => safe_rel(rel),
            None => {
                let left = canonical_doctype(&join.left_table);
                let right = canonical_doctype(&join.right_table);
                safe_rel(&format!(
                    "{left}_{lk}_TO_{right}_{rk}",
                    lk = join.left_key,
                    rk = join.right_key
                ))
            }
        }
    }

    /// Joins whose left or right doctype is in `doctypes`, resolved.
    pub fn joins_touching(&self, doctypes: &[String]) -> Vec<ResolvedJoin> {
        self.allowed_joins
            .iter()
            .filter_map(|j| {
                let ldt = canonical_doctype(&j.left_table).to_string();
                let rdt = canonical_doctype(&j.right_table).to_string();
                if !doctypes.contains(&ldt) && !doctypes.contains(&rdt) {
                    return None;
                }
                Some(self.resolve_join(j))
            })
            .collect()
    }

    /// All joins, resolved (used by the migrator).
    pub fn resolved_joins(&self) -> Vec<ResolvedJoin> {
        self.allowed_joins.iter().map(|j| self.resolve_join(j)).collect()
    }

    fn resolve_join(&self, j: &JoinRule) -> ResolvedJoin {
        ResolvedJoin {
            left_table: j.left_table.clone(),
            left_doctype: canonical_doctype(&j.left_table).to_string(),
            left_key: j.left_key.clone(),
            right_table: j.right_table.clone(),
            right_doctype: canonical_doctype(&j.right_table).to_string(),
            right_key: j.right_key.clone(),
            rel: self.rel_name(j),
            why: j.why.clone(),
        }
    }

    /// Allowed node properties for a doctype: declared columns plus the
    /// standard properties every migrated node carries.
    pub fn props_for(&self, doctype: &str) -> BTreeSet<String> {
        let mut props: BTreeSet<String> = BTreeSet::new();
        if let Some(table) = self.table_of(doctype) {
            if let Some(info) = self.tables.get(table) {
                props.extend(info.columns.iter().map(|c| c.name().to_string()));
            }
        }
        for std_prop in ["name", "display_name", "name1", "_doctype"] {
            props.insert(std_prop.to_string());
        }
        props
    }

    /// Select-typed columns with their options (value hints for prompts).
    pub fn select_columns_for(&self, doctype: &str) -> Vec<(&str, &[String])> {
        let Some(table) = self.table_of(doctype) else {
            return Vec::new();
        };
        let Some(info) = self.tables.get(table) else {
            return Vec::new();
        };
        info.columns
            .iter()
            .filter(|c| c.fieldtype() == "Select")
            .map(|c| (c.name(), c.options()))
            .collect()
    }

    pub fn display_field_for(&self, doctype: &str) -> Option<&str> {
        self.table_of(doctype)
            .and_then(|t| self.tables.get(t))
            .and_then(|info| info.display_field.as_deref())
    }

    /// Text schema summary for the SQL generation prompt: allow-listed
    /// tables only, filterable fields with their exact options, and the
    /// declared joins. This is the authorization boundary: nothing outside
    /// the allow-list is ever described to the model.
    pub fn sql_summary(&self) -> String {
        let mut parts = vec!["TABLES (with filterable fields and options):".to_string()];

        for table in self.allowlisted_tables() {
            let info = &self.tables[table];
            let mut details = Vec::new();
            for col in &info.columns {
                match col.fieldtype() {
                    "Select" if !col.options().is_empty() => {
                        details.push(format!(
                            "{} (Select, Options: {:?})",
                            col.name(),
                            col.options()
                        ));
                    }
                    "Link" => {
                        let target = col.options().first().map(|s| s.as_str()).unwrap_or("?");
                        details.push(format!("{} (Link to {})", col.name(), target));
                    }
                    ft @ ("Data" | "Small Text" | "Text" | "Currency" | "Int" | "Float") => {
                        details.push(format!("{} ({ft})", col.name()));
                    }
                    _ => {}
                }
            }
            if details.is_empty() {
                let cols: Vec<&str> = info.columns.iter().map(|c| c.name()).collect();
                parts.push(format!("- {table}: Columns are [{}]", cols.join(", ")));
            } else {
                parts.push(format!("- {table}:"));
                for d in details {
                    parts.push(format!("  - {d}"));
                }
            }
        }

        parts.push("\nJOINS (how tables connect):".to_string());
        for j in &self.allowed_joins {
            if !self.is_allowed(&j.left_table) || !self.is_allowed(&j.right_table) {
                continue;
            }
            let why = if j.why.is_empty() {
                format!(
                    "{}.{} -> {}.{}",
                    j.left_table, j.left_key, j.right_table, j.right_key
                )
            } else {
                j.why.clone()
            };
            parts.push(format!("- {why}"));
        }

        parts.join("\n")
    }

    /// Compact JSON summary for the doctype-selection prompt.
    pub fn compact_summary(&self) -> serde_json::Value {
        let mut tables = serde_json::Map::new();
        for (tname, info) in &self.tables {
            if !self.is_allowed(tname) {
                continue;
            }
            let fields: Vec<&str> = info.columns.iter().take(25).map(|c| c.name()).collect();
            let description: String = info.description.chars().take(160).collect();
            tables.insert(
                tname.clone(),
                serde_json::json!({
                    "doctype": self.doctype_of(tname),
                    "fields": fields,
                    "description": description,
                }),
            );
        }
        // same boundary as sql_summary: joins touching unlisted tables
        // never reach a prompt
        let links: Vec<&JoinRule> = self
            .allowed_joins
            .iter()
            .filter(|j| self.is_allowed(&j.left_table) && self.is_allowed(&j.right_table))
            .collect();
        serde_json::json!({
            "tables": tables,
            "links": links,
        })
    }

    /// Map LLM-proposed names to canonical doctypes, deduplicated.
    pub fn normalize_doctypes(&self, candidates: &[String]) -> Vec<String> {
        let mut by_lower: BTreeMap<String, String> = BTreeMap::new();
        for table in self.tables.keys() {
            let clean = canonical_doctype(table).to_string();
            by_lower.insert(clean.to_lowercase(), clean);
        }

        let mut seen = BTreeSet::new();
        let mut out = Vec::new();
        for name in candidates {
            let key = canonical_doctype(name.trim()).to_lowercase();
            if let Some(canonical) = by_lower.get(&key) {
                if seen.insert(canonical.clone()) {
                    out.push(canonical.clone());
                }
            }
        }
        out
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_catalog() -> SchemaCatalog {
        SchemaCatalog::from_str(
            r#"{
                "tables": {
                    "tabStudent": {
                        "doctype": "Student",
                        "columns": [
                            "name1",
                            {"name": "grade", "fieldtype": "Select", "options": ["8", "9", "10"]},
                            {"name": "school", "fieldtype": "Link", "options": ["School"]},
                            {"name": "status", "fieldtype": "Select", "options": ["Active", "Inactive"]}
                        ],
                        "description": "Enrolled students",
                        "display_field": "name1"
                    },
                    "tabSchool": {
                        "doctype": "School",
                        "columns": ["name1", {"name": "city", "fieldtype": "Data"}],
                        "description": "Partner schools"
                    },
                    "tabCourse Video": {
                        "doctype": "Course Video",
                        "columns": [
                            {"name": "video_name", "fieldtype": "Data"},
                            {"name": "difficulty_tier", "fieldtype": "Select", "options": ["Basic", "Advanced"]},
                            {"name": "link", "fieldtype": "Data"}
                        ],
                        "description": "Course videos",
                        "display_field": "video_name"
                    }
                },
                "allowed_joins": [
                    {
                        "left_table": "tabStudent",
                        "left_key": "school",
                        "right_table": "tabSchool",
                        "right_key": "name",
                        "why": "tabStudent.school links to tabSchool.name"
                    }
                ],
                "aliases": {},
                "allowlist": ["tabStudent", "tabSchool", "tabCourse Video"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_allowlist_and_doctypes() {
        let cat = sample_catalog();
        assert_eq!(cat.allowlisted_tables().len(), 3);
        assert!(cat.is_allowed("tabStudent"));
        assert!(cat.is_allowed("Student"));
        assert!(!cat.is_allowed("tabUser"));
        assert_eq!(cat.doctype_of("tabCourse Video"), "Course Video");
        assert_eq!(cat.table_of("School"), Some("tabSchool"));
    }

    #[test]
    fn test_safe_label_and_rel() {
        assert_eq!(safe_label("Course Video"), "Course_Video");
        assert_eq!(safe_label("3rd Party"), "_3rd_Party");
        assert_eq!(safe_rel("Student_school_TO_School_name"), "STUDENT_SCHOOL_TO_SCHOOL_NAME");
        assert_eq!(safe_rel("enrolled in"), "ENROLLED_IN");
    }

    #[test]
    fn test_rel_name_generated_upper_case() {
        let cat = sample_catalog();
        let joins = cat.resolved_joins();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].rel, "STUDENT_SCHOOL_TO_SCHOOL_NAME");
        assert_eq!(joins[0].left_doctype, "Student");
    }

    #[test]
    fn test_props_include_migrator_standards() {
        let cat = sample_catalog();
        let props = cat.props_for("Student");
        assert!(props.contains("grade"));
        assert!(props.contains("name"));
        assert!(props.contains("_doctype"));
        assert!(props.contains("display_name"));
    }

    #[test]
    fn test_sql_summary_lists_options_and_joins() {
        let cat = sample_catalog();
        let summary = cat.sql_summary();
        assert!(summary.contains("difficulty_tier (Select, Options:"));
        assert!(summary.contains("school (Link to School)"));
        assert!(summary.contains("tabStudent.school links to tabSchool.name"));
    }

    #[test]
    fn test_compact_summary_excludes_unlisted_joins() {
        let mut cat = sample_catalog();
        cat.allowed_joins.push(JoinRule {
            left_table: "tabStudent".to_string(),
            left_key: "user".to_string(),
            right_table: "tabUser".to_string(),
            right_key: "name".to_string(),
            why: String::new(),
            rel: None,
        });

        let summary = cat.compact_summary().to_string();
        assert!(!summary.contains("tabUser"));
        assert!(summary.contains("tabSchool")); // declared join survives
    }

    #[test]
    fn test_normalize_doctypes() {
        let cat = sample_catalog();
        let normalized = cat.normalize_doctypes(&[
            "tabStudent".to_string(),
            "course video".to_string(),
            "Nonexistent".to_string(),
            "Student".to_string(),
        ]);
        assert_eq!(normalized, vec!["Student".to_string(), "Course Video".to_string()]);
    }

    #[test]
    fn test_joins_touching() {
        let cat = sample_catalog();
        let touching = cat.joins_touching(&["Student".to_string()]);
        assert_eq!(touching.len(), 1);
        let none = cat.joins_touching(&["Course Video".to_string()]);
        assert!(none.is_empty());
    }
}
