/// Partition key of every prediction table.
pub const KEY_ATTRIBUTE: &str = "S3Path";

/// Prediction tables are created per name on first use, so the DDL is built
/// from a validated table name rather than fixed at startup.
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS \"{table}\" (
            S3Path TEXT PRIMARY KEY NOT NULL,
            Predicted TEXT NOT NULL,
            Probability TEXT NOT NULL,
            DateCreatedUTC TEXT NOT NULL
        );"
    )
}

pub fn upsert_sql(table: &str) -> String {
    format!(
        "INSERT INTO \"{table}\" (S3Path, Predicted, Probability, DateCreatedUTC)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(S3Path) DO UPDATE SET
            Predicted=excluded.Predicted,
            Probability=excluded.Probability,
            DateCreatedUTC=excluded.DateCreatedUTC"
    )
}

pub fn select_sql(table: &str) -> String {
    format!(
        "SELECT S3Path, Predicted, Probability, DateCreatedUTC FROM \"{table}\" WHERE S3Path = ?1"
    )
}

pub fn count_sql(table: &str) -> String {
    format!("SELECT COUNT(*) FROM \"{table}\"")
}

/// Table names follow key-value store naming: 3 to 255 characters of
/// `[A-Za-z0-9_.-]`. This also keeps them safe to quote in SQL.
pub fn is_valid_table_name(table: &str) -> bool {
    (3..=255).contains(&table.len())
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// SQLite identifiers ignore case but table names do not, so each upper-case
/// letter is stored as `~` plus its lower-case form. `~` never occurs in a
/// valid name, which keeps the mapping one-to-one.
pub fn stored_table_name(table: &str) -> String {
    let mut stored = String::with_capacity(table.len());
    for c in table.chars() {
        if c.is_ascii_uppercase() {
            stored.push('~');
            stored.push(c.to_ascii_lowercase());
        } else {
            stored.push(c);
        }
    }
    stored
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_validation() {
        assert!(is_valid_table_name("action-detections"));
        assert!(is_valid_table_name("ucf_101.results"));
        assert!(!is_valid_table_name("ab"));
        assert!(!is_valid_table_name("bad\"name"));
        assert!(!is_valid_table_name("drop table;"));
        assert!(!is_valid_table_name(&"x".repeat(256)));
    }

    #[test]
    fn test_stored_names_differ_beyond_case() {
        assert_eq!(stored_table_name("detections"), "detections");
        assert_eq!(stored_table_name("Detections"), "~detections");
        assert_eq!(stored_table_name("UCF.v2"), "~u~c~f.v2");
        assert_ne!(
            stored_table_name("Detections").to_lowercase(),
            stored_table_name("detections").to_lowercase()
        );
    }
}
