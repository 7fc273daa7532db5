use serde_json::{Map, Value};
use std::path::Path;

use idmapper_core::{MapperError, Result, Row, Table};

/// On-disk table encodings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Tsv,
    /// A JSON array of row objects
    Json,
}

impl TableFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "csv" => Ok(TableFormat::Csv),
            "tsv" | "tab" | "txt" => Ok(TableFormat::Tsv),
            "json" => Ok(TableFormat::Json),
            other => Err(MapperError::config(format!("unsupported table format '{}' (expected csv, tsv or json)", other))),
        }
    }

    /// Infer the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| MapperError::config(format!("cannot infer table format of {}", path.display())))?;
        Self::from_name(extension)
    }

    fn delimiter(&self) -> Option<char> {
        match self {
            TableFormat::Csv => Some(','),
            TableFormat::Tsv => Some('\t'),
            TableFormat::Json => None,
        }
    }
}

/// Byte-order mark written by many spreadsheet exports
const BOM: char = '\u{FEFF}';

pub async fn read_table(path: &Path, format: TableFormat) -> Result<Table> {
    let content = tokio::fs::read_to_string(path).await?;
    let parsed = match format.delimiter() {
        Some(delimiter) => parse_delimited(&content, delimiter),
        None => parse_json_rows(content.trim_start_matches(BOM)),
    };
    parsed.map_err(|e| match e {
        MapperError::Data(message) => MapperError::data(format!("{}: {}", path.display(), message)),
        other => other,
    })
}

pub async fn write_table(table: &Table, path: &Path, format: TableFormat) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let content = match format.delimiter() {
        Some(delimiter) => render_delimited(table, delimiter),
        None => serde_json::to_string_pretty(table.rows())?,
    };
    tokio::fs::write(path, content).await?;
    Ok(())
}

/// Parse delimited text with a header line. Fields may be double-quoted, with
/// `""` standing for a literal quote; quoted fields may span lines. Empty cells
/// become nulls.
pub fn parse_delimited(content: &str, delimiter: char) -> Result<Table> {
    let mut records = split_records(content, delimiter)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| MapperError::data("file is empty: a header line is required"))?;
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();
    if header.iter().any(String::is_empty) {
        return Err(MapperError::data("header contains an empty column name"));
    }

    let mut table = Table::new(header.iter().cloned());
    if table.columns().len() != header.len() {
        return Err(MapperError::data("header contains duplicate column names"));
    }

    for (line, fields) in records.enumerate() {
        if fields.len() > header.len() {
            return Err(MapperError::data(format!(
                "record {} has {} fields but the header declares {}",
                line + 1,
                fields.len(),
                header.len()
            )));
        }
        let row: Row = header
            .iter()
            .zip(fields)
            .map(|(column, field)| {
                let value = if field.is_empty() { Value::Null } else { Value::String(field) };
                (column.clone(), value)
            })
            .collect();
        table.push_row(row)?;
    }
    Ok(table)
}

fn split_records(content: &str, delimiter: char) -> Result<Vec<Vec<String>>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.strip_prefix(BOM).unwrap_or(content).chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' => {
                fields.push(std::mem::take(&mut field));
                let record = std::mem::take(&mut fields);
                if !(record.len() == 1 && record[0].is_empty()) {
                    records.push(record);
                }
            }
            c if c == delimiter => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err(MapperError::data("unterminated quoted field"));
    }
    if !field.is_empty() || !fields.is_empty() {
        fields.push(field);
        records.push(fields);
    }
    Ok(records)
}

pub fn render_delimited(table: &Table, delimiter: char) -> String {
    let mut out = String::new();
    let header: Vec<String> = table.columns().iter().map(|c| quote(c, delimiter)).collect();
    out.push_str(&header.join(&delimiter.to_string()));
    out.push('\n');
    for row in table.rows() {
        let cells: Vec<String> = table
            .columns()
            .iter()
            .map(|column| quote(&cell_text(row.get(column).unwrap_or(&Value::Null)), delimiter))
            .collect();
        out.push_str(&cells.join(&delimiter.to_string()));
        out.push('\n');
    }
    out
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn quote(text: &str, delimiter: char) -> String {
    if text.contains(delimiter) || text.contains('"') || text.contains('\n') || text.contains('\r') {
        format!("\"{}\"", text.replace('"', "\"\""))
    } else {
        text.to_string()
    }
}

/// Parse a JSON array of objects. Columns are the union of keys in first-seen order.
pub fn parse_json_rows(content: &str) -> Result<Table> {
    let rows: Vec<Map<String, Value>> = serde_json::from_str(content)
        .map_err(|e| MapperError::data(format!("expected a JSON array of objects: {}", e)))?;

    let mut columns: Vec<String> = Vec::new();
    for row in &rows {
        for key in row.keys() {
            if !columns.contains(key) {
                columns.push(key.clone());
            }
        }
    }

    let mut table = Table::new(columns);
    for row in rows {
        table.push_row(row.into_iter().collect())?;
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_quoted_fields() {
        let content = "id,name\r\nP1,\"Kinase, alpha\"\nP2,\"say \"\"hi\"\"\"\nP3,\"two\nlines\"\n";
        let table = parse_delimited(content, ',').unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(table.rows()[0]["name"], json!("Kinase, alpha"));
        assert_eq!(table.rows()[1]["name"], json!("say \"hi\""));
        assert_eq!(table.rows()[2]["name"], json!("two\nlines"));
    }

    #[test]
    fn test_leading_byte_order_mark_is_ignored() {
        let table = parse_delimited("\u{FEFF}uniprot,name\nP1,a\n", ',').unwrap();
        assert_eq!(table.columns()[0], "uniprot");
        assert_eq!(table.rows()[0]["uniprot"], json!("P1"));

        let quoted = parse_delimited("\u{FEFF}\"uniprot\"\tname\nP1\ta\n", '\t').unwrap();
        assert_eq!(quoted.rows()[0]["uniprot"], json!("P1"));
    }

    #[tokio::test]
    async fn test_read_json_with_byte_order_mark() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.json");
        tokio::fs::write(&path, "\u{FEFF}[{\"id\": \"P1\"}]").await.unwrap();

        let table = read_table(&path, TableFormat::Json).await.unwrap();
        assert_eq!(table.rows()[0]["id"], json!("P1"));
    }

    #[test]
    fn test_short_rows_are_padded_and_empty_cells_are_null() {
        let table = parse_delimited("a\tb\tc\n1\t\n", '\t').unwrap();
        let row = &table.rows()[0];
        assert_eq!(row["a"], json!("1"));
        assert_eq!(row["b"], Value::Null);
        assert_eq!(row["c"], Value::Null);
    }

    #[test]
    fn test_blank_lines_skipped_and_missing_trailing_newline() {
        let table = parse_delimited("id\n\nA\nB", ',').unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_long_row_is_rejected() {
        let err = parse_delimited("id\nA,B\n", ',').unwrap_err();
        assert!(err.to_string().contains("record 1"));
    }

    #[test]
    fn test_unterminated_quote_is_rejected() {
        assert!(parse_delimited("id\n\"A\n", ',').is_err());
    }

    #[test]
    fn test_render_quotes_only_when_needed() {
        let table = parse_delimited("id,note\nP1,\"a,b\"\nP2,plain\n", ',').unwrap();
        let rendered = render_delimited(&table, ',');
        assert_eq!(rendered, "id,note\nP1,\"a,b\"\nP2,plain\n");
    }

    #[test]
    fn test_json_rows_union_columns() {
        let table = parse_json_rows(r#"[{"id": "A", "score": 1}, {"id": "B", "extra": true}]"#).unwrap();
        assert_eq!(table.columns(), &["id", "score", "extra"]);
        assert_eq!(table.rows()[1]["score"], Value::Null);
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(TableFormat::from_path(Path::new("a/b.TSV")).unwrap(), TableFormat::Tsv);
        assert!(TableFormat::from_path(Path::new("a/b")).is_err());
        assert!(TableFormat::from_name("parquet").is_err());
    }

    #[tokio::test]
    async fn test_write_then_read_csv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out.csv");
        let table = parse_json_rows(r#"[{"id": "P1", "components": ["A", "B"]}]"#).unwrap();

        write_table(&table, &path, TableFormat::Csv).await.unwrap();
        let back = read_table(&path, TableFormat::Csv).await.unwrap();

        assert_eq!(back.rows()[0]["components"], json!("[\"A\",\"B\"]"));
    }
}
