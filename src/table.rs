use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Single cell of a configuration table.
///
/// TOML arrays may mix integers, floats and strings, so each cell keeps
/// whatever type it was written as and is converted on access.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Cell {
    pub fn as_f64(&self) -> Result<f64> {
        match self {
            Cell::Int(val) => Ok(*val as f64),
            Cell::Float(val) => Ok(*val),
            Cell::Text(text) => text
                .trim()
                .parse()
                .with_context(|| format!("{text:?} is not a number")),
        }
    }

    pub fn as_year(&self) -> Result<u32> {
        match self {
            Cell::Int(val) => u32::try_from(*val).with_context(|| format!("{val} is not a year")),
            Cell::Float(val) => bail!("{val} is not a year"),
            Cell::Text(text) => text
                .trim()
                .parse()
                .with_context(|| format!("{text:?} is not a year")),
        }
    }

    pub fn as_text(&self) -> String {
        self.to_string()
    }

    /// Split a comma-separated cell into trimmed entries.
    pub fn as_list(&self) -> Vec<String> {
        self.to_string()
            .split(',')
            .map(|ele| ele.trim().to_string())
            .collect()
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Int(val) => write!(f, "{val}"),
            Cell::Float(val) => write!(f, "{val}"),
            Cell::Text(text) => write!(f, "{}", text.trim()),
        }
    }
}

/// Column-headed table, as used for catch histories and method definitions.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Position of a column, if present.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col == name)
    }

    /// Check that every row has one cell per column.
    pub fn check_shape(&self) -> Result<()> {
        let n_cols = self.columns.len();
        for (i_row, row) in self.rows.iter().enumerate() {
            if row.len() != n_cols {
                bail!("row {i_row} has {} cells, but the table has {n_cols} columns", row.len());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cells_convert_from_mixed_types() {
        assert_eq!(Cell::Int(1990).as_year().unwrap(), 1990);
        assert_eq!(Cell::Text(" 1990 ".into()).as_year().unwrap(), 1990);
        assert!(Cell::Float(1990.5).as_year().is_err());
        assert!(Cell::Int(-1).as_year().is_err());

        assert_eq!(Cell::Int(3).as_f64().unwrap(), 3.0);
        assert_eq!(Cell::Text("2.5".into()).as_f64().unwrap(), 2.5);
        assert!(Cell::Text("abc".into()).as_f64().is_err());
    }

    #[test]
    fn list_cells_are_split_and_trimmed() {
        let cell = Cell::Text("male, female".into());
        assert_eq!(cell.as_list(), vec!["male", "female"]);
        assert_eq!(Cell::Text("male".into()).as_list(), vec!["male"]);
    }

    #[test]
    fn table_rows_deserialize_from_toml() {
        let table: Table = toml::from_str(
            r#"
columns = ["year", "FishA"]
rows = [[1971, 0.0], [1972, "200"]]
"#,
        )
        .unwrap();
        assert_eq!(table.column("FishA"), Some(1));
        assert_eq!(table.column("FishB"), None);
        assert!(table.check_shape().is_ok());
        assert_eq!(table.rows[1][1].as_f64().unwrap(), 200.0);
    }
}
