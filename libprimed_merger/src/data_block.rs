use fxhash::FxHashMap;
use ndarray::Array2;

use super::error::LookupError;

/// A single named measurement column.
///
/// Raw files carry a mix of numeric channels (voltage, current, impedance)
/// and text channels (timestamps, occasionally-blank resistance readouts).
/// A column starts out numeric if its first value parses as a float; the
/// moment a value does not parse, the whole column is demoted to text so
/// every value in a column always shares one representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl Column {
    fn from_raw(raw: &str) -> Self {
        match raw.parse::<f64>() {
            Ok(value) => Column::Float(vec![value]),
            Err(_) => Column::Text(vec![raw.to_string()]),
        }
    }

    fn push_raw(&mut self, raw: &str) {
        match self {
            Column::Float(values) => match raw.parse::<f64>() {
                Ok(value) => values.push(value),
                Err(_) => {
                    let mut text: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    text.push(raw.to_string());
                    *self = Column::Text(text);
                }
            },
            Column::Text(values) => values.push(raw.to_string()),
        }
    }

    fn push_float(&mut self, value: f64) {
        match self {
            Column::Float(values) => values.push(value),
            Column::Text(values) => values.push(value.to_string()),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Column::Float(values) => values.len(),
            Column::Text(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Column::Float(values) => Some(values),
            Column::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&[String]> {
        match self {
            Column::Text(values) => Some(values),
            Column::Float(_) => None,
        }
    }

    /// Numeric view of one value; text cells come back as NaN.
    fn value_as_f64(&self, row: usize) -> f64 {
        match self {
            Column::Float(values) => values[row],
            Column::Text(_) => f64::NAN,
        }
    }
}

/// The ordered column store shared by cycler steps and impedance sweeps.
///
/// Columns keep the order in which they were first seen (the source file's
/// header order); lookup by name goes through a hash index. All columns in
/// one block have the same length, since parsers push every column once per
/// row.
#[derive(Debug, Clone, Default)]
pub struct DataBlock {
    columns: Vec<(String, Column)>,
    index: FxHashMap<String, usize>,
}

impl DataBlock {
    pub fn new() -> Self {
        DataBlock::default()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Row count, equal across all columns.
    pub fn n_rows(&self) -> usize {
        self.columns.first().map(|(_, col)| col.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows() == 0
    }

    /// Column names in stored order. Calling again restarts the iteration.
    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn header_list(&self) -> Vec<String> {
        self.columns.iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Get the full ordered column for a name.
    pub fn column(&self, name: &str) -> Result<&Column, LookupError> {
        match self.index.get(name) {
            Some(idx) => Ok(&self.columns[*idx].1),
            None => Err(LookupError::NoColumn(name.to_string())),
        }
    }

    /// Get a column as a float slice, failing if it holds text.
    pub fn floats(&self, name: &str) -> Result<&[f64], LookupError> {
        self.column(name)?
            .as_floats()
            .ok_or_else(|| LookupError::NotNumeric(name.to_string()))
    }

    /// Append one raw value to a column, creating the column on first use.
    pub fn push_raw(&mut self, name: &str, raw: &str) {
        match self.index.get(name) {
            Some(idx) => self.columns[*idx].1.push_raw(raw),
            None => {
                self.index.insert(name.to_string(), self.columns.len());
                self.columns.push((name.to_string(), Column::from_raw(raw)));
            }
        }
    }

    /// Append one numeric value to a column, creating the column on first use.
    pub fn push_float(&mut self, name: &str, value: f64) {
        match self.index.get(name) {
            Some(idx) => self.columns[*idx].1.push_float(value),
            None => {
                self.index.insert(name.to_string(), self.columns.len());
                self.columns.push((name.to_string(), Column::Float(vec![value])));
            }
        }
    }

    /// Snapshot the block as a rows x columns matrix in stored column order.
    ///
    /// Text cells become NaN; pair with [`DataBlock::header_list`] for the
    /// column labels.
    pub fn to_array(&self) -> Array2<f64> {
        Array2::from_shape_fn((self.n_rows(), self.n_columns()), |(row, col)| {
            self.columns[col].1.value_as_f64(row)
        })
    }
}
