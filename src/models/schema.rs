use arrow::datatypes::{DataType, Field, Schema, SchemaRef, TimeUnit};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Storage type tag for a canonical column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Observation hour, stored as naive milliseconds
    Timestamp,
    /// Measurement narrowed to 32-bit float
    NarrowFloat,
    /// Coordinate kept at 64-bit float
    WideFloat,
    /// Low-cardinality label, dictionary encoded
    Categorical,
    Integer,
}

impl ColumnType {
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Millisecond, None),
            ColumnType::NarrowFloat => DataType::Float32,
            ColumnType::WideFloat => DataType::Float64,
            ColumnType::Categorical => {
                DataType::Dictionary(Box::new(DataType::Int32), Box::new(DataType::Utf8))
            }
            ColumnType::Integer => DataType::Int32,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ColumnType::NarrowFloat | ColumnType::WideFloat | ColumnType::Integer
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDef {
    /// Header name in the source extract
    pub source_name: &'static str,
    /// Column name in the columnar store
    pub name: &'static str,
    pub kind: ColumnType,
    pub nullable: bool,
    /// Documented physical bound, inclusive
    pub bounds: Option<(f64, f64)>,
}

impl ColumnDef {
    const fn new(
        source_name: &'static str,
        name: &'static str,
        kind: ColumnType,
        bounds: Option<(f64, f64)>,
    ) -> Self {
        Self {
            source_name,
            name,
            kind,
            nullable: true,
            bounds,
        }
    }

    pub fn field(&self) -> Field {
        Field::new(self.name, self.kind.arrow_type(), self.nullable)
    }
}

use ColumnType::{Categorical, Integer, NarrowFloat, WideFloat};

const AIR_QUALITY_COLUMNS: [ColumnDef; 25] = [
    ColumnDef {
        source_name: "date",
        name: "date",
        kind: ColumnType::Timestamp,
        nullable: false,
        bounds: None,
    },
    ColumnDef::new("sitename", "sitename", Categorical, None),
    ColumnDef::new("county", "county", Categorical, None),
    ColumnDef::new("aqi", "aqi", NarrowFloat, Some((0.0, 500.0))),
    ColumnDef::new("pollutant", "pollutant", Categorical, None),
    ColumnDef::new("status", "status", Categorical, None),
    ColumnDef::new("so2", "so2", NarrowFloat, Some((0.0, 1000.0))),
    ColumnDef::new("co", "co", NarrowFloat, Some((0.0, 100.0))),
    ColumnDef::new("o3", "o3", NarrowFloat, Some((0.0, 500.0))),
    ColumnDef::new("o3_8hr", "o3_8hr", NarrowFloat, Some((0.0, 500.0))),
    ColumnDef::new("pm10", "pm10", NarrowFloat, Some((0.0, 2000.0))),
    ColumnDef::new("pm2.5", "pm2_5", NarrowFloat, Some((0.0, 1000.0))),
    ColumnDef::new("no2", "no2", NarrowFloat, Some((0.0, 1000.0))),
    ColumnDef::new("nox", "nox", NarrowFloat, Some((0.0, 1000.0))),
    ColumnDef::new("no", "no", NarrowFloat, Some((0.0, 1000.0))),
    ColumnDef::new("windspeed", "windspeed", NarrowFloat, Some((0.0, 100.0))),
    ColumnDef::new("winddirec", "winddirec", NarrowFloat, Some((0.0, 360.0))),
    ColumnDef::new("unit", "unit", Categorical, None),
    ColumnDef::new("co_8hr", "co_8hr", NarrowFloat, Some((0.0, 100.0))),
    ColumnDef::new("pm2.5_avg", "pm2_5_avg", NarrowFloat, Some((0.0, 1000.0))),
    ColumnDef::new("pm10_avg", "pm10_avg", NarrowFloat, Some((0.0, 2000.0))),
    ColumnDef::new("so2_avg", "so2_avg", NarrowFloat, Some((0.0, 1000.0))),
    ColumnDef::new("longitude", "longitude", WideFloat, Some((119.0, 123.0))),
    ColumnDef::new("latitude", "latitude", WideFloat, Some((21.0, 26.0))),
    ColumnDef::new("siteid", "siteid", Integer, None),
];

/// The fixed column list every partition is written with.
///
/// The partition key is not a column: it lives in the `year=YYYY` directory
/// name and is derived from the timestamp column.
#[derive(Debug, Clone)]
pub struct CanonicalSchema {
    columns: Vec<ColumnDef>,
    arrow: SchemaRef,
    timestamp_index: usize,
}

impl CanonicalSchema {
    pub fn air_quality() -> Self {
        Self::from_columns(AIR_QUALITY_COLUMNS.to_vec())
    }

    /// Build a schema from an explicit column list. The first timestamp column
    /// becomes the partitioning column.
    pub fn from_columns(columns: Vec<ColumnDef>) -> Self {
        let timestamp_index = columns
            .iter()
            .position(|c| c.kind == ColumnType::Timestamp)
            .unwrap_or(0);
        let fields: Vec<Field> = columns.iter().map(ColumnDef::field).collect();

        Self {
            columns,
            arrow: Arc::new(Schema::new(fields)),
            timestamp_index,
        }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn arrow_schema(&self) -> SchemaRef {
        self.arrow.clone()
    }

    pub fn timestamp_index(&self) -> usize {
        self.timestamp_index
    }

    pub fn timestamp_column(&self) -> &ColumnDef {
        &self.columns[self.timestamp_index]
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn numeric_columns(&self) -> impl Iterator<Item = (usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.kind.is_numeric())
    }

    pub fn bounded_columns(&self) -> impl Iterator<Item = (usize, &ColumnDef)> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.bounds.is_some())
    }

    /// Compare a stored schema with this one, column by column.
    ///
    /// Returns `(column, expected, found)` for every divergence in name, order,
    /// type or nullability, plus missing and surplus columns.
    pub fn diff(&self, other: &Schema) -> Vec<(String, String, String)> {
        let mut mismatches = Vec::new();

        for (i, def) in self.columns.iter().enumerate() {
            let expected = def.field();
            match other.fields().get(i) {
                Some(found)
                    if found.name() == expected.name()
                        && found.data_type() == expected.data_type()
                        && found.is_nullable() == expected.is_nullable() => {}
                Some(found) => mismatches.push((
                    def.name.to_string(),
                    describe_field(&expected),
                    describe_field(found),
                )),
                None => mismatches.push((
                    def.name.to_string(),
                    describe_field(&expected),
                    "<missing>".to_string(),
                )),
            }
        }

        for extra in other.fields().iter().skip(self.columns.len()) {
            mismatches.push((
                extra.name().to_string(),
                "<absent>".to_string(),
                describe_field(extra),
            ));
        }

        mismatches
    }
}

impl Default for CanonicalSchema {
    fn default() -> Self {
        Self::air_quality()
    }
}

pub fn describe_field(field: &Field) -> String {
    format!(
        "{} {}{}",
        field.name(),
        field.data_type(),
        if field.is_nullable() { " NULL" } else { " NOT NULL" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_air_quality_schema_shape() {
        let schema = CanonicalSchema::air_quality();
        assert_eq!(schema.columns().len(), 25);
        assert_eq!(schema.timestamp_column().name, "date");
        assert!(!schema.timestamp_column().nullable);
        assert_eq!(schema.numeric_columns().count(), 19);
        assert_eq!(schema.bounded_columns().count(), 18);
        assert_eq!(schema.column("pm2_5").unwrap().source_name, "pm2.5");
    }

    #[test]
    fn test_arrow_types_follow_tags() {
        let schema = CanonicalSchema::air_quality().arrow_schema();
        let aqi = schema.field_with_name("aqi").unwrap();
        assert_eq!(aqi.data_type(), &DataType::Float32);
        let lat = schema.field_with_name("latitude").unwrap();
        assert_eq!(lat.data_type(), &DataType::Float64);
        let county = schema.field_with_name("county").unwrap();
        assert!(matches!(county.data_type(), DataType::Dictionary(_, _)));
    }

    #[test]
    fn test_diff_reports_changed_type() {
        let canonical = CanonicalSchema::air_quality();
        let mut fields: Vec<Field> = canonical
            .arrow_schema()
            .fields()
            .iter()
            .map(|f| f.as_ref().clone())
            .collect();
        fields[3] = Field::new("aqi", DataType::Float64, true);
        let altered = Schema::new(fields);

        let diff = canonical.diff(&altered);
        assert_eq!(diff.len(), 1);
        assert_eq!(diff[0].0, "aqi");
        assert!(canonical.diff(&canonical.arrow_schema()).is_empty());
    }
}
