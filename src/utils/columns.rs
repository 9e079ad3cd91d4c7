use arrow::array::{
    Array, ArrayRef, AsArray, DictionaryArray, Float32Array, Float64Array, Int32Array,
    StringArray, TimestampMillisecondArray,
};
use arrow::datatypes::{
    DataType, Float32Type, Float64Type, Int32Type, TimeUnit, TimestampMillisecondType,
};
use chrono::{DateTime, NaiveDateTime};

/// Typed view over a numeric store column, read back as f64.
#[derive(Clone, Copy)]
pub enum NumericColumn<'a> {
    Narrow(&'a Float32Array),
    Wide(&'a Float64Array),
    Integer(&'a Int32Array),
}

impl<'a> NumericColumn<'a> {
    pub fn try_new(array: &'a ArrayRef) -> Option<Self> {
        match array.data_type() {
            DataType::Float32 => Some(Self::Narrow(array.as_primitive::<Float32Type>())),
            DataType::Float64 => Some(Self::Wide(array.as_primitive::<Float64Type>())),
            DataType::Int32 => Some(Self::Integer(array.as_primitive::<Int32Type>())),
            _ => None,
        }
    }

    pub fn get(&self, row: usize) -> Option<f64> {
        match self {
            Self::Narrow(a) => a.is_valid(row).then(|| a.value(row) as f64),
            Self::Wide(a) => a.is_valid(row).then(|| a.value(row)),
            Self::Integer(a) => a.is_valid(row).then(|| a.value(row) as f64),
        }
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Self::Narrow(a) => a.is_null(row),
            Self::Wide(a) => a.is_null(row),
            Self::Integer(a) => a.is_null(row),
        }
    }
}

/// Label column, either dictionary encoded or plain UTF-8.
#[derive(Clone, Copy)]
pub enum TextColumn<'a> {
    Dictionary(&'a DictionaryArray<Int32Type>, &'a StringArray),
    Plain(&'a StringArray),
}

impl<'a> TextColumn<'a> {
    pub fn try_new(array: &'a ArrayRef) -> Option<Self> {
        if let Some(dict) = array.as_dictionary_opt::<Int32Type>() {
            let values = dict.values().as_string_opt::<i32>()?;
            return Some(Self::Dictionary(dict, values));
        }
        array.as_string_opt::<i32>().map(Self::Plain)
    }

    pub fn get(&self, row: usize) -> Option<&'a str> {
        match self {
            Self::Dictionary(dict, values) => {
                if dict.is_null(row) {
                    return None;
                }
                let key = dict.keys().value(row);
                usize::try_from(key).ok().map(|k| values.value(k))
            }
            Self::Plain(a) => a.is_valid(row).then(|| a.value(row)),
        }
    }

    pub fn is_null(&self, row: usize) -> bool {
        match self {
            Self::Dictionary(dict, _) => dict.is_null(row),
            Self::Plain(a) => a.is_null(row),
        }
    }
}

pub fn timestamps(array: &ArrayRef) -> Option<&TimestampMillisecondArray> {
    match array.data_type() {
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            Some(array.as_primitive::<TimestampMillisecondType>())
        }
        _ => None,
    }
}

pub fn naive_from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}
