//! Conversions between `mysql_async` and engine-neutral types.

use ingest_core::{DbError, Row, Value};
use mysql_async::{Params, Value as MySqlValue};

/// Map a driver error, keeping the server's SQLSTATE and error number.
pub fn db_error(error: mysql_async::Error) -> DbError {
    match error {
        mysql_async::Error::Server(server) => DbError {
            sql_state: Some(server.state),
            code: Some(u32::from(server.code)),
            message: server.message,
        },
        other => DbError::new(other.to_string()),
    }
}

/// Convert a driver value. Temporal values become their MySQL text form,
/// byte strings become text when they are valid UTF-8.
pub fn from_mysql_value(value: &MySqlValue) -> Value {
    match value {
        MySqlValue::NULL => Value::Null,
        MySqlValue::Int(i) => Value::Int(*i),
        MySqlValue::UInt(u) => Value::UInt(*u),
        MySqlValue::Float(f) => Value::Float(f64::from(*f)),
        MySqlValue::Double(d) => Value::Float(*d),
        MySqlValue::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => Value::Text(text.to_string()),
            Err(_) => Value::Bytes(bytes.clone()),
        },
        MySqlValue::Date(year, month, day, hour, minute, second, micros) => {
            let mut text =
                format!("{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}");
            if *micros > 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            Value::Text(text)
        }
        MySqlValue::Time(negative, days, hours, minutes, seconds, micros) => {
            let sign = if *negative { "-" } else { "" };
            let hours = u64::from(*days) * 24 + u64::from(*hours);
            let mut text = format!("{sign}{hours:02}:{minutes:02}:{seconds:02}");
            if *micros > 0 {
                text.push_str(&format!(".{micros:06}"));
            }
            Value::Text(text)
        }
    }
}

fn to_mysql_value(value: &Value) -> MySqlValue {
    match value {
        Value::Null => MySqlValue::NULL,
        Value::Int(i) => MySqlValue::Int(*i),
        Value::UInt(u) => MySqlValue::UInt(*u),
        Value::Float(f) => MySqlValue::Double(*f),
        Value::Text(s) => MySqlValue::Bytes(s.as_bytes().to_vec()),
        Value::Bytes(b) => MySqlValue::Bytes(b.clone()),
    }
}

/// Positional statement parameters.
pub fn to_mysql_params(params: &[Value]) -> Params {
    Params::Positional(params.iter().map(to_mysql_value).collect())
}

/// Convert a driver row, keeping column order.
pub fn from_mysql_row(row: &mysql_async::Row) -> Row {
    row.columns_ref()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = row
                .as_ref(idx)
                .map(from_mysql_value)
                .unwrap_or(Value::Null);
            (column.name_str().into_owned(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_error_keeps_sql_state() {
        let error = mysql_async::Error::Server(mysql_async::ServerError {
            code: 1213,
            message: "Deadlock found when trying to get lock".to_string(),
            state: "40001".to_string(),
        });

        let db_error = db_error(error);

        assert!(db_error.is_serialization_failure());
        assert_eq!(db_error.code, Some(1213));
        assert_eq!(db_error.message, "Deadlock found when trying to get lock");
    }

    #[test]
    fn test_text_and_binary_values() {
        assert_eq!(
            from_mysql_value(&MySqlValue::Bytes(b"y\\z".to_vec())),
            Value::Text("y\\z".to_string())
        );
        assert_eq!(
            from_mysql_value(&MySqlValue::Bytes(vec![0xff, 0xfe])),
            Value::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(from_mysql_value(&MySqlValue::NULL), Value::Null);
        assert_eq!(from_mysql_value(&MySqlValue::Int(-4)), Value::Int(-4));
    }

    #[test]
    fn test_temporal_values_use_mysql_text_form() {
        assert_eq!(
            from_mysql_value(&MySqlValue::Date(2024, 3, 9, 7, 5, 0, 0)),
            Value::Text("2024-03-09 07:05:00".to_string())
        );
        assert_eq!(
            from_mysql_value(&MySqlValue::Date(2024, 3, 9, 7, 5, 0, 120)),
            Value::Text("2024-03-09 07:05:00.000120".to_string())
        );
        assert_eq!(
            from_mysql_value(&MySqlValue::Time(true, 1, 2, 3, 4, 0)),
            Value::Text("-26:03:04".to_string())
        );
    }

    #[test]
    fn test_params_are_positional() {
        let params = to_mysql_params(&[Value::Int(1), Value::Text("x".into()), Value::Null]);
        assert_eq!(
            params,
            Params::Positional(vec![
                MySqlValue::Int(1),
                MySqlValue::Bytes(b"x".to_vec()),
                MySqlValue::NULL,
            ])
        );
    }
}
