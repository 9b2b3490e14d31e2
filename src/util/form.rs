use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

/// Layout produced by `<input type="datetime-local">`.
pub const FORM_DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

/// Parses a form date and shifts it by `offset_minutes` to get UTC.
/// Blank input is `Ok(None)`; anything else that does not parse is an error.
pub fn parse_form_datetime(
    input: &str,
    offset_minutes: i32,
) -> Result<Option<DateTime<Utc>>, chrono::ParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Ok(None);
    }
    let naive = NaiveDateTime::parse_from_str(input, FORM_DATETIME_FORMAT)?;
    let shifted = naive + TimeDelta::minutes(i64::from(offset_minutes));
    Ok(Some(shifted.and_utc()))
}

/// Inverse of [`parse_form_datetime`], for prefilling edit forms.
pub fn format_form_datetime(value: Option<DateTime<Utc>>, offset_minutes: i32) -> String {
    value
        .map(|value| {
            (value - TimeDelta::minutes(i64::from(offset_minutes)))
                .format(FORM_DATETIME_FORMAT)
                .to_string()
        })
        .unwrap_or_default()
}
