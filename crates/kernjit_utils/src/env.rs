/// Interprets a boolean environment value.
///
/// Unset or empty values yield `default`. Any other value is `true` only when
/// it parses as the integer `1`; unparsable values are `false`.
pub fn parse_bool_flag(value: Option<&str>, default: bool) -> bool {
    match value {
        None => default,
        Some("") => default,
        Some(raw) => raw.trim().parse::<i64>().is_ok_and(|v| v == 1),
    }
}
