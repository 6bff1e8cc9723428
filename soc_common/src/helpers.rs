/// Parse a boolean flag from a string value, or return the given default value otherwise.
///
/// Marketplace feeds encode booleans inconsistently ("1", "TRUE", "yes"), so CSV and JSON
/// ingestion both route through this.
pub fn parse_boolean_flag(value: Option<&str>, default: bool) -> bool {
    let value = match value {
        Some(v) => v,
        None => return default,
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
