use std::collections::HashMap;

use regex::Regex;

const INVALID_METADATA: &str = "invalid metadata.";
const METADATA_REGEX: &str = r"^[a-zA-Z0-9_\-.]+=[a-zA-Z0-9_\-.]*(,[a-zA-Z0-9_\-.]+=[a-zA-Z0-9_\-.]*)*$";

pub fn check_metadata(metadata: &str) -> Result<String, String> {
    let regex = Regex::new(METADATA_REGEX).map_err(|e| e.to_string())?;

    if !regex.is_match(metadata) {
        return Err(INVALID_METADATA.to_string());
    }

    Ok(metadata.to_string())
}

pub fn parse_metadata(value: &str) -> Result<HashMap<String, String>, String> {
    check_metadata(value)?;

    Ok(value
        .split(',')
        .filter_map(|key_value| key_value.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect())
}
