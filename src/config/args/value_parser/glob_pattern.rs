use crate::location::glob::GlobPattern;

pub fn check_glob_pattern(pattern: &str) -> Result<String, String> {
    if pattern.is_empty() {
        return Err("pattern must not be empty.".to_string());
    }

    GlobPattern::new(pattern).map_err(|e| e.to_string())?;

    Ok(pattern.to_string())
}

pub fn parse_glob_patterns(patterns: &[String]) -> Result<Vec<GlobPattern>, String> {
    patterns
        .iter()
        .map(|pattern| GlobPattern::new(pattern).map_err(|e| e.to_string()))
        .collect()
}
