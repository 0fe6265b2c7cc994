use url::Url;

const INVALID_SCHEME: &str = "scheme must be https:// or http:// .";

pub fn check_scheme(url: &str) -> Result<String, String> {
    let parsed = Url::parse(url).map_err(|e| e.to_string())?;

    if parsed.scheme() != "https" && parsed.scheme() != "http" {
        return Err(INVALID_SCHEME.to_string());
    }

    Ok(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_url() {
        check_scheme("https://endpoint_url.local").unwrap();
        check_scheme("https://endpoint_url.local/").unwrap();
        check_scheme("http://127.0.0.1:9000").unwrap();
        check_scheme("http://localhost:9000/").unwrap();
    }

    #[test]
    fn invalid_url() {
        assert_eq!(
            check_scheme("s3://endpoint_url.local").unwrap_err(),
            INVALID_SCHEME.to_string()
        );
        assert!(check_scheme("endpoint_url.local").is_err());
    }
}
