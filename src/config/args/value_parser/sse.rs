use aws_sdk_s3::types::ServerSideEncryption;

const INVALID_SSE_VALUE: &str =
    "invalid sse value. valid choices: AES256 | aws:kms | aws:kms:dsse.";

pub fn parse_sse(sse: &str) -> Result<String, String> {
    #[allow(deprecated)]
    if matches!(
        ServerSideEncryption::from(sse),
        ServerSideEncryption::Unknown(_)
    ) {
        return Err(INVALID_SSE_VALUE.to_string());
    }

    Ok(sse.to_string())
}

pub fn is_kms(sse: &str) -> bool {
    matches!(
        ServerSideEncryption::from(sse),
        ServerSideEncryption::AwsKms | ServerSideEncryption::AwsKmsDsse
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sse_test() {
        parse_sse("AES256").unwrap();
        parse_sse("aws:kms").unwrap();
        parse_sse("aws:kms:dsse").unwrap();

        assert!(parse_sse("aes256").is_err());
    }

    #[test]
    fn is_kms_test() {
        assert!(is_kms("aws:kms"));
        assert!(is_kms("aws:kms:dsse"));
        assert!(!is_kms("AES256"));
    }
}
