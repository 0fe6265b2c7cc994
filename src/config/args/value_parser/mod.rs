pub mod canned_acl;
pub mod glob_pattern;
pub mod human_bytes;
pub mod metadata;
pub mod sse;
pub mod storage_class;
pub mod url;
