/// Number of cohorts a subject can fall into.
pub const BUCKET_COUNT: u32 = 100;

/// Place `subject` into a cohort in `0..100` for `scope`.
///
/// The hash is a 32-bit polynomial rolling hash (`h = h * 31 + unit`, wrapping) over the UTF-16
/// code units of `scope + ":" + subject`, reduced with `|h| % 100`. Live rollouts depend on the
/// exact output of this function: changing it re-buckets every user.
///
/// Flags pass `platform:environment:flagKey` as the scope so that cohorts are independent across
/// flags and across environments.
pub fn bucket(scope: &str, subject: &str) -> u32 {
    let hash = scope
        .encode_utf16()
        .chain(":".encode_utf16())
        .chain(subject.encode_utf16())
        .fold(0_i32, |hash, unit| {
            hash.wrapping_mul(31).wrapping_add(i32::from(unit))
        });

    // i64 so that i32::MIN has an absolute value
    (i64::from(hash).abs() % i64::from(BUCKET_COUNT)) as u32
}

/// Compose the bucketing scope for a flag identity.
pub fn bucket_scope(platform: &str, environment: &str, flag_key: &str) -> String {
    format!("{}:{}:{}", platform, environment, flag_key)
}
