/// Compute a short hex prefix of the BLAKE3 hash of a string.
///
/// Store entry and cache file names embed one of these so that escaped
/// package names cannot alias each other, and so an entry's location is a
/// pure function of its integrity string.
#[must_use]
pub fn blake3_prefix(data: &str, len: usize) -> String {
    let mut hex = blake3::hash(data.as_bytes()).to_hex().to_string();
    hex.truncate(len);
    hex
}
