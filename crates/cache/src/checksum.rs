/// Polynomial rolling hash over the text's code points (`h = h * 31 + c`,
/// wrapping at 32 bits), rendered as 8 lowercase hex digits.
///
/// Not cryptographic: it only detects that a payload changed.
pub fn checksum(text: &str) -> String {
    let hash = text
        .chars()
        .fold(0u32, |h, c| h.wrapping_mul(31).wrapping_add(c as u32));
    format!("{hash:08x}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_and_fixed_width() {
        assert_eq!(checksum(""), "00000000");
        assert_eq!(checksum("a"), "00000061");
        assert_eq!(checksum("ab"), format!("{:08x}", 97u32 * 31 + 98));
        let long = "day,ad_name,spend\n".repeat(1000);
        assert_eq!(checksum(&long).len(), 8);
        assert_eq!(checksum(&long), checksum(&long.clone()));
    }

    #[test]
    fn test_checksum_detects_changes() {
        assert_ne!(checksum("2024-01-01,A,100"), checksum("2024-01-01,A,101"));
        assert_ne!(checksum("ab"), checksum("ba"));
    }
}
