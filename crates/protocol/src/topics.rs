//! Pub/sub topic codes.
//!
//! Descriptors are broadcast on subjects derived from their class: a size
//! bucket byte and a duration bucket byte, hex encoded. Renters publish on
//! `"0f" + code`; farmers announce capacity on `"0c" + code`.

/// Prefix for descriptor publication subjects.
pub const DESCRIPTOR_PREFIX: &str = "0f";

/// Prefix for farmer capacity announcement subjects.
pub const CAPACITY_PREFIX: &str = "0c";

const MS_PER_DAY: u64 = 86_400_000;
const MIB: u64 = 1024 * 1024;

/// Size bucket byte for a declared shard size.
pub fn size_bucket(data_size: u64) -> u8 {
    match data_size {
        s if s <= 8 * MIB => 0x01,
        s if s <= 16 * MIB => 0x02,
        s if s <= 32 * MIB => 0x03,
        s if s <= 64 * MIB => 0x04,
        s if s <= 128 * MIB => 0x05,
        s if s <= 256 * MIB => 0x06,
        s if s <= 512 * MIB => 0x07,
        _ => 0x08,
    }
}

/// Duration bucket byte for a validity window in milliseconds.
pub fn duration_bucket(duration_ms: u64) -> u8 {
    match duration_ms {
        d if d <= 30 * MS_PER_DAY => 0x01,
        d if d <= 90 * MS_PER_DAY => 0x02,
        d if d <= 180 * MS_PER_DAY => 0x03,
        _ => 0x04,
    }
}

/// 4-character hex code for a descriptor class.
pub fn topic_code(data_size: u64, duration_ms: u64) -> String {
    format!(
        "{:02x}{:02x}",
        size_bucket(data_size),
        duration_bucket(duration_ms)
    )
}

/// Subject a descriptor of this class is published on.
pub fn descriptor_topic(code: &str) -> String {
    format!("{DESCRIPTOR_PREFIX}{code}")
}

/// Subject capacity for this class is announced on.
pub fn capacity_topic(code: &str) -> String {
    format!("{CAPACITY_PREFIX}{code}")
}

/// Every topic code, for farmers that serve all descriptor classes.
pub fn all_topic_codes() -> Vec<String> {
    let mut codes = Vec::new();
    for size in 0x01u8..=0x08 {
        for duration in 0x01u8..=0x04 {
            codes.push(format!("{size:02x}{duration:02x}"));
        }
    }
    codes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_buckets_are_monotonic() {
        assert_eq!(size_bucket(0), 0x01);
        assert_eq!(size_bucket(8 * MIB), 0x01);
        assert_eq!(size_bucket(8 * MIB + 1), 0x02);
        assert_eq!(size_bucket(512 * MIB), 0x07);
        assert_eq!(size_bucket(u64::MAX), 0x08);
    }

    #[test]
    fn test_duration_buckets() {
        assert_eq!(duration_bucket(MS_PER_DAY), 0x01);
        assert_eq!(duration_bucket(30 * MS_PER_DAY), 0x01);
        assert_eq!(duration_bucket(31 * MS_PER_DAY), 0x02);
        assert_eq!(duration_bucket(365 * MS_PER_DAY), 0x04);
    }

    #[test]
    fn test_topic_code_shape() {
        let code = topic_code(10 * MIB, 45 * MS_PER_DAY);
        assert_eq!(code, "0202");
        assert_eq!(descriptor_topic(&code), "0f0202");
        assert_eq!(capacity_topic(&code), "0c0202");
    }

    #[test]
    fn test_all_topic_codes_cover_every_class() {
        let codes = all_topic_codes();
        assert_eq!(codes.len(), 32);
        assert!(codes.contains(&"0101".to_string()));
        assert!(codes.contains(&"0804".to_string()));
    }
}
