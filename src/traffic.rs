//! 流量单位换算

/// 1 GB = 2^30 字节
pub const BYTES_PER_GB: i64 = 1 << 30;

/// GB 转字节
pub fn gb_to_bytes(gb: i64) -> i64 {
    gb.saturating_mul(BYTES_PER_GB)
}

/// 字节转 GB
pub fn bytes_to_gb(bytes: i64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion() {
        assert_eq!(gb_to_bytes(130), 139_586_437_120);
        assert_eq!(bytes_to_gb(140 * BYTES_PER_GB), 140.0);
        assert_eq!(bytes_to_gb(BYTES_PER_GB / 2), 0.5);
    }
}
