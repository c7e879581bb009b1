/// Size of a sector in bytes. Partition regions are expressed in sectors.
pub const SECTOR_SIZE: u64 = 512;

const UNITS: [&str; 5] = ["KiB", "MiB", "GiB", "TiB", "PiB"];

/// Formats a size given in KiB with two decimals in the largest unit that
/// keeps the value at or above one, e.g. "1.00 GiB".
pub fn to_human_readable(size_k: u64) -> String {
    let mut value = size_k as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Converts a sector count to KiB.
pub fn sectors_to_k(sectors: u64) -> u64 {
    sectors * SECTOR_SIZE / 1024
}
