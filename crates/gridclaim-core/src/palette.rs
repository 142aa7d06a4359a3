//! The fixed, process-wide color palette.

use rand::Rng;

pub const PALETTE: [&str; 20] = [
    "#FF6B6B", "#FF8E53", "#FFA500", "#FFD93D", "#6BCB77", "#4D96FF", "#6C5CE7", "#A29BFE",
    "#FD79A8", "#E84393", "#00B894", "#00CEC9", "#0984E3", "#74B9FF", "#FF1744", "#FDCB6E",
    "#E17055", "#D63031", "#9B59B6", "#16A085",
];

/// Uniform random pick from the palette.
pub fn random_color() -> &'static str {
    PALETTE[rand::rng().random_range(0..PALETTE.len())]
}

pub fn contains(color: &str) -> bool {
    PALETTE.contains(&color)
}
