//! Shared constants

/// Wrapped SOL mint, the native asset for all allocation math
pub const SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// USDC mint, the default quote asset for price-trigger exits
pub const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

/// Lamports per SOL
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Decimals for SOL amounts
pub const SOL_DECIMALS: u32 = 9;

/// Decimals for USDC amounts
pub const USDC_DECIMALS: u32 = 6;
