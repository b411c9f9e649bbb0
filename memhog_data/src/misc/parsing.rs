pub mod memory {
    use std::{num::ParseIntError, str::FromStr};

    use derive_more::derive::{Deref, Display, Into};
    use serde::Serialize;
    use thiserror::Error;

    const KIB: u64 = 1;
    const MIB: u64 = 1024;
    const GIB: u64 = 1024 * 1024;
    const TIB: u64 = 1024 * 1024 * 1024;

    /// Amount of memory in KiB, as reported by `sacct` in the `ReqMem` and `MaxRSS` columns.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deref, Display, Into, Serialize)]
    #[display("{_0}K")]
    #[serde(transparent)]
    pub struct MemorySize(pub u64);

    impl MemorySize {
        pub const ZERO: Self = MemorySize(0);

        pub fn is_zero(&self) -> bool {
            self.0 == 0
        }

        /// `self / used`, truncated. `None` if nothing was used.
        pub fn ratio_to(&self, used: MemorySize) -> Option<u64> {
            self.0.checked_div(used.0)
        }

        /// Parses slurm memory strings like `4000K`, `8Gn`, `500Mc` or `123`.
        ///
        /// A trailing `c` (per core) or `n` (per node) is dropped, both count the same for now.
        /// Empty input, or input that is empty after dropping that marker, is 0.
        pub fn parse(token: &str) -> Result<MemorySize, MemorySizeParseError> {
            use MemorySizeParseError::*;

            let stripped = token.strip_suffix(&['c', 'n'][..]).unwrap_or(token);
            if stripped.is_empty() {
                return Ok(Self::ZERO);
            }

            let (digits, scale) = [('K', KIB), ('M', MIB), ('G', GIB), ('T', TIB)]
                .into_iter()
                .find_map(|(suffix, scale)| stripped.strip_suffix(suffix).map(|digits| (digits, scale)))
                .unwrap_or((stripped, KIB));

            let value = digits.parse::<u64>().map_err(|source| InvalidInt {
                token: token.to_owned(),
                source,
            })?;
            value
                .checked_mul(scale)
                .map(MemorySize)
                .ok_or_else(|| Overflow { token: token.to_owned() })
        }
    }

    impl FromStr for MemorySize {
        type Err = MemorySizeParseError;

        fn from_str(s: &str) -> Result<Self, Self::Err> {
            Self::parse(s)
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq, Error)]
    pub enum MemorySizeParseError {
        #[error("`{token}`: numeric part is not an unsigned integer")]
        InvalidInt { token: String, source: ParseIntError },
        #[error("`{token}`: does not fit into 64 bits of KiB")]
        Overflow { token: String },
    }
}

pub use memory::{MemorySize, MemorySizeParseError};
